//! Statistical collaborators exposed as recordable functions.
//!
//! Degenerate input (no finite values, a single outcome class) yields a `NaN`
//! scalar result instead of an error so that report generation can proceed
//! and flag the gap. Figures are attached as lazy outputs.

use ndarray::Array1;
use tracing::debug;

use crate::automation::{Arg, CallArgs, Registry};
use crate::errors::ValidationError;
use crate::output::{Figure, OutputValue};
use crate::result::{ScalarRagResult, ScalarResult};

/// Default PSI limits: above amber is problematic, above red is critical.
pub const PSI_LIMITS: (f64, f64) = (0.1, 0.25);
/// Default AUC limits: below amber is problematic, below red is critical.
pub const AUC_LIMITS: (f64, f64) = (0.85, 0.7);
/// Default Gini limits: below amber is problematic, below red is critical.
pub const GINI_LIMITS: (f64, f64) = (0.7, 0.4);
/// Relative frequency substituted for empty buckets.
const PSI_EMPTY_BUCKET: f64 = 0.0001;

/// Register the metric functions.
pub fn register(registry: &mut Registry) {
    registry
        .register_recordable(&crate::recordable!(psi))
        .register_recordable(&crate::recordable!(auc))
        .register_recordable(&crate::recordable!(gini));
}

/// How PSI buckets are derived from the first sample.
#[derive(Clone, Debug, PartialEq)]
pub enum PsiBuckets {
    /// `n` equal-width bins over the range of `a`.
    Bins(usize),
    /// `n` buckets at the quantiles of `a`.
    Quantiles(usize),
    /// Explicit edges, outermost edges included.
    Edges(Vec<f64>),
}

impl Default for PsiBuckets {
    fn default() -> Self {
        PsiBuckets::Bins(10)
    }
}

/// PSI value with the per-bucket figures it was summed from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PsiBreakdown {
    /// Sum of all summands, finite and non-finite.
    pub value: f64,
    /// Bucket edges, widened to cover both samples.
    pub bin_edges: Vec<f64>,
    /// Share of the first sample in each finite bucket.
    pub frequency_a: Vec<f64>,
    /// Share of the second sample in each finite bucket.
    pub frequency_b: Vec<f64>,
    /// One summand per bucket, excluding the non-finite buckets.
    pub summands: Vec<f64>,
    /// Summands of the missing, `-inf` and `+inf` buckets.
    pub non_finite: [f64; 3],
}

/// One PSI summand; empty buckets count as `0.0001`.
fn psi_term(a: f64, b: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    let a = if a == 0.0 { PSI_EMPTY_BUCKET } else { a };
    let b = if b == 0.0 { PSI_EMPTY_BUCKET } else { b };
    (a - b) * (a / b).ln()
}

fn share(values: &[f64], keep: fn(f64) -> bool, len: f64) -> f64 {
    values.iter().filter(|v| keep(**v)).count() as f64 / len
}

/// Population stability index of `b` against `a`.
///
/// Missing values and infinities form their own buckets. The outer edges are
/// stretched to cover both samples; the last bucket is closed on the right.
/// `NaN` when either sample has no finite value.
pub fn psi_numerical(a: &[f64], b: &[f64], buckets: &PsiBuckets) -> PsiBreakdown {
    let clean_a: Vec<f64> = a.iter().copied().filter(|v| v.is_finite()).collect();
    let clean_b: Vec<f64> = b.iter().copied().filter(|v| v.is_finite()).collect();
    if clean_a.is_empty() || clean_b.is_empty() {
        return PsiBreakdown {
            value: f64::NAN,
            ..PsiBreakdown::default()
        };
    }
    let len_a = a.len().max(1) as f64;
    let len_b = b.len().max(1) as f64;
    let categories: [fn(f64) -> bool; 3] = [
        f64::is_nan,
        |v| v == f64::NEG_INFINITY,
        |v| v == f64::INFINITY,
    ];
    let non_finite =
        categories.map(|keep| psi_term(share(a, keep, len_a), share(b, keep, len_b)));
    let total_non_finite: f64 = non_finite.iter().sum();

    let (min_a, max_a) = bounds(&clean_a);
    let (min_b, max_b) = bounds(&clean_b);
    let mut edges = match buckets {
        PsiBuckets::Edges(edges) => edges.clone(),
        PsiBuckets::Bins(count) => linspace(min_a, max_a, (*count).max(1) + 1),
        PsiBuckets::Quantiles(count) => {
            let mut sorted = clean_a.clone();
            sorted.sort_by(f64::total_cmp);
            let count = (*count).max(1);
            let mut edges: Vec<f64> = (0..=count)
                .map(|step| percentile(&sorted, step as f64 / count as f64))
                .collect();
            edges.dedup();
            edges
        }
    };
    if edges.len() < 2 {
        return PsiBreakdown {
            value: total_non_finite,
            bin_edges: edges,
            non_finite,
            ..PsiBreakdown::default()
        };
    }
    let last = edges.len() - 1;
    edges[0] = min_a.min(min_b);
    edges[last] = max_a.max(max_b);

    let frequency_a: Vec<f64> = histogram(&clean_a, &edges)
        .into_iter()
        .map(|count| count as f64 / len_a)
        .collect();
    let frequency_b: Vec<f64> = histogram(&clean_b, &edges)
        .into_iter()
        .map(|count| count as f64 / len_b)
        .collect();
    let summands: Vec<f64> = frequency_a
        .iter()
        .zip(&frequency_b)
        .map(|(a, b)| psi_term(*a, *b))
        .collect();
    PsiBreakdown {
        value: summands.iter().sum::<f64>() + total_non_finite,
        bin_edges: edges,
        frequency_a,
        frequency_b,
        summands,
        non_finite,
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    if points < 2 {
        return vec![start];
    }
    let step = (end - start) / (points - 1) as f64;
    (0..points).map(|idx| start + step * idx as f64).collect()
}

/// Linear-interpolated percentile of sorted values, `q` in `[0, 1]`.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Counts per `[e_i, e_i+1)` bucket, the last bucket closed.
fn histogram(values: &[f64], edges: &[f64]) -> Vec<usize> {
    let buckets = edges.len() - 1;
    let mut counts = vec![0; buckets];
    let (low, high) = (edges[0], edges[buckets]);
    for value in values.iter().copied().filter(|v| *v >= low && *v <= high) {
        let idx = edges
            .partition_point(|edge| *edge <= value)
            .saturating_sub(1);
        counts[idx.min(buckets - 1)] += 1;
    }
    counts
}

/// Area under the ROC curve via the Mann-Whitney U statistic, with its
/// estimated standard deviation.
///
/// A lower rating means a higher risk: a perfect model rates every positive
/// outcome below every negative one. `NaN` for both when either outcome class
/// is empty.
pub fn auc_value(ratings: &[f64], outcomes: &[f64]) -> (f64, f64) {
    let (positives, negatives): (Vec<(f64, f64)>, Vec<(f64, f64)>) = ratings
        .iter()
        .copied()
        .zip(outcomes.iter().copied())
        .partition(|(_, outcome)| *outcome == 1.0);
    if positives.is_empty() || negatives.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let (n_true, n_false) = (positives.len() as f64, negatives.len() as f64);
    // Count of `others` on the expected side of `rating`, ties counting half.
    let placement = |rating: f64, others: &[(f64, f64)], below: bool| -> f64 {
        others
            .iter()
            .map(|(other, _)| {
                if rating == *other {
                    0.5
                } else if (rating < *other) == below {
                    1.0
                } else {
                    0.0
                }
            })
            .sum()
    };
    let v_10: Vec<f64> = positives
        .iter()
        .map(|(rating, _)| placement(*rating, &negatives, true))
        .collect();
    let v_01: Vec<f64> = negatives
        .iter()
        .map(|(rating, _)| placement(*rating, &positives, false))
        .collect();

    let u: f64 = v_10.iter().sum();
    let deviation = (sample_variance(v_10.iter().map(|v| v / n_false)) / n_true
        + sample_variance(v_01.iter().map(|v| v / n_true)) / n_false)
        .sqrt();
    (u / (n_true * n_false), deviation)
}

fn sample_variance(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Cumulative accuracy profile of a model and of the perfect model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapCurve {
    /// Share of the population, from 0 to 1.
    pub x: Vec<f64>,
    /// Share of positives captured by the model ordering.
    pub model: Vec<f64>,
    /// Share of positives captured by a perfect ordering.
    pub perfect: Vec<f64>,
}

/// Gini coefficient (accuracy ratio) of `predictions` against binary
/// `outcomes`, with the CAP curves it was computed from.
///
/// `NaN` when there are no positive outcomes or the perfect model has no
/// area over the random one.
pub fn gini_value(predictions: &[f64], outcomes: &[f64]) -> (f64, CapCurve) {
    let mut pairs: Vec<(f64, f64)> = predictions
        .iter()
        .copied()
        .zip(outcomes.iter().copied())
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.total_cmp(&a.1)));
    let positives = pairs.iter().filter(|(_, outcome)| *outcome == 1.0).count();
    if positives == 0 {
        return (f64::NAN, CapCurve::default());
    }

    let total = positives as f64;
    let mut model = Vec::with_capacity(pairs.len() + 1);
    model.push(0.0);
    let mut hits = 0.0;
    for (_, outcome) in &pairs {
        if *outcome == 1.0 {
            hits += 1.0;
        }
        model.push(hits / total);
    }
    let points = model.len();
    let perfect: Vec<f64> = (0..points)
        .map(|idx| if idx < positives { idx as f64 / total } else { 1.0 })
        .collect();
    let x = linspace(0.0, 1.0, points);

    // Trapezoidal area above the diagonal; both curves start at 0 and end at 1.
    let dx = 1.0 / points as f64;
    let area = |curve: &[f64]| curve[1..points - 1].iter().sum::<f64>() * dx + 0.5 * dx - 0.5;
    let area_perfect = area(&perfect);
    let value = if area_perfect == 0.0 {
        f64::NAN
    } else {
        area(&model) / area_perfect
    };
    (value, CapCurve { x, model, perfect })
}

/// ROC curve points (false positive rate, true positive rate), highest
/// prediction first.
fn roc_points(predictions: &[f64], outcomes: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut pairs: Vec<(f64, f64)> = predictions
        .iter()
        .copied()
        .zip(outcomes.iter().copied())
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    let positives = pairs.iter().filter(|(_, outcome)| *outcome == 1.0).count();
    let negatives = pairs.len() - positives;
    let (positives, negatives) = (positives.max(1) as f64, negatives.max(1) as f64);
    let (mut fpr, mut tpr) = (vec![0.0], vec![0.0]);
    let (mut false_hits, mut true_hits) = (0.0, 0.0);
    for (_, outcome) in pairs {
        if outcome == 1.0 {
            true_hits += 1.0;
        } else {
            false_hits += 1.0;
        }
        fpr.push(false_hits / negatives);
        tpr.push(true_hits / positives);
    }
    (fpr, tpr)
}

/// Amber and red limits at `first` and `first + 1`, or by keyword.
fn limits(args: &CallArgs, first: usize, defaults: (f64, f64)) -> (f64, f64) {
    let amber = args
        .get(first, "amber")
        .and_then(Arg::as_f64)
        .unwrap_or(defaults.0);
    let red = args
        .get(first + 1, "red")
        .and_then(Arg::as_f64)
        .unwrap_or(defaults.1);
    (amber, red)
}

fn bucket_spec(args: &CallArgs) -> Result<PsiBuckets, ValidationError> {
    let quantiles = args.text(5, "bucket_type") == Some("quantiles");
    let Some(arg) = args.get(4, "buckets") else {
        return Ok(if quantiles {
            PsiBuckets::Quantiles(10)
        } else {
            PsiBuckets::default()
        });
    };
    if let Some(count) = arg.as_i64() {
        let count = usize::try_from(count).map_err(|_| {
            ValidationError::invalid_argument("psi", "bucket count must be positive")
        })?;
        return Ok(if quantiles {
            PsiBuckets::Quantiles(count)
        } else {
            PsiBuckets::Bins(count)
        });
    }
    arg.to_f64_vec().map(PsiBuckets::Edges).ok_or_else(|| {
        ValidationError::invalid_argument(
            "psi",
            format!(
                "buckets must be a count or a list of edges, got {}",
                arg.kind_name()
            ),
        )
    })
}

/// Recordable PSI of `b` against `a`.
///
/// Arguments: `a`, `b`, optional `amber`/`red` limits (default 0.1 / 0.25),
/// `buckets` (count or edges, default 10) and `bucket_type` (`bins` or
/// `quantiles`).
pub fn psi(args: &CallArgs) -> Result<Arg, ValidationError> {
    let a = args.require_vector("psi", 0, "a")?;
    let b = args.require_vector("psi", 1, "b")?;
    let (amber, red) = limits(args, 2, PSI_LIMITS);
    let breakdown = psi_numerical(&a, &b, &bucket_spec(args)?);
    debug!(
        value = breakdown.value,
        samples_a = a.len(),
        samples_b = b.len(),
        "computed psi"
    );
    if breakdown.value.is_nan() {
        return Ok(Arg::Result(ScalarResult::new("PSI", f64::NAN).into()));
    }

    let result = ScalarRagResult::new("PSI", breakdown.value, amber, red);
    result
        .add_output("bin_edges", Array1::from(breakdown.bin_edges.clone()))
        .add_output(
            "relative_frequency_a",
            Array1::from(breakdown.frequency_a.clone()),
        )
        .add_output(
            "relative_frequency_b",
            Array1::from(breakdown.frequency_b.clone()),
        )
        .add_output("psi_summands", Array1::from(breakdown.summands.clone()))
        .add_lazy("histogram", move || {
            let buckets: Vec<f64> = (0..breakdown.summands.len())
                .map(|idx| idx as f64)
                .collect();
            OutputValue::Figure(
                Figure::new(format!("PSI = {:.4}", breakdown.value))
                    .with_trace("a", buckets.clone(), breakdown.frequency_a)
                    .with_trace("b", buckets.clone(), breakdown.frequency_b)
                    .with_trace("summands", buckets, breakdown.summands),
            )
        });
    Ok(Arg::Result(result.into()))
}

/// Finite pairs of two equally long vectors.
fn finite_pairs(function: &str, args: &CallArgs) -> Result<(Vec<f64>, Vec<f64>), ValidationError> {
    let predictions = args.require_vector(function, 0, "predictions")?;
    let outcomes = args.require_vector(function, 1, "outcomes")?;
    if predictions.len() != outcomes.len() {
        return Err(ValidationError::invalid_argument(
            function,
            format!(
                "predictions and outcomes differ in length ({} vs {})",
                predictions.len(),
                outcomes.len()
            ),
        ));
    }
    Ok(predictions
        .into_iter()
        .zip(outcomes)
        .filter(|(prediction, outcome)| prediction.is_finite() && outcome.is_finite())
        .unzip())
}

/// Recordable AUC of `predictions` against binary `outcomes`; a higher
/// prediction means a higher risk.
pub fn auc(args: &CallArgs) -> Result<Arg, ValidationError> {
    let (predictions, outcomes) = finite_pairs("auc", args)?;
    let (amber, red) = limits(args, 2, AUC_LIMITS);
    let ratings: Vec<f64> = predictions.iter().map(|prediction| -prediction).collect();
    let (value, deviation) = auc_value(&ratings, &outcomes);
    debug!(value, observations = predictions.len(), "computed auc");
    if value.is_nan() {
        return Ok(Arg::Result(ScalarResult::new("AUC", f64::NAN).into()));
    }

    let result = ScalarRagResult::new("AUC", value, amber, red);
    let (fpr, tpr) = roc_points(&predictions, &outcomes);
    result
        .add_output("std_dev", deviation)
        .add_output("predictions", Array1::from(predictions))
        .add_output("outcomes", Array1::from(outcomes))
        .add_lazy("roc_curve", move || {
            OutputValue::Figure(
                Figure::new(format!("ROC curve (AUC = {value:.4})"))
                    .with_trace("model", fpr.clone(), tpr)
                    .with_trace("random", fpr.clone(), fpr),
            )
        });
    Ok(Arg::Result(result.into()))
}

/// Recordable Gini of `predictions` against binary `outcomes`.
pub fn gini(args: &CallArgs) -> Result<Arg, ValidationError> {
    let (predictions, outcomes) = finite_pairs("gini", args)?;
    let (amber, red) = limits(args, 2, GINI_LIMITS);
    let (value, curve) = gini_value(&predictions, &outcomes);
    debug!(value, observations = predictions.len(), "computed gini");
    if value.is_nan() {
        return Ok(Arg::Result(ScalarResult::new("GINI", f64::NAN).into()));
    }

    let result = ScalarRagResult::new("GINI", value, amber, red);
    result
        .add_output("x_axis", Array1::from(curve.x.clone()))
        .add_output("y_axis_model", Array1::from(curve.model.clone()))
        .add_output("y_axis_perfect", Array1::from(curve.perfect.clone()))
        .add_lazy("cap_curve", move || {
            OutputValue::Figure(
                Figure::new(format!("CAP curve (Gini = {value:.4})"))
                    .with_trace("model", curve.x.clone(), curve.model)
                    .with_trace("perfect", curve.x, curve.perfect),
            )
        });
    Ok(Arg::Result(result.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputType;
    use crate::result::RagColor;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn list(values: &[f64]) -> Arg {
        Arg::List(values.iter().copied().map(Arg::Number).collect())
    }

    #[test]
    fn identical_samples_are_stable() {
        let sample: Vec<f64> = (0..100).map(f64::from).collect();
        let breakdown = psi_numerical(&sample, &sample, &PsiBuckets::Bins(5));
        assert!(close(breakdown.value, 0.0));
        assert_eq!(breakdown.bin_edges.len(), 6);
        assert!(close(breakdown.frequency_a.iter().sum(), 1.0));
    }

    #[test]
    fn shifted_samples_drift() {
        let a: Vec<f64> = (0..100).map(f64::from).collect();
        let b: Vec<f64> = (50..150).map(f64::from).collect();
        assert!(psi_numerical(&a, &b, &PsiBuckets::Bins(5)).value > PSI_LIMITS.1);
        assert!(psi_numerical(&a, &b, &PsiBuckets::Quantiles(4)).value > PSI_LIMITS.1);
    }

    #[test]
    fn missing_values_form_their_own_bucket() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 2.0, f64::NAN, f64::NAN];
        let breakdown = psi_numerical(&a, &b, &PsiBuckets::Bins(2));
        assert!(breakdown.non_finite[0] > 0.0);
        assert_eq!(breakdown.non_finite[1], 0.0);
    }

    #[test]
    fn degenerate_psi_is_a_nan_scalar() {
        assert!(psi_numerical(&[], &[1.0], &PsiBuckets::Bins(5)).value.is_nan());
        let args = CallArgs::new().with_arg(list(&[])).with_arg(list(&[1.0]));
        let result = psi(&args).unwrap().into_result("psi").unwrap();
        assert!(result.value("value").and_then(|v| v.as_f64()).unwrap().is_nan());
        assert!(!result.contains("color"));
    }

    #[test]
    fn psi_result_is_rag_classified() {
        let a: Vec<f64> = (0..100).map(f64::from).collect();
        let b: Vec<f64> = (50..150).map(f64::from).collect();
        let args = CallArgs::new()
            .with_arg(list(&a))
            .with_arg(list(&b))
            .with_kwarg("buckets", 5);
        let result = psi(&args).unwrap().into_result("psi").unwrap();
        let rag = ScalarRagResult::try_from(result).unwrap();
        assert_eq!(rag.rag_color(), Some(RagColor::Red));
        assert_eq!(rag.get("histogram").unwrap().peek_type(), OutputType::Unresolved);
        assert_eq!(rag.get("bin_edges").unwrap().output_type(), OutputType::Vector);
    }

    #[test]
    fn histogram_closes_the_last_bucket() {
        assert_eq!(histogram(&[0.0, 1.0, 2.0, 2.0], &[0.0, 1.0, 2.0]), vec![1, 3]);
    }

    #[test]
    fn perfect_ranking_scores_one() {
        let predictions = [0.9, 0.8, 0.3, 0.1];
        let outcomes = [1.0, 1.0, 0.0, 0.0];
        let (value, curve) = gini_value(&predictions, &outcomes);
        assert!(close(value, 1.0));
        assert_eq!(curve.model.len(), 5);
        let (auc, _) = auc_value(&[1.0, 2.0, 3.0, 4.0], &outcomes);
        assert!(close(auc, 1.0));
    }

    #[test]
    fn ties_count_half() {
        let (auc, _) = auc_value(&[1.0, 1.0], &[1.0, 0.0]);
        assert!(close(auc, 0.5));
    }

    #[test]
    fn single_class_outcomes_are_nan() {
        assert!(gini_value(&[0.1, 0.2], &[0.0, 0.0]).0.is_nan());
        assert!(auc_value(&[0.1, 0.2], &[1.0, 1.0]).0.is_nan());
    }

    #[test]
    fn higher_predictions_for_defaults_give_a_high_auc() {
        let args = CallArgs::new()
            .with_arg(list(&[0.9, 0.7, 0.4, 0.2, 0.1]))
            .with_arg(list(&[1.0, 1.0, 0.0, 0.0, f64::NAN]));
        let result = auc(&args).unwrap().into_result("auc").unwrap();
        assert_eq!(result.value("value").and_then(|v| v.as_f64()), Some(1.0));
        assert!(result.contains("std_dev"));
        let roc = result.get("roc_curve").unwrap();
        assert_eq!(roc.peek_type(), OutputType::Unresolved);
        assert_eq!(roc.output_type(), OutputType::Figure);
    }

    #[test]
    fn gini_figure_is_lazy() {
        let outcomes = Arg::List(vec![
            Arg::Integer(1),
            Arg::Integer(1),
            Arg::Integer(0),
            Arg::Integer(0),
        ]);
        let args = CallArgs::new()
            .with_arg(list(&[0.9, 0.8, 0.3, 0.1]))
            .with_arg(outcomes);
        let result = gini(&args).unwrap().into_result("gini").unwrap();
        let figure = result.get("cap_curve").unwrap();
        assert_eq!(figure.peek_type(), OutputType::Unresolved);
        assert_eq!(figure.output_type(), OutputType::Figure);
        let rag = ScalarRagResult::try_from(result).unwrap();
        assert_eq!(rag.rag_color(), Some(RagColor::Green));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let args = CallArgs::new().with_arg(list(&[0.9])).with_arg(list(&[]));
        assert!(matches!(
            auc(&args),
            Err(ValidationError::InvalidArgument { .. })
        ));
    }
}
