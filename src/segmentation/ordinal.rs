use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::automation::declarative::Declarative;
use crate::constants::segmentation::EXACT_BINNING_MAX_DISTINCT;
use crate::errors::ValidationError;
use crate::segmentation::{BucketLabel, BucketRule, PreMap, SegmentationMap};
use crate::types::Document;
use crate::value::{Cell, Column, parse_time};

/// Strategy for computing bin edges from a bin count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinningMethod {
    /// Equally wide bins between the minimum and the maximum.
    #[default]
    Distance,
    /// Edges spaced evenly in log10 space between `10^min` and `10^max`.
    LogDistance,
    /// Bins holding as close to equally many observations as possible.
    Observations,
}

/// Replacement policy for missing numeric values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanHandling {
    /// Replace with the smallest present value.
    #[default]
    Min,
    /// Replace with the largest present value.
    Max,
    /// Replace with a constant.
    #[serde(untagged)]
    Value(f64),
}

impl NanHandling {
    /// Fill missing numeric cells; non-numeric cells pass through.
    ///
    /// When every value is missing the `min`/`max` policies have nothing to
    /// fill with and leave the values untouched.
    pub fn fill(&self, values: Vec<Cell>) -> Vec<Cell> {
        let present = values
            .iter()
            .filter(|cell| !cell.is_missing())
            .filter_map(Cell::as_f64);
        let replacement = match self {
            NanHandling::Min => present.reduce(f64::min),
            NanHandling::Max => present.reduce(f64::max),
            NanHandling::Value(value) => Some(*value),
        };
        let Some(replacement) = replacement else {
            return values;
        };
        values
            .into_iter()
            .map(|cell| match cell {
                Cell::Missing => Cell::Number(replacement),
                Cell::Number(value) if value.is_nan() => Cell::Number(replacement),
                other => other,
            })
            .collect()
    }
}

/// Bin configuration: a count to compute edges from, or explicit interior edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinSpec {
    /// Number of bins to compute.
    Count(usize),
    /// Sorted interior edges.
    Edges(Vec<f64>),
}

/// Ordinal segmentation of a numeric column into half-open intervals.
///
/// Interior edges `[e1, .., en]` produce the buckets `[-inf, e1)`, ..,
/// `[en, inf)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ByBins {
    bins: BinSpec,
    #[serde(default)]
    method: BinningMethod,
    #[serde(default)]
    nan_handling: NanHandling,
}

impl ByBins {
    /// Compute `count` bins with the distance method.
    pub fn count(count: usize) -> Self {
        Self {
            bins: BinSpec::Count(count),
            method: BinningMethod::default(),
            nan_handling: NanHandling::default(),
        }
    }

    /// Use explicit interior edges.
    pub fn edges(edges: Vec<f64>) -> Self {
        Self {
            bins: BinSpec::Edges(edges),
            method: BinningMethod::default(),
            nan_handling: NanHandling::default(),
        }
    }

    /// Choose how computed edges are placed.
    pub fn with_method(mut self, method: BinningMethod) -> Self {
        self.method = method;
        self
    }

    /// Choose where missing values go.
    pub fn with_nan_handling(mut self, nan_handling: NanHandling) -> Self {
        self.nan_handling = nan_handling;
        self
    }

    /// Configured bins.
    pub fn bins(&self) -> &BinSpec {
        &self.bins
    }

    /// Edge placement method.
    pub fn method(&self) -> BinningMethod {
        self.method
    }

    /// Missing-value handling.
    pub fn nan_handling(&self) -> NanHandling {
        self.nan_handling
    }

    pub(crate) fn compute_map(
        &self,
        column: &Column,
    ) -> Result<(ByBins, SegmentationMap), ValidationError> {
        if column.as_f64().is_none() {
            return Err(ValidationError::Segmentation(format!(
                "ByBins requires a numeric column, got {}",
                column.kind()
            )));
        }
        let edges = match &self.bins {
            BinSpec::Edges(edges) => edges.clone(),
            BinSpec::Count(count) => {
                let filled = self.nan_handling.fill(column.cells().collect());
                let values: Vec<f64> = filled.iter().filter_map(Cell::as_f64).collect();
                ordinal_bins(&values, *count, self.method)?
            }
        };
        let map = interval_buckets(&edges)
            .into_iter()
            .fold(
                SegmentationMap::with_pre_map(vec![PreMap::FillMissing(self.nan_handling)]),
                |map, (lower, upper)| {
                    map.bucket(
                        BucketLabel::Value(Cell::Text(format!("[{lower}, {upper})"))),
                        BucketRule::Range { lower, upper },
                    )
                },
            );
        let resolved = ByBins {
            bins: BinSpec::Edges(edges),
            ..self.clone()
        };
        Ok((resolved, map))
    }
}

impl Declarative for ByBins {
    const CLASS: &'static str = "ByBins";

    fn to_declaration(&self) -> Result<Document, ValidationError> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_declaration(document: &Document) -> Result<Self, ValidationError> {
        Ok(serde_json::from_value(document.clone())?)
    }
}

/// Unit in which timestamps are counted for temporal binning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Calendar years.
    #[serde(rename = "Y")]
    Year,
    /// Calendar months.
    #[serde(rename = "M")]
    Month,
    /// Days.
    #[default]
    #[serde(rename = "D")]
    Day,
    /// Hours.
    #[serde(rename = "h")]
    Hour,
    /// Minutes.
    #[serde(rename = "m")]
    Minute,
    /// Seconds.
    #[serde(rename = "s")]
    Second,
}

impl TimeUnit {
    /// Whole units elapsed since 1970-01-01, rounded towards negative infinity.
    pub fn to_units(&self, time: &NaiveDateTime) -> i64 {
        let seconds = time.and_utc().timestamp();
        match self {
            TimeUnit::Year => i64::from(time.year()) - 1970,
            TimeUnit::Month => (i64::from(time.year()) - 1970) * 12 + i64::from(time.month0()),
            TimeUnit::Day => seconds.div_euclid(86_400),
            TimeUnit::Hour => seconds.div_euclid(3_600),
            TimeUnit::Minute => seconds.div_euclid(60),
            TimeUnit::Second => seconds,
        }
    }

    /// Start of the unit `units` after the epoch.
    pub fn from_units(&self, units: i64) -> Option<NaiveDateTime> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_time(NaiveTime::MIN);
        match self {
            TimeUnit::Year => {
                let year = i32::try_from(1970 + units).ok()?;
                Some(NaiveDate::from_ymd_opt(year, 1, 1)?.and_time(NaiveTime::MIN))
            }
            TimeUnit::Month => {
                let year = i32::try_from(1970 + units.div_euclid(12)).ok()?;
                let month = u32::try_from(units.rem_euclid(12) + 1).ok()?;
                Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_time(NaiveTime::MIN))
            }
            TimeUnit::Day => epoch.checked_add_signed(TimeDelta::try_days(units)?),
            TimeUnit::Hour => DateTime::from_timestamp(units.checked_mul(3_600)?, 0)
                .map(|time| time.naive_utc()),
            TimeUnit::Minute => DateTime::from_timestamp(units.checked_mul(60)?, 0)
                .map(|time| time.naive_utc()),
            TimeUnit::Second => DateTime::from_timestamp(units, 0).map(|time| time.naive_utc()),
        }
    }

    /// Render a timestamp at this unit's precision (`2016`, `2016-01`, `2016-01-31`, ...).
    pub fn format(&self, time: &NaiveDateTime) -> String {
        let pattern = match self {
            TimeUnit::Year => "%Y",
            TimeUnit::Month => "%Y-%m",
            TimeUnit::Day => "%Y-%m-%d",
            TimeUnit::Hour => "%Y-%m-%dT%H",
            TimeUnit::Minute => "%Y-%m-%dT%H:%M",
            TimeUnit::Second => "%Y-%m-%dT%H:%M:%S",
        };
        time.format(pattern).to_string()
    }

    /// Parse a timestamp written at this unit's precision or as a full date(-time),
    /// truncated to the start of its unit.
    pub fn parse(&self, text: &str) -> Result<NaiveDateTime, ValidationError> {
        let text = text.trim();
        let padded = match self {
            TimeUnit::Year => format!("{text}-01-01"),
            TimeUnit::Month => format!("{text}-01"),
            TimeUnit::Hour => format!("{text}:00:00"),
            TimeUnit::Minute => format!("{text}:00"),
            TimeUnit::Day | TimeUnit::Second => text.to_string(),
        };
        let parsed = parse_time(&padded)
            .or_else(|| parse_time(text))
            .ok_or_else(|| {
                ValidationError::Segmentation(format!("cannot parse {text:?} as a timestamp"))
            })?;
        self.truncate(&parsed)
    }

    fn truncate(&self, time: &NaiveDateTime) -> Result<NaiveDateTime, ValidationError> {
        self.from_units(self.to_units(time)).ok_or_else(|| {
            ValidationError::Segmentation(format!("timestamp {time} is out of range"))
        })
    }

    fn lowest(&self) -> String {
        match NaiveDate::from_ymd_opt(1, 1, 1) {
            Some(date) => self.format(&date.and_time(NaiveTime::MIN)),
            None => String::from("-inf"),
        }
    }

    fn highest(&self) -> String {
        match NaiveDate::from_ymd_opt(9999, 12, 31).and_then(|date| date.and_hms_opt(23, 59, 59)) {
            Some(time) => self.format(&time),
            None => String::from("inf"),
        }
    }
}

/// Temporal bin configuration: a count or explicit interior edges as timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemporalBinSpec {
    /// Number of bins to compute.
    Count(usize),
    /// Sorted interior edges, parseable as timestamps.
    Edges(Vec<String>),
}

/// Ordinal segmentation of a temporal column, binned in whole time units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemporalByBins {
    bins: TemporalBinSpec,
    #[serde(default)]
    time_unit: TimeUnit,
    #[serde(default)]
    method: BinningMethod,
    #[serde(default)]
    nan_handling: NanHandling,
}

impl TemporalByBins {
    /// Compute `count` bins counted in `time_unit`.
    pub fn count(count: usize, time_unit: TimeUnit) -> Self {
        Self {
            bins: TemporalBinSpec::Count(count),
            time_unit,
            method: BinningMethod::default(),
            nan_handling: NanHandling::default(),
        }
    }

    /// Use explicit interior edges.
    pub fn edges<S: Into<String>>(edges: Vec<S>, time_unit: TimeUnit) -> Self {
        Self {
            bins: TemporalBinSpec::Edges(edges.into_iter().map(Into::into).collect()),
            time_unit,
            method: BinningMethod::default(),
            nan_handling: NanHandling::default(),
        }
    }

    /// Choose how computed edges are placed.
    pub fn with_method(mut self, method: BinningMethod) -> Self {
        self.method = method;
        self
    }

    /// Choose where missing values go.
    pub fn with_nan_handling(mut self, nan_handling: NanHandling) -> Self {
        self.nan_handling = nan_handling;
        self
    }

    /// Configured bins.
    pub fn bins(&self) -> &TemporalBinSpec {
        &self.bins
    }

    /// Unit timestamps are counted in.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub(crate) fn compute_map(
        &self,
        column: &Column,
    ) -> Result<(TemporalByBins, SegmentationMap), ValidationError> {
        let pre_map = vec![
            PreMap::TimeUnits(self.time_unit),
            PreMap::FillMissing(self.nan_handling),
        ];
        let edge_times = match &self.bins {
            TemporalBinSpec::Edges(edges) => edges
                .iter()
                .map(|edge| self.time_unit.parse(edge))
                .collect::<Result<Vec<_>, _>>()?,
            TemporalBinSpec::Count(count) => {
                let mut units = column.cells().collect();
                for transform in &pre_map {
                    units = transform.apply(units)?;
                }
                let units: Vec<f64> = units.iter().filter_map(Cell::as_f64).collect();
                ordinal_bins(&units, *count, self.method)?
                    .into_iter()
                    .map(|edge| {
                        self.time_unit.from_units(edge.round() as i64).ok_or_else(|| {
                            ValidationError::Segmentation(format!("bin edge {edge} is out of range"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        let edge_labels: Vec<String> = edge_times
            .iter()
            .map(|time| self.time_unit.format(time))
            .collect();
        let edge_units: Vec<f64> = edge_times
            .iter()
            .map(|time| self.time_unit.to_units(time) as f64)
            .collect();

        let mut labels = Vec::with_capacity(edge_labels.len() + 2);
        labels.push(self.time_unit.lowest());
        labels.extend(edge_labels.iter().cloned());
        labels.push(self.time_unit.highest());

        let map = interval_buckets(&edge_units)
            .into_iter()
            .zip(labels.windows(2))
            .fold(
                SegmentationMap::with_pre_map(pre_map),
                |map, ((lower, upper), names)| {
                    map.bucket(
                        BucketLabel::Value(Cell::Text(format!("[{}, {})", names[0], names[1]))),
                        BucketRule::Range { lower, upper },
                    )
                },
            );
        let resolved = TemporalByBins {
            bins: TemporalBinSpec::Edges(edge_labels),
            ..self.clone()
        };
        Ok((resolved, map))
    }
}

impl Declarative for TemporalByBins {
    const CLASS: &'static str = "TemporalByBins";

    fn to_declaration(&self) -> Result<Document, ValidationError> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_declaration(document: &Document) -> Result<Self, ValidationError> {
        Ok(serde_json::from_value(document.clone())?)
    }
}

/// `(lower, upper)` pairs covering the real line, split at `edges`.
fn interval_buckets(edges: &[f64]) -> Vec<(f64, f64)> {
    let mut bounds = Vec::with_capacity(edges.len() + 2);
    bounds.push(f64::NEG_INFINITY);
    bounds.extend_from_slice(edges);
    bounds.push(f64::INFINITY);
    bounds.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Interior bin edges splitting `values` into `count` bins.
///
/// Missing (`NaN`) values are ignored. An empty input yields no edges.
pub fn ordinal_bins(
    values: &[f64],
    count: usize,
    method: BinningMethod,
) -> Result<Vec<f64>, ValidationError> {
    if count == 0 {
        return Err(ValidationError::Segmentation(
            "number of bins must be positive".to_string(),
        ));
    }
    let values: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Ok(Vec::new());
    };
    let interior = |i: usize| min + (max - min) * i as f64 / count as f64;
    Ok(match method {
        BinningMethod::Distance => (1..count).map(interior).collect(),
        BinningMethod::LogDistance => (1..count).map(|i| 10f64.powf(interior(i))).collect(),
        BinningMethod::Observations => equal_observation_bins(&values, count),
    })
}

/// Split points between distinct values so that bins hold close to `n / count`
/// observations each.
///
/// With no more distinct values than bins, every midpoint is a split. Up to
/// [`EXACT_BINNING_MAX_DISTINCT`] distinct values the split minimizing the
/// summed absolute deviation from `n / count` is searched exhaustively (ties
/// resolve to the earliest split positions); above that, each quantile cut is
/// snapped to the nearest gap between distinct values.
fn equal_observation_bins(values: &[f64], count: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut distinct: Vec<f64> = Vec::new();
    // prefix[i]: observations below the i-th distinct value.
    let mut prefix: Vec<usize> = Vec::new();
    for (seen, value) in sorted.into_iter().enumerate() {
        if distinct.last() != Some(&value) {
            distinct.push(value);
            prefix.push(seen);
        }
    }
    prefix.push(values.len());

    let midpoint = |gap: usize| 0.5 * distinct[gap - 1] + 0.5 * distinct[gap];
    if distinct.len() <= count {
        return (1..distinct.len()).map(midpoint).collect();
    }
    let gaps = if distinct.len() <= EXACT_BINNING_MAX_DISTINCT {
        exact_gaps(&prefix, count)
    } else {
        quantile_gaps(&prefix, count)
    };
    gaps.into_iter().map(midpoint).collect()
}

/// Optimal gaps by dynamic programming over `prefix` (cumulative counts per
/// distinct value, starting at 0). Runs in `O(count * u^2)`.
fn exact_gaps(prefix: &[usize], count: usize) -> Vec<usize> {
    let u = prefix.len() - 1;
    let target = prefix[u] as f64 / count as f64;
    let span_cost = |from: usize, to: usize| ((prefix[to] - prefix[from]) as f64 - target).abs();

    // cost[k][i]: best cost of putting the first i distinct values into k bins.
    let mut cost = vec![vec![f64::INFINITY; u + 1]; count + 1];
    let mut choice = vec![vec![0usize; u + 1]; count + 1];
    cost[0][0] = 0.0;
    for k in 1..=count {
        for i in k..=u {
            for j in (k - 1)..i {
                let candidate = cost[k - 1][j] + span_cost(j, i);
                if candidate < cost[k][i] {
                    cost[k][i] = candidate;
                    choice[k][i] = j;
                }
            }
        }
    }

    let mut gaps = Vec::with_capacity(count - 1);
    let mut end = u;
    for k in (2..=count).rev() {
        end = choice[k][end];
        gaps.push(end);
    }
    gaps.reverse();
    gaps
}

/// Gaps nearest to the `k / count` quantiles of the cumulative counts.
/// Cuts landing on the same gap are merged.
fn quantile_gaps(prefix: &[usize], count: usize) -> Vec<usize> {
    let u = prefix.len() - 1;
    let total = prefix[u] as f64;
    let mut gaps: Vec<usize> = Vec::with_capacity(count - 1);
    for k in 1..count {
        let rank = total * k as f64 / count as f64;
        let upper = prefix
            .partition_point(|&seen| (seen as f64) < rank)
            .clamp(1, u - 1);
        let gap = if upper > 1 && rank - (prefix[upper - 1] as f64) < prefix[upper] as f64 - rank {
            upper - 1
        } else {
            upper
        };
        if gaps.last().is_none_or(|last| *last < gap) {
            gaps.push(gap);
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn distance_bins_split_the_range_evenly() {
        let edges = ordinal_bins(&[0.0, 10.0, 5.0, f64::NAN], 4, BinningMethod::Distance).unwrap();
        assert_eq!(edges, vec![2.5, 5.0, 7.5]);
        assert!(ordinal_bins(&[], 3, BinningMethod::Distance).unwrap().is_empty());
        assert!(ordinal_bins(&[1.0], 0, BinningMethod::Distance).is_err());
    }

    #[test]
    fn observation_bins_balance_counts() {
        let values = [1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0];
        let edges = ordinal_bins(&values, 2, BinningMethod::Observations).unwrap();
        assert_eq!(edges, vec![2.5]);
        let few = ordinal_bins(&[1.0, 3.0], 4, BinningMethod::Observations).unwrap();
        assert_eq!(few, vec![2.0]);
    }

    #[test]
    fn observation_bins_on_continuous_values_cut_at_quantiles() {
        let values: Vec<f64> = (0..20_000i32).rev().map(f64::from).collect();
        let edges = ordinal_bins(&values, 10, BinningMethod::Observations).unwrap();
        let expected: Vec<f64> = (1..10i32).map(|k| f64::from(2_000 * k) - 0.5).collect();
        assert_eq!(edges, expected);
    }

    #[test]
    fn observation_bins_merge_cuts_inside_a_dominant_value() {
        let mut values: Vec<f64> = (0..600i32).map(f64::from).collect();
        values.extend(std::iter::repeat_n(1000.0, 600));
        let edges = ordinal_bins(&values, 4, BinningMethod::Observations).unwrap();
        assert_eq!(edges, vec![299.5, 799.5]);
    }

    #[test]
    fn by_bins_labels_half_open_intervals() {
        let column = Column::Numeric(vec![0.1, 0.5, f64::NAN, 0.9]);
        let (resolved, map) = ByBins::edges(vec![0.3, 0.7]).compute_map(&column).unwrap();
        assert_eq!(resolved.bins(), &BinSpec::Edges(vec![0.3, 0.7]));
        let partition = map.segment(&column).unwrap();
        let labels: Vec<String> = partition.labels().iter().map(|l| l.to_string()).collect();
        assert_eq!(labels, vec!["[-inf, 0.3)", "[0.3, 0.7)", "[0.7, inf)"]);
        // the missing value is filled with the minimum (0.1)
        assert_eq!(&*partition.indices()[0], &[0, 2]);
        assert_eq!(&*partition.indices()[2], &[3]);
    }

    #[test]
    fn by_bins_declaration_round_trips() {
        let method = ByBins::count(3)
            .with_method(BinningMethod::Observations)
            .with_nan_handling(NanHandling::Value(-1.0));
        let document = method.to_declaration().unwrap();
        assert_eq!(document["method"], "observations");
        assert_eq!(document["nan_handling"], -1.0);
        assert_eq!(ByBins::from_declaration(&document).unwrap(), method);

        let named = ByBins::edges(vec![1.0]).with_nan_handling(NanHandling::Max);
        let document = named.to_declaration().unwrap();
        assert_eq!(document["nan_handling"], "max");
        assert_eq!(ByBins::from_declaration(&document).unwrap(), named);
    }

    #[test]
    fn time_units_round_trip_through_epoch_counts() {
        let time = day(2016, 3, 15);
        for unit in [TimeUnit::Year, TimeUnit::Month, TimeUnit::Day, TimeUnit::Hour] {
            let truncated = unit.from_units(unit.to_units(&time)).unwrap();
            assert!(truncated <= time);
        }
        assert_eq!(TimeUnit::Month.format(&time), "2016-03");
        assert_eq!(TimeUnit::Year.parse("2016").unwrap(), day(2016, 1, 1));
        assert_eq!(TimeUnit::Month.parse("2016-03-15").unwrap(), day(2016, 3, 1));
    }

    #[test]
    fn temporal_bins_label_with_unit_precision() {
        let column = Column::Temporal(vec![
            Some(day(2015, 6, 1)),
            Some(day(2016, 6, 1)),
            None,
            Some(day(2017, 6, 1)),
        ]);
        let method = TemporalByBins::edges(vec!["2016", "2017"], TimeUnit::Year);
        let (_, map) = method.compute_map(&column).unwrap();
        let partition = map.segment(&column).unwrap();
        let labels: Vec<String> = partition.labels().iter().map(|l| l.to_string()).collect();
        assert_eq!(labels, vec!["[0001, 2016)", "[2016, 2017)", "[2017, 9999)"]);
        assert_eq!(&*partition.indices()[0], &[0, 2]);
        assert_eq!(&*partition.indices()[2], &[3]);
    }
}
