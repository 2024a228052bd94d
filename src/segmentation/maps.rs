use tracing::warn;

use crate::errors::ValidationError;
use crate::segmentation::{BucketLabel, NanHandling, Partition, TemporalFrequency, TimeUnit};
use crate::value::{Cell, Column};

/// Membership predicate of one bucket, evaluated on pre-mapped values.
#[derive(Clone, Debug, PartialEq)]
pub enum BucketRule {
    /// Value equals the cell.
    Equals(Cell),
    /// Value equals any of the cells.
    OneOf(Vec<Cell>),
    /// Numeric value in `[lower, upper)`.
    Range { lower: f64, upper: f64 },
}

impl BucketRule {
    /// True when `value` belongs to the bucket.
    pub fn matches(&self, value: &Cell) -> bool {
        match self {
            BucketRule::Equals(expected) => !value.is_missing() && expected.loosely_eq(value),
            BucketRule::OneOf(expected) => {
                !value.is_missing() && expected.iter().any(|cell| cell.loosely_eq(value))
            }
            BucketRule::Range { lower, upper } => value
                .as_f64()
                .is_some_and(|v| *lower <= v && v < *upper),
        }
    }
}

/// Transform applied to column values before bucket rules are evaluated.
#[derive(Clone, Debug, PartialEq)]
pub enum PreMap {
    /// Replace missing numeric values.
    FillMissing(NanHandling),
    /// Convert timestamps to integer counts of a time unit since the epoch.
    TimeUnits(TimeUnit),
    /// Convert timestamps to calendar-period labels.
    Period(TemporalFrequency),
}

impl PreMap {
    /// Apply the transform to a full column of values.
    pub fn apply(&self, values: Vec<Cell>) -> Result<Vec<Cell>, ValidationError> {
        match self {
            PreMap::FillMissing(handling) => Ok(handling.fill(values)),
            PreMap::TimeUnits(unit) => values
                .into_iter()
                .map(|cell| match cell {
                    Cell::Time(time) => Ok(Cell::Number(unit.to_units(&time) as f64)),
                    Cell::Missing => Ok(Cell::Number(f64::NAN)),
                    other if other.is_missing() => Ok(Cell::Number(f64::NAN)),
                    other => Err(ValidationError::Segmentation(format!(
                        "expected temporal values, got {other}"
                    ))),
                })
                .collect(),
            PreMap::Period(frequency) => values
                .into_iter()
                .map(|cell| frequency.label(&cell))
                .collect(),
        }
    }
}

/// Maps observations into predefined buckets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentationMap {
    pre_map: Vec<PreMap>,
    buckets: Vec<(BucketLabel, BucketRule)>,
}

impl SegmentationMap {
    /// Empty map with the given pre-map transforms.
    pub fn with_pre_map(pre_map: Vec<PreMap>) -> Self {
        Self {
            pre_map,
            buckets: Vec::new(),
        }
    }

    /// Append a bucket.
    pub fn bucket(mut self, label: BucketLabel, rule: BucketRule) -> Self {
        self.buckets.push((label, rule));
        self
    }

    /// Buckets in order.
    pub fn buckets(&self) -> &[(BucketLabel, BucketRule)] {
        &self.buckets
    }

    /// Pre-map transforms in application order.
    pub fn pre_map(&self) -> &[PreMap] {
        &self.pre_map
    }

    /// Assign every row of `column` to the buckets whose rule it satisfies.
    ///
    /// Buckets are emitted even when empty. Rows matching no bucket are left out.
    pub fn segment(&self, column: &Column) -> Result<Partition, ValidationError> {
        let mut values: Vec<Cell> = column.cells().collect();
        for transform in &self.pre_map {
            values = transform.apply(values)?;
        }
        let mut covered = vec![false; values.len()];
        let mut partition = Partition::default();
        for (label, rule) in &self.buckets {
            let rows: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, value)| rule.matches(value))
                .map(|(idx, _)| idx)
                .collect();
            for &row in &rows {
                covered[row] = true;
            }
            partition.push(label.clone(), rows);
        }
        let uncovered = covered.iter().filter(|hit| !**hit).count();
        if uncovered > 0 {
            warn!(uncovered, buckets = self.buckets.len(), "rows not covered by any segment");
        }
        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rule_is_half_open() {
        let rule = BucketRule::Range {
            lower: 1.0,
            upper: 2.0,
        };
        assert!(rule.matches(&Cell::Integer(1)));
        assert!(rule.matches(&Cell::Number(1.5)));
        assert!(!rule.matches(&Cell::Number(2.0)));
        assert!(!rule.matches(&Cell::Number(f64::NAN)));
    }

    #[test]
    fn map_emits_empty_buckets_and_skips_uncovered_rows() {
        let map = SegmentationMap::default()
            .bucket(BucketLabel::from("a"), BucketRule::Equals(Cell::from("a")))
            .bucket(BucketLabel::from("z"), BucketRule::Equals(Cell::from("z")));
        let column = Column::Text(vec!["a".into(), "b".into(), "a".into()]);
        let partition = map.segment(&column).unwrap();
        assert_eq!(partition.len(), 2);
        assert_eq!(&*partition.indices()[0], &[0, 2]);
        assert!(partition.indices()[1].is_empty());
    }

    #[test]
    fn fill_missing_runs_before_rules() {
        let map = SegmentationMap::with_pre_map(vec![PreMap::FillMissing(NanHandling::Max)])
            .bucket(
                BucketLabel::from("high"),
                BucketRule::Range {
                    lower: 5.0,
                    upper: f64::INFINITY,
                },
            );
        let column = Column::Numeric(vec![1.0, f64::NAN, 7.0]);
        let partition = map.segment(&column).unwrap();
        assert_eq!(&*partition.indices()[0], &[1, 2]);
    }
}
