use chrono::{Datelike, NaiveDateTime};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::automation::declarative::Declarative;
use crate::errors::ValidationError;
use crate::segmentation::nominal::distinct_sorted;
use crate::segmentation::{BucketLabel, BucketRule, PreMap, SegmentationMap};
use crate::types::Document;
use crate::value::{Cell, Column, parse_time};

/// Calendar period a timestamp is mapped to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemporalFrequency {
    /// `2016`
    Yearly,
    /// `2016-01`
    Monthly,
    /// `2016 Q1`
    Quarterly,
    /// `January`, regardless of year.
    Month,
    /// `Q1`, regardless of year.
    Quarter,
}

impl TemporalFrequency {
    /// Lower-case name used in declarations.
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalFrequency::Yearly => "yearly",
            TemporalFrequency::Monthly => "monthly",
            TemporalFrequency::Quarterly => "quarterly",
            TemporalFrequency::Month => "month",
            TemporalFrequency::Quarter => "quarter",
        }
    }

    /// Period label of a cell. Missing cells stay missing; text must parse as a timestamp.
    pub fn label(&self, cell: &Cell) -> Result<Cell, ValidationError> {
        match cell {
            Cell::Time(time) => Ok(self.period(time)),
            Cell::Text(text) => parse_time(text)
                .map(|time| self.period(&time))
                .ok_or_else(|| {
                    ValidationError::Segmentation(format!("cannot parse {text:?} as a timestamp"))
                }),
            other if other.is_missing() => Ok(Cell::Missing),
            other => Err(ValidationError::Segmentation(format!(
                "temporal segmentation expects timestamps, got {other}"
            ))),
        }
    }

    fn period(&self, time: &NaiveDateTime) -> Cell {
        let quarter = time.month0() / 3 + 1;
        match self {
            TemporalFrequency::Yearly => Cell::Integer(i64::from(time.year())),
            TemporalFrequency::Monthly => Cell::Text(time.format("%Y-%m").to_string()),
            TemporalFrequency::Quarterly => Cell::Text(format!("{} Q{quarter}", time.year())),
            TemporalFrequency::Month => Cell::Text(time.format("%B").to_string()),
            TemporalFrequency::Quarter => Cell::Text(format!("Q{quarter}")),
        }
    }
}

impl FromStr for TemporalFrequency {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let frequency = match value.to_lowercase().as_str() {
            "yearly" => TemporalFrequency::Yearly,
            "monthly" => TemporalFrequency::Monthly,
            "quarterly" => TemporalFrequency::Quarterly,
            "month" => TemporalFrequency::Month,
            "quarter" => TemporalFrequency::Quarter,
            _ => {
                return Err(ValidationError::Segmentation(format!(
                    "unknown temporal frequency {value}"
                )));
            }
        };
        Ok(frequency)
    }
}

impl fmt::Display for TemporalFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segmentation by calendar period.
///
/// Buckets depend on which periods are present, so results are never cached.
#[derive(Clone, Debug, PartialEq)]
pub struct Temporal {
    frequency: TemporalFrequency,
}

impl Temporal {
    /// Segment by `frequency`.
    pub fn new(frequency: TemporalFrequency) -> Self {
        Self { frequency }
    }

    /// Configured frequency.
    pub fn frequency(&self) -> TemporalFrequency {
        self.frequency
    }

    pub(crate) fn compute_map(&self, column: &Column) -> Result<SegmentationMap, ValidationError> {
        let pre_map = PreMap::Period(self.frequency);
        let periods = pre_map.apply(column.cells().collect())?;
        let map = distinct_sorted(periods.into_iter())
            .into_iter()
            .fold(SegmentationMap::with_pre_map(vec![pre_map]), |map, period| {
                map.bucket(BucketLabel::Value(period.clone()), BucketRule::Equals(period))
            });
        Ok(map)
    }
}

impl Declarative for Temporal {
    const CLASS: &'static str = "Temporal";

    fn to_declaration(&self) -> Result<Document, ValidationError> {
        Ok(json!({ "frequency": self.frequency.as_str() }))
    }

    fn from_declaration(document: &Document) -> Result<Self, ValidationError> {
        let frequency = document
            .get("frequency")
            .and_then(Document::as_str)
            .ok_or_else(|| {
                ValidationError::MalformedDocument("Temporal requires a frequency".to_string())
            })?;
        Ok(Self::new(frequency.parse()?))
    }
}
