//! Segmentation engine.
//!
//! A `SegmentationMethod` turns one column (or several, for composites) into a
//! `Partition`: ordered bucket labels with the ascending row indices that fall
//! into each bucket. `Dataset::segment` caches partitions per `(by, method)`;
//! `Segmentation` is the user-facing view over one cached partition.

use serde_json::json;
use std::fmt;
use std::sync::Arc;

use crate::constants::ids::METHOD_SEPARATOR;
use crate::dataset::{CachedPartition, Dataset};
use crate::errors::ValidationError;
use crate::types::{ColumnName, Document};
use crate::value::Cell;

/// Segmentation maps and pre-map transforms.
pub mod maps;
mod method;
/// Nominal segmentation.
pub mod nominal;
/// Ordinal and temporal binning.
pub mod ordinal;
/// Calendar-period segmentation.
pub mod temporal;

pub use maps::{BucketRule, PreMap, SegmentationMap};
pub use method::{CompositeSegmentation, SEGMENTATION_MODULE, SegmentationMethod};
pub use nominal::{ByGroup, GroupSpec};
pub use ordinal::{
    BinSpec, BinningMethod, ByBins, NanHandling, TemporalBinSpec, TemporalByBins, TimeUnit,
    ordinal_bins,
};
pub use temporal::{Temporal, TemporalFrequency};

/// Column (or columns, for composites) a segmentation is computed over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentBy {
    /// A single column.
    Column(ColumnName),
    /// Several columns, one per composite member.
    Columns(Vec<ColumnName>),
}

impl SegmentBy {
    /// Column names in member order.
    pub fn columns(&self) -> Vec<ColumnName> {
        match self {
            SegmentBy::Column(name) => vec![name.clone()],
            SegmentBy::Columns(names) => names.clone(),
        }
    }

    /// Document form: a string or a list of strings.
    pub fn to_document(&self) -> Document {
        match self {
            SegmentBy::Column(name) => json!(name),
            SegmentBy::Columns(names) => json!(names),
        }
    }

    /// Parse the document form.
    pub fn from_document(document: &Document) -> Result<Self, ValidationError> {
        match document {
            Document::String(name) => Ok(SegmentBy::Column(name.clone())),
            Document::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ValidationError::MalformedDocument(format!(
                            "segmentation key must be text, got {item}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(SegmentBy::Columns),
            other => Err(ValidationError::MalformedDocument(format!(
                "segmentation key must be text or a list, got {other}"
            ))),
        }
    }
}

impl fmt::Display for SegmentBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentBy::Column(name) => write!(f, "{name}"),
            SegmentBy::Columns(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

impl From<&str> for SegmentBy {
    fn from(value: &str) -> Self {
        SegmentBy::Column(value.to_string())
    }
}

impl From<String> for SegmentBy {
    fn from(value: String) -> Self {
        SegmentBy::Column(value)
    }
}

impl From<Vec<&str>> for SegmentBy {
    fn from(value: Vec<&str>) -> Self {
        SegmentBy::Columns(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for SegmentBy {
    fn from(value: Vec<String>) -> Self {
        SegmentBy::Columns(value)
    }
}

/// Label identifying one bucket of a segmentation.
#[derive(Clone, Debug, PartialEq)]
pub enum BucketLabel {
    /// A single value (nominal group, bin interval text, calendar period).
    Value(Cell),
    /// A group of values mapped to one bucket.
    Group(Vec<Cell>),
    /// One label per composite member.
    Composite(Vec<BucketLabel>),
}

impl BucketLabel {
    /// Document form of the label.
    pub fn to_document(&self) -> Document {
        match self {
            BucketLabel::Value(cell) => cell.to_document(),
            BucketLabel::Group(cells) => {
                Document::Array(cells.iter().map(Cell::to_document).collect())
            }
            BucketLabel::Composite(labels) => {
                Document::Array(labels.iter().map(BucketLabel::to_document).collect())
            }
        }
    }

    /// Parse the document form.
    ///
    /// A flat list of scalars parses as a group; composite labels of scalar
    /// members share that shape and render identically.
    pub fn from_document(document: &Document) -> Result<Self, ValidationError> {
        if let Some(cell) = Cell::from_document(document) {
            return Ok(BucketLabel::Value(cell));
        }
        let Document::Array(items) = document else {
            return Err(ValidationError::MalformedDocument(format!(
                "bucket label must be a scalar or a list, got {document}"
            )));
        };
        if let Some(cells) = items
            .iter()
            .map(Cell::from_document)
            .collect::<Option<Vec<_>>>()
        {
            return Ok(BucketLabel::Group(cells));
        }
        items
            .iter()
            .map(BucketLabel::from_document)
            .collect::<Result<Vec<_>, _>>()
            .map(BucketLabel::Composite)
    }

    /// Equality tolerant of document round trips (see `Cell::loosely_eq`).
    pub fn loosely_eq(&self, other: &BucketLabel) -> bool {
        match (self, other) {
            (BucketLabel::Value(a), BucketLabel::Value(b)) => a.loosely_eq(b),
            (BucketLabel::Group(a), BucketLabel::Group(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (BucketLabel::Composite(a), BucketLabel::Composite(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_eq(y))
            }
            (BucketLabel::Group(cells), BucketLabel::Composite(labels))
            | (BucketLabel::Composite(labels), BucketLabel::Group(cells)) => {
                cells.len() == labels.len()
                    && cells
                        .iter()
                        .zip(labels)
                        .all(|(cell, label)| BucketLabel::Value(cell.clone()).loosely_eq(label))
            }
            _ => false,
        }
    }
}

impl fmt::Display for BucketLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketLabel::Value(cell) => write!(f, "{cell}"),
            BucketLabel::Group(cells) => {
                let parts: Vec<String> = cells.iter().map(Cell::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            BucketLabel::Composite(labels) => {
                let parts: Vec<String> = labels.iter().map(BucketLabel::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for BucketLabel {
    fn from(value: &str) -> Self {
        BucketLabel::Value(Cell::from(value))
    }
}

impl From<Cell> for BucketLabel {
    fn from(value: Cell) -> Self {
        BucketLabel::Value(value)
    }
}

/// Ordered buckets with the rows that fall into each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    labels: Vec<BucketLabel>,
    indices: Vec<Arc<[usize]>>,
}

impl Partition {
    /// Append a bucket; `rows` must be ascending and unique.
    pub fn push(&mut self, label: BucketLabel, rows: Vec<usize>) {
        self.labels.push(label);
        self.indices.push(rows.into());
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Bucket labels in order.
    pub fn labels(&self) -> &[BucketLabel] {
        &self.labels
    }

    /// Row indices per bucket.
    pub fn indices(&self) -> &[Arc<[usize]>] {
        &self.indices
    }

    /// Iterate `(label, rows)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&BucketLabel, &Arc<[usize]>)> {
        self.labels.iter().zip(self.indices.iter())
    }
}

/// Cached set of segments produced by applying a method to a dataset.
#[derive(Clone, Debug)]
pub struct Segmentation {
    root: Dataset,
    entry: CachedPartition,
}

impl Segmentation {
    pub(crate) fn from_cache(root: Dataset, entry: CachedPartition) -> Self {
        Self { root, entry }
    }

    /// Dataset that was segmented.
    pub fn root_dataset(&self) -> &Dataset {
        &self.root
    }

    /// Segmentation key.
    pub fn by(&self) -> &SegmentBy {
        &self.entry.by
    }

    /// Method as requested by the caller.
    pub fn method(&self) -> &SegmentationMethod {
        &self.entry.method
    }

    /// Method with data-dependent configuration (inferred groups, computed bins) fixed.
    pub fn resolved_method(&self) -> &SegmentationMethod {
        &self.entry.resolved
    }

    /// Name of the method variant.
    pub fn approach(&self) -> &'static str {
        self.entry.method.class_name()
    }

    /// Identifier `{root}>{by}|{method}`.
    pub fn id(&self) -> String {
        format!(
            "{}>{}{METHOD_SEPARATOR}{}",
            self.root.id(),
            self.entry.by,
            self.entry.method
        )
    }

    /// Underlying partition.
    pub fn partition(&self) -> &Partition {
        &self.entry.partition
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.entry.partition.len()
    }

    /// True when the method produced no buckets.
    pub fn is_empty(&self) -> bool {
        self.entry.partition.is_empty()
    }

    /// Segments in bucket order.
    pub fn segments(&self) -> Vec<Dataset> {
        self.entry
            .partition
            .iter()
            .map(|(label, rows)| self.build_segment(label, rows))
            .collect()
    }

    /// Segment whose bucket label matches `label`.
    pub fn get(&self, label: &BucketLabel) -> Option<Dataset> {
        self.entry
            .partition
            .iter()
            .find(|(candidate, _)| candidate.loosely_eq(label))
            .map(|(candidate, rows)| self.build_segment(candidate, rows))
    }

    /// Composite of this segmentation and `other` over the same dataset (not cached).
    pub fn composite_with(&self, other: &Segmentation) -> Result<Segmentation, ValidationError> {
        self.root.composite_segmentations(&[self, other], false)
    }

    fn build_segment(&self, label: &BucketLabel, rows: &Arc<[usize]>) -> Dataset {
        Dataset::new_segment(
            &self.root,
            self.entry.by.clone(),
            label.clone(),
            self.entry.resolved.clone(),
            Arc::clone(rows),
        )
    }
}

impl PartialEq for Segmentation {
    fn eq(&self, other: &Self) -> bool {
        self.root.id() == other.root.id()
            && self.entry.by == other.entry.by
            && self.entry.method == other.entry.method
    }
}

impl fmt::Display for Segmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Segmentation: {} using {} by {}>",
            self.root.id(),
            self.approach(),
            self.entry.by
        )
    }
}

/// Intersect two ascending, duplicate-free index lists.
///
/// Behavior for unsorted or duplicated input is undefined; partitions only
/// ever produce ascending unique rows.
pub(crate) fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_by_renders_lists_in_brackets() {
        let by = SegmentBy::from(vec!["year", "segment"]);
        assert_eq!(by.to_string(), "[year, segment]");
        assert_eq!(SegmentBy::from_document(&by.to_document()).unwrap(), by);
    }

    #[test]
    fn bucket_label_documents_parse_back() {
        let group = BucketLabel::Group(vec![Cell::Integer(2011), Cell::Integer(2013)]);
        assert_eq!(group.to_string(), "[2011, 2013]");
        let parsed = BucketLabel::from_document(&group.to_document()).unwrap();
        assert!(parsed.loosely_eq(&group));

        let composite = BucketLabel::Composite(vec![
            BucketLabel::from("PRIVAT"),
            BucketLabel::Value(Cell::Integer(2016)),
        ]);
        let parsed = BucketLabel::from_document(&composite.to_document()).unwrap();
        assert!(parsed.loosely_eq(&composite));
        assert_eq!(parsed.to_string(), composite.to_string());
    }

    #[test]
    fn intersection_of_sorted_rows() {
        assert_eq!(intersect_sorted(&[0, 2, 4, 6], &[1, 2, 3, 6]), vec![2, 6]);
        assert!(intersect_sorted(&[], &[1]).is_empty());
    }
}
