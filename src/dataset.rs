//! Dataset model: an immutable root table plus copy-on-segment views.
//!
//! Ownership model:
//! - `Table` owns the column vectors and is shared (never mutated) by every
//!   view derived from it.
//! - `Dataset` is a cheap, clonable handle. A segment holds a strong handle to
//!   its parent plus the row indices it selects; rows are only gathered when a
//!   column is read.
//! - Segmentations are cached as `(dataset id, by, method) -> partition` in a
//!   store shared by a root and every view derived from it. The store holds no
//!   dataset handles, so parents and segments never form a reference cycle,
//!   and a segment rebuilt from a cached partition still sees its own cached
//!   segmentations.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::constants::ids::{BUCKET_SEPARATOR, SEGMENT_SEPARATOR};
use crate::errors::ValidationError;
use crate::segmentation::{
    BucketLabel, Partition, SegmentBy, Segmentation, SegmentationMethod,
};
use crate::types::{ColumnName, DatasetId};
use crate::value::{Cell, Column};

/// Immutable rows x named columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    columns: IndexMap<ColumnName, Column>,
    rows: usize,
}

impl Table {
    /// Build a table; every column must have the same number of rows.
    pub fn new<I, K>(columns: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, Column)>,
        K: Into<ColumnName>,
    {
        let mut collected = IndexMap::new();
        let mut rows = None;
        for (name, column) in columns {
            let name = name.into();
            match rows {
                None => rows = Some(column.len()),
                Some(expected) if expected != column.len() => {
                    return Err(ValidationError::invalid_argument(
                        "Table::new",
                        format!(
                            "column '{name}' has {} rows, expected {expected}",
                            column.len()
                        ),
                    ));
                }
                Some(_) => {}
            }
            collected.insert(name, column);
        }
        Ok(Self {
            columns: collected,
            rows: rows.unwrap_or(0),
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &ColumnName> {
        self.columns.keys()
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Segment-specific state of a dataset.
#[derive(Clone, Debug)]
pub struct SegmentOrigin {
    parent: Dataset,
    by: SegmentBy,
    bucket: BucketLabel,
    method: SegmentationMethod,
    /// Rows selected from the parent, ascending.
    indices: Arc<[usize]>,
    /// The same rows expressed against the root table.
    root_rows: Arc<[usize]>,
}

impl SegmentOrigin {
    /// Dataset this segment was cut from.
    pub fn parent(&self) -> &Dataset {
        &self.parent
    }

    /// Segmentation key.
    pub fn by(&self) -> &SegmentBy {
        &self.by
    }

    /// Bucket label identifying this segment within its segmentation.
    pub fn bucket(&self) -> &BucketLabel {
        &self.bucket
    }

    /// Resolved segmentation method that produced this segment.
    pub fn method(&self) -> &SegmentationMethod {
        &self.method
    }

    /// Parent row indices selected by this segment.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

#[derive(Debug)]
enum Origin {
    Root,
    Segment(SegmentOrigin),
}

/// Cached partition of a dataset for one `(by, method)` pair.
#[derive(Clone, Debug)]
pub(crate) struct CachedPartition {
    pub(crate) by: SegmentBy,
    pub(crate) method: SegmentationMethod,
    pub(crate) resolved: SegmentationMethod,
    pub(crate) partition: Arc<Partition>,
}

/// Partition cache shared by a root dataset and all of its segments.
type PartitionStore = Arc<RwLock<Vec<(DatasetId, CachedPartition)>>>;

#[derive(Debug)]
struct DatasetInner {
    id: DatasetId,
    table: Arc<Table>,
    origin: Origin,
    partitions: PartitionStore,
}

/// Identified tabular dataset or segment of one.
#[derive(Clone, Debug)]
pub struct Dataset {
    inner: Arc<DatasetInner>,
}

impl Dataset {
    /// Create a root dataset over `table`.
    pub fn new(id: impl Into<DatasetId>, table: Table) -> Self {
        Self::from_shared(id.into(), Arc::new(table))
    }

    fn from_shared(id: DatasetId, table: Arc<Table>) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                id,
                table,
                origin: Origin::Root,
                partitions: Arc::new(RwLock::new(Vec::new())),
            }),
        }
    }

    /// A root dataset sharing this dataset's data under a different id.
    ///
    /// Segments are re-rooted on their materialized rows.
    pub fn with_id(&self, id: impl Into<DatasetId>) -> Dataset {
        match &self.inner.origin {
            Origin::Root => Self::from_shared(id.into(), Arc::clone(&self.inner.table)),
            Origin::Segment(origin) => {
                let table = Table {
                    columns: self
                        .inner
                        .table
                        .columns
                        .iter()
                        .map(|(name, column)| (name.clone(), column.take(&origin.root_rows)))
                        .collect(),
                    rows: origin.root_rows.len(),
                };
                Self::new(id, table)
            }
        }
    }

    pub(crate) fn new_segment(
        parent: &Dataset,
        by: SegmentBy,
        bucket: BucketLabel,
        method: SegmentationMethod,
        indices: Arc<[usize]>,
    ) -> Dataset {
        let root_rows: Arc<[usize]> = match &parent.inner.origin {
            Origin::Root => Arc::clone(&indices),
            Origin::Segment(origin) => indices.iter().map(|&i| origin.root_rows[i]).collect(),
        };
        let id = segment_id(parent.id(), &by, &bucket);
        Dataset {
            inner: Arc::new(DatasetInner {
                id,
                table: Arc::clone(&parent.inner.table),
                origin: Origin::Segment(SegmentOrigin {
                    parent: parent.clone(),
                    by,
                    bucket,
                    method,
                    indices,
                    root_rows,
                }),
                partitions: Arc::clone(&parent.inner.partitions),
            }),
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Segment state, `None` for root datasets.
    pub fn as_segment(&self) -> Option<&SegmentOrigin> {
        match &self.inner.origin {
            Origin::Root => None,
            Origin::Segment(origin) => Some(origin),
        }
    }

    /// True when this dataset is a segment of another.
    pub fn is_segment(&self) -> bool {
        self.as_segment().is_some()
    }

    /// Parent dataset of a segment.
    pub fn parent(&self) -> Option<&Dataset> {
        self.as_segment().map(SegmentOrigin::parent)
    }

    /// Number of rows visible through this dataset.
    pub fn observations(&self) -> usize {
        match &self.inner.origin {
            Origin::Root => self.inner.table.rows(),
            Origin::Segment(origin) => origin.root_rows.len(),
        }
    }

    /// Column names of the underlying table.
    pub fn column_names(&self) -> Vec<ColumnName> {
        self.inner.table.column_names().cloned().collect()
    }

    /// True when both handles point at the same dataset object.
    pub fn ptr_eq(&self, other: &Dataset) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Materialize the rows of column `name` visible through this dataset.
    pub fn values(&self, name: &str) -> Result<Column, ValidationError> {
        let column =
            self.inner
                .table
                .column(name)
                .ok_or_else(|| ValidationError::ColumnNotFound {
                    dataset: self.id().to_string(),
                    column: name.to_string(),
                })?;
        Ok(match &self.inner.origin {
            Origin::Root => column.clone(),
            Origin::Segment(origin) => column.take(&origin.root_rows),
        })
    }

    /// Column `name` tagged with this dataset.
    pub fn column(&self, name: &str) -> Result<SourcedVector, ValidationError> {
        Ok(SourcedVector {
            values: self.values(name)?,
            dataset: self.clone(),
            name: name.to_string(),
        })
    }

    /// Several columns tagged with this dataset.
    pub fn columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<SourcedVector>, ValidationError> {
        names.iter().map(|name| self.column(name.as_ref())).collect()
    }

    /// Partition this dataset by `by` using `method`.
    ///
    /// Partitions are cached per `(by, method)`; methods that declare
    /// themselves as always recomputing bypass the cache.
    pub fn segment(
        &self,
        by: impl Into<SegmentBy>,
        method: SegmentationMethod,
    ) -> Result<Segmentation, ValidationError> {
        let by = by.into();
        if !method.always_recompute()
            && let Some(cached) = self.cached_partition(&by, &method)
        {
            debug!(dataset = self.id(), by = %by, "segmentation cache hit");
            return Ok(Segmentation::from_cache(self.clone(), cached));
        }
        let entry = self.compute_partition(by, method)?;
        if !entry.method.always_recompute() {
            let mut guard = self
                .inner
                .partitions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.push((self.id().to_string(), entry.clone()));
        }
        Ok(Segmentation::from_cache(self.clone(), entry))
    }

    /// Combine several segmentations of this dataset into their cartesian product.
    ///
    /// With `store` the composite is cached like any other segmentation.
    pub fn composite_segmentations(
        &self,
        segmentations: &[&Segmentation],
        store: bool,
    ) -> Result<Segmentation, ValidationError> {
        let by = SegmentBy::Columns(
            segmentations
                .iter()
                .flat_map(|segmentation| segmentation.by().columns())
                .collect(),
        );
        let method = SegmentationMethod::composite(
            segmentations
                .iter()
                .map(|segmentation| segmentation.method().clone())
                .collect(),
        );
        if store {
            return self.segment(by, method);
        }
        let entry = self.compute_partition(by, method)?;
        Ok(Segmentation::from_cache(self.clone(), entry))
    }

    fn cached_partition(
        &self,
        by: &SegmentBy,
        method: &SegmentationMethod,
    ) -> Option<CachedPartition> {
        let guard = self
            .inner
            .partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .iter()
            .find(|(owner, entry)| owner == self.id() && entry.by == *by && entry.method == *method)
            .map(|(_, entry)| entry.clone())
    }

    fn compute_partition(
        &self,
        by: SegmentBy,
        method: SegmentationMethod,
    ) -> Result<CachedPartition, ValidationError> {
        let columns = by
            .columns()
            .iter()
            .map(|name| self.values(name))
            .collect::<Result<Vec<_>, _>>()?;
        let (resolved, partition) = method.resolve(&columns)?;
        debug!(
            dataset = self.id(),
            by = %by,
            segments = partition.len(),
            "computed segmentation"
        );
        Ok(CachedPartition {
            by,
            method,
            resolved,
            partition: Arc::new(partition),
        })
    }

    /// Cached segmentations of this dataset.
    pub fn segmentations(&self) -> Vec<Segmentation> {
        let entries: Vec<CachedPartition> = {
            let guard = self
                .inner
                .partitions
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard
                .iter()
                .filter(|(owner, _)| owner == self.id())
                .map(|(_, entry)| entry.clone())
                .collect()
        };
        entries
            .into_iter()
            .map(|entry| Segmentation::from_cache(self.clone(), entry))
            .collect()
    }

    /// This dataset followed by every segment reachable through cached segmentations.
    pub fn iter_all_datasets(&self) -> Vec<Dataset> {
        let mut all = vec![self.clone()];
        for segmentation in self.segmentations() {
            for segment in segmentation.segments() {
                all.extend(segment.iter_all_datasets());
            }
        }
        all
    }

    /// Every cached segmentation of this dataset and of its reachable segments.
    pub fn iter_all_segmentations(&self) -> Vec<Segmentation> {
        self.iter_all_datasets()
            .iter()
            .flat_map(Dataset::segmentations)
            .collect()
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} observations and {} variables",
            self.id(),
            self.observations(),
            self.inner.table.width()
        )
    }
}

/// Derive the id of a segment: `{parent}>{by}={bucket}`.
pub fn segment_id(parent_id: &str, by: &SegmentBy, bucket: &BucketLabel) -> DatasetId {
    format!("{parent_id}{SEGMENT_SEPARATOR}{by}{BUCKET_SEPARATOR}{bucket}")
}

/// Column values tagged with the dataset and column they were read from.
#[derive(Clone, Debug)]
pub struct SourcedVector {
    dataset: Dataset,
    name: ColumnName,
    values: Column,
}

impl SourcedVector {
    /// Owning dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column values.
    pub fn values(&self) -> &Column {
        &self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the vector holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `idx`.
    pub fn get(&self, idx: usize) -> Cell {
        self.values.cell(idx)
    }

    /// Floating point view of a numeric column.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        self.values.as_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::ByGroup;

    fn small_table() -> Table {
        Table::new([
            ("segment", Column::Text(vec!["A".into(), "B".into(), "A".into()])),
            ("score", Column::Numeric(vec![0.1, 0.2, 0.3])),
        ])
        .unwrap()
    }

    #[test]
    fn table_rejects_ragged_columns() {
        let err = Table::new([
            ("a", Column::Integer(vec![1, 2])),
            ("b", Column::Integer(vec![1])),
        ])
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidArgument { .. }));
    }

    #[test]
    fn missing_column_names_dataset() {
        let dataset = Dataset::new("ds", small_table());
        let err = dataset.column("nope").unwrap_err();
        assert!(err.to_string().contains("'ds'"));
    }

    #[test]
    fn segments_filter_parent_rows_lazily() {
        let dataset = Dataset::new("ds", small_table());
        let segmentation = dataset.segment("segment", ByGroup::default().into()).unwrap();
        let segment = segmentation.get(&BucketLabel::from("A")).unwrap();
        assert_eq!(segment.id(), "ds>segment=A");
        assert_eq!(segment.observations(), 2);
        assert_eq!(
            segment.values("score").unwrap(),
            Column::Numeric(vec![0.1, 0.3])
        );
        assert!(segment.parent().unwrap().ptr_eq(&dataset));
    }

    #[test]
    fn nested_segments_map_rows_to_root() {
        let dataset = Dataset::new("ds", small_table());
        let first = dataset
            .segment("segment", ByGroup::default().into())
            .unwrap()
            .get(&BucketLabel::from("A"))
            .unwrap();
        let nested = first
            .segment("score", ByGroup::default().into())
            .unwrap()
            .segments();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[1].id(), "ds>segment=A>score=0.3");
        assert_eq!(nested[1].values("segment").unwrap(), Column::Text(vec!["A".into()]));
        assert_eq!(dataset.iter_all_datasets().len(), 5);
    }

    #[test]
    fn segmentation_is_cached_by_configuration() {
        let dataset = Dataset::new("ds", small_table());
        dataset.segment("segment", ByGroup::default().into()).unwrap();
        dataset.segment("segment", ByGroup::default().into()).unwrap();
        assert_eq!(dataset.segmentations().len(), 1);
    }

    #[test]
    fn with_id_shares_rows_under_new_identity() {
        let dataset = Dataset::new("ds", small_table());
        let renamed = dataset.with_id("other");
        assert_eq!(renamed.id(), "other");
        assert_eq!(renamed.observations(), 3);
        assert!(!renamed.ptr_eq(&dataset));
        assert_eq!(renamed.to_string(), "other: 3 observations and 2 variables");
    }
}
