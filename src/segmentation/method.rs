use serde_json::json;
use std::any::Any;
use std::fmt;

use crate::automation::declarative::{ClassDescriptor, Declarative, DeclarativeObject};
use crate::errors::ValidationError;
use crate::segmentation::{
    BucketLabel, ByBins, ByGroup, Partition, Temporal, TemporalByBins, intersect_sorted,
};
use crate::types::Document;
use crate::value::Column;

/// Module under which segmentation classes are registered.
pub const SEGMENTATION_MODULE: &str = "crval::segmentation";

/// Cartesian product of several methods, each over its own column(s).
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeSegmentation {
    methods: Vec<SegmentationMethod>,
}

impl CompositeSegmentation {
    /// Combine `methods`, one per key column, in key order.
    pub fn new(methods: Vec<SegmentationMethod>) -> Self {
        Self { methods }
    }

    /// Member methods in key order.
    pub fn methods(&self) -> &[SegmentationMethod] {
        &self.methods
    }
}

impl Declarative for CompositeSegmentation {
    const CLASS: &'static str = "CompositeSegmentationMethod";

    fn to_declaration(&self) -> Result<Document, ValidationError> {
        let methods = self
            .methods
            .iter()
            .map(|method| ClassDescriptor::of(method).map(|descriptor| descriptor.to_document()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "methods": methods }))
    }

    fn from_declaration(document: &Document) -> Result<Self, ValidationError> {
        let members = document
            .get("methods")
            .and_then(Document::as_array)
            .ok_or_else(|| {
                ValidationError::MalformedDocument(
                    "composite segmentation requires a list of methods".to_string(),
                )
            })?;
        members
            .iter()
            .map(|member| SegmentationMethod::from_class(&ClassDescriptor::from_document(member)?))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

/// A segmentation method; equality is over configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentationMethod {
    /// Nominal groups.
    ByGroup(ByGroup),
    /// Numeric bins.
    ByBins(ByBins),
    /// Temporal bins.
    TemporalByBins(TemporalByBins),
    /// Calendar periods.
    Temporal(Temporal),
    /// Product of several methods.
    Composite(CompositeSegmentation),
}

impl SegmentationMethod {
    /// Shorthand for a [`CompositeSegmentation`].
    pub fn composite(methods: Vec<SegmentationMethod>) -> Self {
        SegmentationMethod::Composite(CompositeSegmentation::new(methods))
    }

    /// Registered class name of the wrapped method.
    pub fn class_name(&self) -> &'static str {
        match self {
            SegmentationMethod::ByGroup(_) => ByGroup::CLASS,
            SegmentationMethod::ByBins(_) => ByBins::CLASS,
            SegmentationMethod::TemporalByBins(_) => TemporalByBins::CLASS,
            SegmentationMethod::Temporal(_) => Temporal::CLASS,
            SegmentationMethod::Composite(_) => CompositeSegmentation::CLASS,
        }
    }

    /// True when partitions must not be cached.
    pub fn always_recompute(&self) -> bool {
        match self {
            SegmentationMethod::Temporal(_) => true,
            SegmentationMethod::Composite(composite) => composite
                .methods
                .iter()
                .any(SegmentationMethod::always_recompute),
            _ => false,
        }
    }

    /// Number of columns the method consumes.
    pub fn column_count(&self) -> usize {
        match self {
            SegmentationMethod::Composite(composite) => composite
                .methods
                .iter()
                .map(SegmentationMethod::column_count)
                .sum(),
            _ => 1,
        }
    }

    /// Document form of the variant's configuration.
    pub fn to_declaration(&self) -> Result<Document, ValidationError> {
        match self {
            SegmentationMethod::ByGroup(method) => method.to_declaration(),
            SegmentationMethod::ByBins(method) => method.to_declaration(),
            SegmentationMethod::TemporalByBins(method) => method.to_declaration(),
            SegmentationMethod::Temporal(method) => method.to_declaration(),
            SegmentationMethod::Composite(method) => method.to_declaration(),
        }
    }

    /// Rebuild a method from its class descriptor.
    pub fn from_class(descriptor: &ClassDescriptor) -> Result<Self, ValidationError> {
        if descriptor.module != SEGMENTATION_MODULE {
            return Err(ValidationError::UnresolvedReference {
                module: descriptor.module.clone(),
                name: descriptor.name.clone(),
            });
        }
        let dict = &descriptor.dict;
        let method = match descriptor.name.as_str() {
            ByGroup::CLASS => ByGroup::from_declaration(dict)?.into(),
            ByBins::CLASS => ByBins::from_declaration(dict)?.into(),
            TemporalByBins::CLASS => TemporalByBins::from_declaration(dict)?.into(),
            Temporal::CLASS => Temporal::from_declaration(dict)?.into(),
            CompositeSegmentation::CLASS => CompositeSegmentation::from_declaration(dict)?.into(),
            _ => {
                return Err(ValidationError::UnresolvedReference {
                    module: descriptor.module.clone(),
                    name: descriptor.name.clone(),
                });
            }
        };
        Ok(method)
    }

    /// Partition `columns` and return the method with its data-dependent
    /// configuration fixed, so that applying the resolved method to the same
    /// data reproduces the same buckets.
    pub fn resolve(
        &self,
        columns: &[Column],
    ) -> Result<(SegmentationMethod, Partition), ValidationError> {
        if columns.len() != self.column_count() {
            return Err(ValidationError::Segmentation(format!(
                "{} expects {} column(s), got {}",
                self.class_name(),
                self.column_count(),
                columns.len()
            )));
        }
        if let SegmentationMethod::Composite(composite) = self {
            return composite_partition(composite, columns);
        }
        let column = &columns[0];
        match self {
            SegmentationMethod::ByGroup(method) => {
                let (resolved, map) = method.compute_map(column)?;
                Ok((resolved.into(), map.segment(column)?))
            }
            SegmentationMethod::ByBins(method) => {
                let (resolved, map) = method.compute_map(column)?;
                Ok((resolved.into(), map.segment(column)?))
            }
            SegmentationMethod::TemporalByBins(method) => {
                let (resolved, map) = method.compute_map(column)?;
                Ok((resolved.into(), map.segment(column)?))
            }
            SegmentationMethod::Temporal(method) => {
                let map = method.compute_map(column)?;
                Ok((self.clone(), map.segment(column)?))
            }
            SegmentationMethod::Composite(composite) => composite_partition(composite, columns),
        }
    }
}

/// Cartesian product of member partitions; the first member varies slowest.
/// Row sets are intersections of the member buckets, empty ones included.
fn composite_partition(
    composite: &CompositeSegmentation,
    columns: &[Column],
) -> Result<(SegmentationMethod, Partition), ValidationError> {
    let mut resolved_members = Vec::with_capacity(composite.methods.len());
    let mut combinations: Vec<(Vec<BucketLabel>, Option<Vec<usize>>)> = vec![(Vec::new(), None)];
    let mut offset = 0;
    for member in &composite.methods {
        let width = member.column_count();
        let (resolved, partition) = member.resolve(&columns[offset..offset + width])?;
        offset += width;
        resolved_members.push(resolved);

        let mut next = Vec::with_capacity(combinations.len() * partition.len());
        for (labels, rows) in &combinations {
            for (label, bucket_rows) in partition.iter() {
                let mut labels = labels.clone();
                labels.push(label.clone());
                let rows = match rows {
                    Some(rows) => intersect_sorted(rows, bucket_rows),
                    None => bucket_rows.to_vec(),
                };
                next.push((labels, Some(rows)));
            }
        }
        combinations = next;
    }

    let mut partition = Partition::default();
    for (labels, rows) in combinations {
        if let Some(rows) = rows {
            partition.push(BucketLabel::Composite(labels), rows);
        }
    }
    Ok((SegmentationMethod::composite(resolved_members), partition))
}

impl fmt::Display for SegmentationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let SegmentationMethod::Composite(composite) = self {
            let members: Vec<String> = composite.methods.iter().map(ToString::to_string).collect();
            return write!(f, "{}({})", self.class_name(), members.join(", "));
        }
        let fields = match self.to_declaration() {
            Ok(Document::Object(fields)) => fields
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| match value {
                    Document::String(text) => format!("{key}={text}"),
                    other => format!("{key}={other}"),
                })
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        write!(f, "{}({})", self.class_name(), fields.join(", "))
    }
}

impl DeclarativeObject for SegmentationMethod {
    fn module(&self) -> &str {
        SEGMENTATION_MODULE
    }

    fn class_name(&self) -> &str {
        SegmentationMethod::class_name(self)
    }

    fn declaration(&self) -> Result<Document, ValidationError> {
        self.to_declaration()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_object(&self, other: &dyn DeclarativeObject) -> bool {
        other
            .as_any()
            .downcast_ref::<SegmentationMethod>()
            .is_some_and(|other| self == other)
    }
}

impl From<ByGroup> for SegmentationMethod {
    fn from(method: ByGroup) -> Self {
        SegmentationMethod::ByGroup(method)
    }
}

impl From<ByBins> for SegmentationMethod {
    fn from(method: ByBins) -> Self {
        SegmentationMethod::ByBins(method)
    }
}

impl From<TemporalByBins> for SegmentationMethod {
    fn from(method: TemporalByBins) -> Self {
        SegmentationMethod::TemporalByBins(method)
    }
}

impl From<Temporal> for SegmentationMethod {
    fn from(method: Temporal) -> Self {
        SegmentationMethod::Temporal(method)
    }
}

impl From<CompositeSegmentation> for SegmentationMethod {
    fn from(method: CompositeSegmentation) -> Self {
        SegmentationMethod::Composite(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{GroupSpec, TemporalFrequency};
    use crate::value::Cell;

    #[test]
    fn equality_is_over_configuration() {
        let a: SegmentationMethod = ByBins::edges(vec![1.0, 2.0]).into();
        let b: SegmentationMethod = ByBins::edges(vec![1.0, 2.0]).into();
        let c: SegmentationMethod = ByBins::edges(vec![1.0]).into();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.eq_object(&b));
    }

    #[test]
    fn class_descriptors_rebuild_every_variant() {
        let methods: Vec<SegmentationMethod> = vec![
            ByGroup::new(vec![GroupSpec::from("A")]).into(),
            ByBins::count(3).into(),
            Temporal::new(TemporalFrequency::Quarterly).into(),
            SegmentationMethod::composite(vec![
                ByGroup::inferred().into(),
                ByBins::edges(vec![0.5]).into(),
            ]),
        ];
        for method in methods {
            let descriptor = ClassDescriptor::of(&method).unwrap();
            let document = descriptor.to_document();
            let back =
                SegmentationMethod::from_class(&ClassDescriptor::from_document(&document).unwrap())
                    .unwrap();
            assert_eq!(back, method);
        }
    }

    #[test]
    fn composite_is_cartesian_product_with_empty_combinations() {
        let years = Column::Integer(vec![2016, 2017, 2016, 2017]);
        let groups = Column::Text(vec!["A".into(), "A".into(), "B".into(), "A".into()]);
        let method = SegmentationMethod::composite(vec![
            ByGroup::inferred().into(),
            ByGroup::new(vec![GroupSpec::from("A"), GroupSpec::from("B"), GroupSpec::from("C")])
                .into(),
        ]);
        let (resolved, partition) = method.resolve(&[years, groups]).unwrap();
        assert_eq!(partition.len(), 6);
        assert_eq!(partition.labels()[0].to_string(), "[2016, A]");
        assert_eq!(&*partition.indices()[0], &[0]);
        assert_eq!(&*partition.indices()[1], &[2]);
        assert_eq!(&*partition.indices()[3], &[1, 3]);
        assert!(partition.indices()[5].is_empty());
        let SegmentationMethod::Composite(resolved) = resolved else {
            panic!("composite resolves to a composite");
        };
        assert_eq!(
            resolved.methods()[0],
            SegmentationMethod::from(ByGroup::new(vec![
                GroupSpec::from(Cell::Integer(2016)),
                GroupSpec::from(Cell::Integer(2017)),
            ]))
        );
    }

    #[test]
    fn temporal_members_force_recomputation() {
        let composite = SegmentationMethod::composite(vec![
            ByGroup::inferred().into(),
            Temporal::new(TemporalFrequency::Yearly).into(),
        ]);
        assert!(composite.always_recompute());
        assert_eq!(composite.column_count(), 2);
        assert!(!SegmentationMethod::from(ByGroup::inferred()).always_recompute());
    }

    #[test]
    fn display_lists_configuration() {
        let method: SegmentationMethod = ByBins::edges(vec![1.0]).into();
        assert_eq!(
            method.to_string(),
            "ByBins(bins=[1.0], method=distance, nan_handling=min)"
        );
    }
}
