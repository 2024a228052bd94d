use serde_json::json;

use crate::automation::declarative::Declarative;
use crate::errors::ValidationError;
use crate::segmentation::{BucketLabel, BucketRule, SegmentationMap};
use crate::types::Document;
use crate::value::{Cell, Column};

/// One nominal group: a single value or a set of values sharing a bucket.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupSpec {
    /// Bucket for exactly one value.
    Value(Cell),
    /// Bucket for any of several values.
    OneOf(Vec<Cell>),
}

impl GroupSpec {
    fn label(&self) -> BucketLabel {
        match self {
            GroupSpec::Value(cell) => BucketLabel::Value(cell.clone()),
            GroupSpec::OneOf(cells) => BucketLabel::Group(cells.clone()),
        }
    }

    fn rule(&self) -> BucketRule {
        match self {
            GroupSpec::Value(cell) => BucketRule::Equals(cell.clone()),
            GroupSpec::OneOf(cells) => BucketRule::OneOf(cells.clone()),
        }
    }

    fn to_document(&self) -> Document {
        match self {
            GroupSpec::Value(cell) => cell.to_document(),
            GroupSpec::OneOf(cells) => Document::Array(cells.iter().map(Cell::to_document).collect()),
        }
    }

    fn from_document(document: &Document) -> Result<Self, ValidationError> {
        if let Some(cell) = Cell::from_document(document) {
            return Ok(GroupSpec::Value(cell));
        }
        match document {
            Document::Array(items) => items
                .iter()
                .map(|item| {
                    Cell::from_document(item).ok_or_else(|| {
                        ValidationError::MalformedDocument(format!(
                            "group members must be scalars, got {item}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(GroupSpec::OneOf),
            other => Err(ValidationError::MalformedDocument(format!(
                "invalid group {other}"
            ))),
        }
    }
}

impl From<Cell> for GroupSpec {
    fn from(value: Cell) -> Self {
        GroupSpec::Value(value)
    }
}

impl From<&str> for GroupSpec {
    fn from(value: &str) -> Self {
        GroupSpec::Value(Cell::from(value))
    }
}

impl From<i64> for GroupSpec {
    fn from(value: i64) -> Self {
        GroupSpec::Value(Cell::Integer(value))
    }
}

/// Nominal segmentation over explicit or inferred groups.
///
/// Without explicit groups every distinct non-missing value becomes its own
/// bucket, in ascending order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ByGroup {
    groups: Option<Vec<GroupSpec>>,
}

impl ByGroup {
    /// Segmentation with explicit groups.
    pub fn new(groups: Vec<GroupSpec>) -> Self {
        Self {
            groups: Some(groups),
        }
    }

    /// Segmentation inferring one group per distinct value.
    pub fn inferred() -> Self {
        Self::default()
    }

    /// Explicit groups, if any.
    pub fn groups(&self) -> Option<&[GroupSpec]> {
        self.groups.as_deref()
    }

    pub(crate) fn compute_map(
        &self,
        column: &Column,
    ) -> Result<(ByGroup, SegmentationMap), ValidationError> {
        let groups = match &self.groups {
            Some(groups) => groups.clone(),
            None => distinct_sorted(column.cells())
                .into_iter()
                .map(GroupSpec::Value)
                .collect(),
        };
        let map = groups
            .iter()
            .fold(SegmentationMap::default(), |map, group| {
                map.bucket(group.label(), group.rule())
            });
        Ok((ByGroup::new(groups), map))
    }
}

/// Distinct non-missing cells in ascending order.
pub(crate) fn distinct_sorted(cells: impl Iterator<Item = Cell>) -> Vec<Cell> {
    let mut distinct: Vec<Cell> = Vec::new();
    for cell in cells.filter(|cell| !cell.is_missing()) {
        if !distinct.iter().any(|seen| seen.loosely_eq(&cell)) {
            distinct.push(cell);
        }
    }
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct
}

impl Declarative for ByGroup {
    const CLASS: &'static str = "ByGroup";

    fn to_declaration(&self) -> Result<Document, ValidationError> {
        let groups = self
            .groups
            .as_ref()
            .map(|groups| Document::Array(groups.iter().map(GroupSpec::to_document).collect()));
        Ok(json!({ "groups": groups }))
    }

    fn from_declaration(document: &Document) -> Result<Self, ValidationError> {
        match document.get("groups") {
            None | Some(Document::Null) => Ok(Self::default()),
            Some(Document::Array(items)) => items
                .iter()
                .map(GroupSpec::from_document)
                .collect::<Result<Vec<_>, _>>()
                .map(ByGroup::new),
            Some(other) => Err(ValidationError::MalformedDocument(format!(
                "ByGroup groups must be a list, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_groups_are_sorted_distinct_values() {
        let column = Column::Text(vec!["PRIVAT".into(), "ERHVERV".into(), "PRIVAT".into()]);
        let (resolved, map) = ByGroup::inferred().compute_map(&column).unwrap();
        assert_eq!(
            resolved.groups().unwrap(),
            &[GroupSpec::from("ERHVERV"), GroupSpec::from("PRIVAT")]
        );
        let partition = map.segment(&column).unwrap();
        assert_eq!(&*partition.indices()[1], &[0, 2]);
    }

    #[test]
    fn explicit_groups_collect_several_values() {
        let column = Column::Integer(vec![2016, 2011, 2019, 2013]);
        let method = ByGroup::new(vec![
            GroupSpec::OneOf(vec![Cell::Integer(2011), Cell::Integer(2013), Cell::Integer(2016)]),
            GroupSpec::OneOf(vec![Cell::Integer(2019), Cell::Integer(2020)]),
        ]);
        let (_, map) = method.compute_map(&column).unwrap();
        let partition = map.segment(&column).unwrap();
        assert_eq!(partition.labels()[0].to_string(), "[2011, 2013, 2016]");
        assert_eq!(&*partition.indices()[0], &[0, 1, 3]);
        assert_eq!(&*partition.indices()[1], &[2]);
    }

    #[test]
    fn declaration_round_trips_groups() {
        let method = ByGroup::new(vec![
            GroupSpec::from("A"),
            GroupSpec::OneOf(vec![Cell::from("B"), Cell::from("C")]),
        ]);
        let back = ByGroup::from_declaration(&method.to_declaration().unwrap()).unwrap();
        assert_eq!(back, method);
        let inferred = ByGroup::from_declaration(&json!({ "groups": null })).unwrap();
        assert_eq!(inferred, ByGroup::inferred());
    }
}
