//! Tabular ingestion collaborators.
//!
//! `from_csv` is recordable: called while recording, the returned dataset is
//! registered on the tape together with the call that produced it, so replay
//! can ingest the same file again.

use csv::ReaderBuilder;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use crate::automation::{Arg, CallArgs, Registry};
use crate::dataset::{Dataset, Table};
use crate::errors::ValidationError;
use crate::types::{ColumnName, DatasetId};
use crate::value::{Column, parse_time};

/// Columns with fewer distinct values than this are proposed as segmentors.
pub const SEGMENTOR_MAX_DISTINCT: usize = 12;

const TARGET_ABBREVIATIONS: [&str; 10] = [
    "EAD", "LGD", "CR", "LGL", "CCF", "CF", "PD", "Score", "D12", "Exposure",
];

const TARGET_NAMES: [&str; 9] = [
    "Target",
    "ExposureAtDefault",
    "LossGivenDefault",
    "CureRate",
    "LossGivenLoss",
    "CreditConversionFactor",
    "ConversionFactor",
    "ProbabilityOfDefault",
    "DefaultProbability",
];

/// Register the ingestion functions.
pub fn register(registry: &mut Registry) {
    registry.register_recordable(&crate::recordable!(from_csv));
}

/// Recordable CSV ingestion.
///
/// Arguments: `path` (required), `id` (optional; a v4 uuid is generated when
/// absent or empty) and the `delimiter` keyword (first character, default `,`).
pub fn from_csv(args: &CallArgs) -> Result<Arg, ValidationError> {
    let path = args
        .text(0, "path")
        .ok_or_else(|| ValidationError::invalid_argument("from_csv", "missing argument 'path'"))?;
    let id = args.text(1, "id").filter(|id| !id.is_empty());
    let delimiter = args
        .text(2, "delimiter")
        .and_then(|text| text.bytes().next())
        .unwrap_or(b',');
    read_csv(path, id, delimiter).map(Arg::Dataset)
}

/// Read a headed CSV file into a dataset, inferring column types.
pub fn read_csv(
    path: impl AsRef<Path>,
    id: Option<&str>,
    delimiter: u8,
) -> Result<Dataset, ValidationError> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_path(path)?;
    let headers: Vec<ColumnName> = reader.headers()?.iter().map(str::to_string).collect();
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (idx, values) in raw.iter_mut().enumerate() {
            values.push(record.get(idx).unwrap_or("").trim().to_string());
        }
    }
    let table = Table::new(
        headers
            .into_iter()
            .zip(raw)
            .map(|(name, values)| (name, infer_column(values))),
    )?;
    let id: DatasetId = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    debug!(
        dataset = %id,
        path = %path.display(),
        rows = table.rows(),
        columns = table.width(),
        "ingested csv"
    );
    Ok(Dataset::new(id, table))
}

/// Narrowest column type every non-empty value parses as.
///
/// Integers with gaps widen to numeric (`NaN` for gaps); a column with no
/// values at all is numeric.
fn infer_column(values: Vec<String>) -> Column {
    let present = || values.iter().filter(|value| !value.is_empty());
    let has_gaps = values.iter().any(String::is_empty);
    if present().next().is_none() {
        return Column::Numeric(vec![f64::NAN; values.len()]);
    }
    if !has_gaps && present().all(|value| value.parse::<i64>().is_ok()) {
        return Column::Integer(values.iter().filter_map(|value| value.parse().ok()).collect());
    }
    if present().all(|value| value.parse::<f64>().is_ok()) {
        return Column::Numeric(
            values
                .iter()
                .map(|value| value.parse().unwrap_or(f64::NAN))
                .collect(),
        );
    }
    if present().all(|value| parse_time(value).is_some()) {
        return Column::Temporal(values.iter().map(|value| parse_time(value)).collect());
    }
    Column::Text(values)
}

/// Columns proposed for each modelling role.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableRoles {
    /// Numeric columns that are not targets.
    pub factors: Vec<ColumnName>,
    /// Temporal and low-cardinality columns that are not targets.
    pub segmentors: Vec<ColumnName>,
    /// Columns whose names look like credit-risk targets.
    pub targets: Vec<ColumnName>,
}

/// Guess targets from column names and factors/segmentors from column types.
pub fn infer_variable_roles(dataset: &Dataset) -> Result<VariableRoles, ValidationError> {
    let names = dataset.column_names();
    let targets = dedup(guess_targets(&names));

    let mut temporal = Vec::new();
    let mut low_cardinality = Vec::new();
    let mut factors = Vec::new();
    for name in &names {
        let column = dataset.values(name)?;
        if matches!(column, Column::Temporal(_)) {
            temporal.push(name.clone());
        }
        if column.distinct_count() < SEGMENTOR_MAX_DISTINCT {
            low_cardinality.push(name.clone());
        }
        if matches!(column, Column::Integer(_) | Column::Numeric(_)) && !targets.contains(name) {
            factors.push(name.clone());
        }
    }
    let segmentors = dedup(temporal.into_iter().chain(low_cardinality).collect())
        .into_iter()
        .filter(|name| !targets.contains(name))
        .collect();
    Ok(VariableRoles {
        factors,
        segmentors,
        targets,
    })
}

fn guess_targets(names: &[ColumnName]) -> Vec<ColumnName> {
    let mut matches = Vec::new();
    for raw in names {
        let value = raw.to_lowercase();
        for abbreviation in TARGET_ABBREVIATIONS {
            let abbreviation = abbreviation.to_lowercase();
            let leading = value
                .strip_prefix(&abbreviation)
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphabetic()));
            if leading || value.contains(&format!(" {abbreviation} ")) {
                matches.push(raw.clone());
            }
        }
        let stripped: String = value
            .chars()
            .filter(|c| *c != '_' && !c.is_whitespace())
            .collect();
        for name in TARGET_NAMES {
            if stripped.contains(&name.to_lowercase()) {
                matches.push(raw.clone());
            }
        }
    }
    matches
}

fn dedup(names: Vec<ColumnName>) -> Vec<ColumnName> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CSV: &str = "\
segmentor 1,factor 1,PD,Default Date,note
PRIVAT,1.5,0.01,2016-01-31,a
ERHVERV,2,0.02,2016-02-29,b
PRIVAT,,0.03,,c
";

    #[test]
    fn csv_columns_get_narrowest_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, CSV).unwrap();

        let dataset = read_csv(&path, Some("dataset"), b',').unwrap();
        assert_eq!(dataset.id(), "dataset");
        assert_eq!(dataset.observations(), 3);
        assert!(matches!(dataset.values("segmentor 1").unwrap(), Column::Text(_)));
        let factor = dataset.values("factor 1").unwrap().as_f64().unwrap();
        assert_eq!(factor[1], 2.0);
        assert!(factor[2].is_nan());
        assert!(matches!(dataset.values("Default Date").unwrap(), Column::Temporal(_)));
    }

    #[test]
    fn ids_are_generated_when_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, CSV).unwrap();

        let args = CallArgs::positional([path.to_string_lossy().to_string()]);
        let dataset = from_csv(&args).unwrap().into_dataset("from_csv").unwrap();
        assert!(Uuid::parse_str(dataset.id()).is_ok());
    }

    #[test]
    fn roles_follow_names_and_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, CSV).unwrap();

        let roles = infer_variable_roles(&read_csv(&path, None, b',').unwrap()).unwrap();
        assert_eq!(roles.targets, ["PD"]);
        assert_eq!(roles.factors, ["factor 1"]);
        assert_eq!(roles.segmentors[0], "Default Date");
        assert!(roles.segmentors.contains(&"segmentor 1".to_string()));
        assert!(!roles.segmentors.contains(&"PD".to_string()));
    }

    #[test]
    fn target_names_match_abbreviations_and_long_forms() {
        let names: Vec<ColumnName> = ["LGD_realised", "pd", "Score card", "Cure_Rate", "scored", "age"]
            .map(str::to_string)
            .to_vec();
        assert_eq!(
            dedup(guess_targets(&names)),
            ["LGD_realised", "pd", "Score card", "Cure_Rate"]
        );
    }
}
