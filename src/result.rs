//! Result containers: named bags of lazily evaluated outputs.
//!
//! [`ValidationResult`] is a cheap clonable handle; clones share outputs and
//! provenance. The specializations are thin wrappers that pre-populate the
//! keys their kind requires and dereference to the generic result.

use indexmap::IndexMap;
use ndarray::{Array2, Axis};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, RwLock};

use crate::constants::rag::{AMBER, GREEN, RED};
use crate::errors::ValidationError;
use crate::output::{Figure, Output, OutputValue};
use crate::types::{OutputKey, RecordingUid};

/// Which constructor produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    /// Plain mapping of outputs.
    Generic,
    /// Placeholder fabricating a nested mock for any requested key.
    Mock,
    /// See [`ScalarResult`].
    Scalar,
    /// See [`TestResult`].
    Test,
    /// See [`ScalarTestResult`].
    ScalarTest,
    /// See [`RagResult`].
    Rag,
    /// See [`ScalarRagResult`].
    ScalarRag,
    /// See [`FigureResult`].
    Figure,
    /// See [`ResultTable`].
    Table,
}

struct ResultInner {
    kind: ResultKind,
    outputs: RwLock<IndexMap<OutputKey, Arc<Output>>>,
    recording_uid: RwLock<Option<RecordingUid>>,
}

/// Named mapping from output key to [`Output`].
#[derive(Clone)]
pub struct ValidationResult {
    inner: Arc<ResultInner>,
}

impl ValidationResult {
    /// Empty generic result.
    pub fn new() -> Self {
        Self::of_kind(ResultKind::Generic)
    }

    /// A placeholder whose every key resolves to another mock.
    pub fn mock() -> Self {
        Self::of_kind(ResultKind::Mock)
    }

    fn of_kind(kind: ResultKind) -> Self {
        Self {
            inner: Arc::new(ResultInner {
                kind,
                outputs: RwLock::new(IndexMap::new()),
                recording_uid: RwLock::new(None),
            }),
        }
    }

    /// Constructor that built this result.
    pub fn kind(&self) -> ResultKind {
        self.inner.kind
    }

    /// True for mock placeholders.
    pub fn is_mock(&self) -> bool {
        self.inner.kind == ResultKind::Mock
    }

    /// Output keys in insertion order.
    pub fn outputs(&self) -> Vec<OutputKey> {
        self.read_outputs().keys().cloned().collect()
    }

    /// True when an output is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.read_outputs().contains_key(key)
    }

    /// Output under `key`, with provenance attached when this result was recorded.
    ///
    /// Mock results fabricate (and keep) a nested mock for unknown keys.
    pub fn get(&self, key: &str) -> Option<Arc<Output>> {
        let existing = self.read_outputs().get(key).cloned();
        let output = match existing {
            Some(output) => output,
            None if self.is_mock() => {
                let mut outputs = self
                    .inner
                    .outputs
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                Arc::clone(
                    outputs
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::new(Output::new(ValidationResult::mock()))),
                )
            }
            None => return None,
        };
        if let Some(uid) = self.recording_uid() {
            output.add_source(uid, key);
        }
        Some(output)
    }

    /// Resolved value under `key`, cloned.
    pub fn value(&self, key: &str) -> Option<OutputValue> {
        self.get(key).map(|output| output.value().clone())
    }

    /// Add or replace an evaluated output.
    pub fn add_output(&self, key: impl Into<OutputKey>, value: impl Into<OutputValue>) -> &Self {
        self.insert(key.into(), Output::new(value))
    }

    /// Add or replace an output computed on first read.
    pub fn add_lazy<F>(&self, key: impl Into<OutputKey>, producer: F) -> &Self
    where
        F: FnOnce() -> OutputValue + Send + 'static,
    {
        self.insert(key.into(), Output::lazy(producer))
    }

    /// Builder form of [`ValidationResult::add_output`].
    pub fn with_output(self, key: impl Into<OutputKey>, value: impl Into<OutputValue>) -> Self {
        self.add_output(key, value);
        self
    }

    /// Builder form of [`ValidationResult::add_lazy`].
    pub fn with_lazy<F>(self, key: impl Into<OutputKey>, producer: F) -> Self
    where
        F: FnOnce() -> OutputValue + Send + 'static,
    {
        self.add_lazy(key, producer);
        self
    }

    fn insert(&self, key: OutputKey, output: Output) -> &Self {
        self.inner
            .outputs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, Arc::new(output));
        self
    }

    fn read_outputs(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<OutputKey, Arc<Output>>> {
        self.inner
            .outputs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Correlation id of the recorded call that produced this result.
    pub fn recording_uid(&self) -> Option<RecordingUid> {
        self.inner
            .recording_uid
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_recording_uid(&self, uid: impl Into<RecordingUid>) {
        *self
            .inner
            .recording_uid
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(uid.into());
    }

    /// True when both handles share the same result.
    pub fn ptr_eq(&self, other: &ValidationResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn text(&self, key: &str) -> String {
        self.get(key)
            .map(|output| output.value().to_string())
            .unwrap_or_default()
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .and_then(|output| output.as_bool())
            .unwrap_or(false)
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ValidationResult {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationResult")
            .field("kind", &self.inner.kind)
            .field("outputs", &self.outputs())
            .field("recording_uid", &self.recording_uid())
            .finish()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            ResultKind::Scalar => write!(f, "({}, {})", self.text("name"), self.text("value")),
            ResultKind::Test | ResultKind::ScalarTest => {
                let status = if self.flag("passed") { "PASSED" } else { "NOT PASSED" };
                write!(f, "{status} ({})", self.text("name"))
            }
            ResultKind::Rag | ResultKind::ScalarRag => {
                let status = if self.flag("is_critical") {
                    "CRITICAL"
                } else if self.flag("is_problematic") {
                    "PROBLEMATIC"
                } else {
                    "GOOD"
                };
                write!(f, "{status} ({})", self.text("name"))
            }
            ResultKind::Mock => write!(f, "MockResult"),
            _ => write!(f, "Result({})", self.outputs().join(", ")),
        }
    }
}

macro_rules! specialized_result {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name(ValidationResult);

        impl Deref for $name {
            type Target = ValidationResult;

            fn deref(&self) -> &ValidationResult {
                &self.0
            }
        }

        impl From<$name> for ValidationResult {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl TryFrom<ValidationResult> for $name {
            type Error = ValidationResult;

            /// Succeeds when the result was built by this specialization.
            fn try_from(result: ValidationResult) -> Result<Self, Self::Error> {
                if result.kind() == $kind {
                    Ok(Self(result))
                } else {
                    Err(result)
                }
            }
        }
    };
}

specialized_result!(
    /// A single named scalar.
    ScalarResult,
    ResultKind::Scalar
);
specialized_result!(
    /// Outcome of a pass/fail test.
    TestResult,
    ResultKind::Test
);
specialized_result!(
    /// Pass/fail outcome carrying the tested value.
    ScalarTestResult,
    ResultKind::ScalarTest
);
specialized_result!(
    /// Red/amber/green outcome.
    RagResult,
    ResultKind::Rag
);
specialized_result!(
    /// Red/amber/green outcome of a scalar against two limits.
    ScalarRagResult,
    ResultKind::ScalarRag
);
specialized_result!(
    /// A named figure.
    FigureResult,
    ResultKind::Figure
);
specialized_result!(
    /// Grid of results addressed by row and column names.
    ResultTable,
    ResultKind::Table
);

impl ScalarResult {
    /// Scalar `value` under `name`.
    pub fn new(name: impl Into<String>, value: impl Into<OutputValue>) -> Self {
        let result = ValidationResult::of_kind(ResultKind::Scalar);
        result.add_output("name", OutputValue::Text(name.into())).add_output("value", value);
        Self(result)
    }

    /// The `name` output.
    pub fn name(&self) -> Arc<Output> {
        self.output("name")
    }

    /// The `value` output.
    pub fn value(&self) -> Arc<Output> {
        self.output("value")
    }
}

fn build_test(kind: ResultKind, name: String, passed: bool, reasoning: Option<String>) -> ValidationResult {
    let result = ValidationResult::of_kind(kind);
    result
        .add_output("name", name)
        .add_output("passed", passed)
        .add_output("reasoning", reasoning);
    result
}

impl TestResult {
    /// Test outcome; `reasoning` may be absent.
    pub fn new(name: impl Into<String>, passed: bool, reasoning: Option<String>) -> Self {
        Self(build_test(ResultKind::Test, name.into(), passed, reasoning))
    }

    /// The `name` output.
    pub fn name(&self) -> Arc<Output> {
        self.output("name")
    }

    /// The `passed` output.
    pub fn passed(&self) -> Arc<Output> {
        self.output("passed")
    }

    /// The `reasoning` output.
    pub fn reasoning(&self) -> Arc<Output> {
        self.output("reasoning")
    }
}

impl ScalarTestResult {
    /// Test outcome carrying the tested `value`.
    pub fn new(
        name: impl Into<String>,
        passed: bool,
        value: impl Into<OutputValue>,
        reasoning: Option<String>,
    ) -> Self {
        let result = build_test(ResultKind::ScalarTest, name.into(), passed, reasoning);
        result.add_output("value", value);
        Self(result)
    }

    /// The `passed` output.
    pub fn passed(&self) -> Arc<Output> {
        self.output("passed")
    }

    /// The `value` output.
    pub fn value(&self) -> Arc<Output> {
        self.output("value")
    }
}

/// Red/amber/green classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RagColor {
    /// Critical.
    Red,
    /// Problematic.
    Amber,
    /// Good.
    Green,
}

impl RagColor {
    /// Upper-case name, as stored in the `color` output.
    pub fn as_str(&self) -> &'static str {
        match self {
            RagColor::Red => RED,
            RagColor::Amber => AMBER,
            RagColor::Green => GREEN,
        }
    }

    /// Inverse of [`RagColor::as_str`].
    pub fn parse(text: &str) -> Option<RagColor> {
        match text {
            RED => Some(RagColor::Red),
            AMBER => Some(RagColor::Amber),
            GREEN => Some(RagColor::Green),
            _ => None,
        }
    }

    /// Classify `value` against two limits.
    ///
    /// A red limit below the amber limit means higher values are better;
    /// otherwise lower values are better. Returns the color and its reasoning.
    pub fn classify(value: f64, limit_amber: f64, limit_red: f64) -> (RagColor, String) {
        if limit_red < limit_amber {
            if value < limit_red {
                (RagColor::Red, format!("Value ({value:.4}) below red threshold ({limit_red})"))
            } else if value < limit_amber {
                (
                    RagColor::Amber,
                    format!("Value ({value:.4}) below amber threshold ({limit_amber})"),
                )
            } else {
                (
                    RagColor::Green,
                    format!("Value ({value:.4}) above amber threshold ({limit_amber})"),
                )
            }
        } else if value > limit_red {
            (RagColor::Red, format!("Value ({value:.4}) above red threshold ({limit_red})"))
        } else if value > limit_amber {
            (
                RagColor::Amber,
                format!("Value ({value:.4}) above amber threshold ({limit_amber})"),
            )
        } else {
            (
                RagColor::Green,
                format!("Value ({value:.4}) below amber threshold ({limit_amber})"),
            )
        }
    }
}

impl fmt::Display for RagColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn build_rag(kind: ResultKind, name: String, color: RagColor, reasoning: Option<String>) -> ValidationResult {
    let result = build_test(kind, name, color != RagColor::Red, reasoning);
    result
        .add_output("color", color.as_str())
        .add_output("is_good", color == RagColor::Green)
        .add_output("is_critical", color == RagColor::Red)
        .add_output("is_problematic", color == RagColor::Amber);
    result
}

/// Accessors shared by both RAG specializations.
macro_rules! rag_accessors {
    ($name:ident) => {
        impl $name {
            /// The `color` output.
            pub fn color(&self) -> Arc<Output> {
                self.output("color")
            }

            /// Parsed color.
            pub fn rag_color(&self) -> Option<RagColor> {
                self.color().as_str().and_then(RagColor::parse)
            }

            /// The `passed` output; false only when red.
            pub fn passed(&self) -> Arc<Output> {
                self.output("passed")
            }

            /// The `reasoning` output.
            pub fn reasoning(&self) -> Arc<Output> {
                self.output("reasoning")
            }

            /// True when green.
            pub fn is_good(&self) -> Arc<Output> {
                self.output("is_good")
            }

            /// True when red.
            pub fn is_critical(&self) -> Arc<Output> {
                self.output("is_critical")
            }

            /// True when amber.
            pub fn is_problematic(&self) -> Arc<Output> {
                self.output("is_problematic")
            }
        }
    };
}

rag_accessors!(RagResult);
rag_accessors!(ScalarRagResult);

impl RagResult {
    /// Outcome of the given color; anything but red passes.
    pub fn new(name: impl Into<String>, color: RagColor, reasoning: Option<String>) -> Self {
        Self(build_rag(ResultKind::Rag, name.into(), color, reasoning))
    }
}

impl ScalarRagResult {
    /// Classify `value` against the limits.
    pub fn new(name: impl Into<String>, value: f64, limit_amber: f64, limit_red: f64) -> Self {
        let (color, reasoning) = RagColor::classify(value, limit_amber, limit_red);
        let result = build_rag(ResultKind::ScalarRag, name.into(), color, Some(reasoning));
        result
            .add_output("value", value)
            .add_output("limit_red", limit_red)
            .add_output("limit_amber", limit_amber);
        Self(result)
    }

    /// The classified value.
    pub fn value(&self) -> Arc<Output> {
        self.output("value")
    }

    /// The `limit_red` output.
    pub fn limit_red(&self) -> Arc<Output> {
        self.output("limit_red")
    }

    /// The `limit_amber` output.
    pub fn limit_amber(&self) -> Arc<Output> {
        self.output("limit_amber")
    }
}

impl FigureResult {
    /// Figure under `name`.
    pub fn new(name: impl Into<String>, figure: Figure) -> Self {
        let result = ValidationResult::of_kind(ResultKind::Figure);
        result.add_output("name", OutputValue::Text(name.into())).add_output("figure", figure);
        Self(result)
    }

    /// Figure built on first read.
    pub fn lazy<F>(name: impl Into<String>, build: F) -> Self
    where
        F: FnOnce() -> Figure + Send + 'static,
    {
        let result = ValidationResult::of_kind(ResultKind::Figure);
        result
            .add_output("name", OutputValue::Text(name.into()))
            .add_lazy("figure", move || OutputValue::Figure(build()));
        Self(result)
    }

    /// The `name` output.
    pub fn name(&self) -> Arc<Output> {
        self.output("name")
    }

    /// The `figure` output.
    pub fn figure(&self) -> Arc<Output> {
        self.output("figure")
    }
}

impl ResultTable {
    /// Build a table; names must be unique and match the grid's shape.
    pub fn new(
        name: impl Into<String>,
        row_names: Vec<String>,
        column_names: Vec<String>,
        results: Array2<ValidationResult>,
    ) -> Result<Self, ValidationError> {
        if results.dim() != (row_names.len(), column_names.len()) {
            return Err(ValidationError::invalid_argument(
                "ResultTable::new",
                format!(
                    "grid of shape {:?} does not match {} rows and {} columns",
                    results.dim(),
                    row_names.len(),
                    column_names.len()
                ),
            ));
        }
        for (axis, names) in [("row", &row_names), ("column", &column_names)] {
            for (idx, name) in names.iter().enumerate() {
                if names[..idx].contains(name) {
                    return Err(ValidationError::invalid_argument(
                        "ResultTable::new",
                        format!("duplicate {axis} name '{name}'"),
                    ));
                }
            }
        }
        let result = ValidationResult::of_kind(ResultKind::Table);
        result
            .add_output("name", OutputValue::Text(name.into()))
            .add_output("row_names", row_names)
            .add_output("column_names", column_names)
            .add_output("results", results);
        Ok(Self(result))
    }

    /// The `name` output.
    pub fn name(&self) -> Arc<Output> {
        self.output("name")
    }

    /// Row names in grid order.
    pub fn row_names(&self) -> Vec<String> {
        self.names("row_names")
    }

    /// Column names in grid order.
    pub fn column_names(&self) -> Vec<String> {
        self.names("column_names")
    }

    /// The full grid.
    pub fn results(&self) -> Array2<ValidationResult> {
        match self.get("results").map(|output| output.value().clone()) {
            Some(OutputValue::Grid(grid)) => grid,
            _ => Array2::from_shape_fn((0, 0), |_| ValidationResult::new()),
        }
    }

    fn names(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|output| output.value().as_strings())
            .unwrap_or_default()
    }

    /// Sub-grid at the named rows and columns; `None` keeps the whole axis.
    pub fn result_subset(
        &self,
        row_names: Option<&[&str]>,
        column_names: Option<&[&str]>,
    ) -> Result<Array2<ValidationResult>, ValidationError> {
        let mut grid = self.results();
        if let Some(rows) = row_names {
            let indices = positions(&self.row_names(), rows)?;
            grid = grid.select(Axis(0), &indices);
        }
        if let Some(columns) = column_names {
            let indices = positions(&self.column_names(), columns)?;
            grid = grid.select(Axis(1), &indices);
        }
        Ok(grid)
    }

    /// `attribute` output of every result in the named columns, one row per table row.
    pub fn column_results(
        &self,
        column_names: &[&str],
        attribute: &str,
    ) -> Result<Array2<Option<Arc<Output>>>, ValidationError> {
        Ok(self
            .result_subset(None, Some(column_names))?
            .map(|result| result.get(attribute)))
    }

    /// `attribute` output of every result in the named rows.
    pub fn row_results(
        &self,
        row_names: &[&str],
        attribute: &str,
    ) -> Result<Array2<Option<Arc<Output>>>, ValidationError> {
        Ok(self
            .result_subset(Some(row_names), None)?
            .map(|result| result.get(attribute)))
    }

    /// Insert a column of scalar results named `column_name` before position `idx`.
    pub fn insert_column(
        &self,
        values: Vec<OutputValue>,
        column_name: impl Into<String>,
        idx: usize,
    ) -> Result<(), ValidationError> {
        let column_name = column_name.into();
        let grid = self.results();
        let (rows, columns) = grid.dim();
        if values.len() != rows || idx > columns {
            return Err(ValidationError::invalid_argument(
                "ResultTable::insert_column",
                format!(
                    "expected {rows} values and a position up to {columns}, got {} values at {idx}",
                    values.len()
                ),
            ));
        }
        let inserted: Vec<ValidationResult> = values
            .into_iter()
            .map(|value| ScalarResult::new(column_name.clone(), value).into())
            .collect();
        let extended = Array2::from_shape_fn((rows, columns + 1), |(row, column)| {
            match column.cmp(&idx) {
                std::cmp::Ordering::Less => grid[(row, column)].clone(),
                std::cmp::Ordering::Equal => inserted[row].clone(),
                std::cmp::Ordering::Greater => grid[(row, column - 1)].clone(),
            }
        });
        let mut names = self.column_names();
        names.insert(idx, column_name);
        self.add_output("results", extended)
            .add_output("column_names", names);
        Ok(())
    }
}

fn positions(names: &[String], wanted: &[&str]) -> Result<Vec<usize>, ValidationError> {
    wanted
        .iter()
        .map(|name| {
            names.iter().position(|candidate| candidate == name).ok_or_else(|| {
                ValidationError::invalid_argument(
                    "ResultTable::result_subset",
                    format!("unknown name '{name}'"),
                )
            })
        })
        .collect()
}

impl ValidationResult {
    /// Output that a specialization's constructor guarantees to exist.
    fn output(&self, key: &str) -> Arc<Output> {
        self.get(key)
            .unwrap_or_else(|| Arc::new(Output::new(OutputValue::None)))
    }
}
