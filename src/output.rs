//! Lazy, self-describing outputs.
//!
//! An [`Output`] is either evaluated at construction or holds a producer that
//! runs on the first read of its value or type. Evaluation happens at most
//! once; the resolved value and its [`OutputType`] are cached for the life of
//! the output.

use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, OnceLock, RwLock};

use crate::constants::output::{DESCRIPTION_MIN_CHARS, FORMAT_DECIMALS};
use crate::result::ValidationResult;
use crate::types::{OutputKey, RecordingUid};

/// Classification of an output value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputType {
    /// Number, flag, or short text.
    Scalar,
    /// Long text or a list of lines.
    Description,
    /// A figure.
    Figure,
    /// Not evaluated yet.
    Unresolved,
    /// No recognized shape.
    Unknown,
    /// One-dimensional array.
    Vector,
    /// Two-dimensional array or result grid.
    Matrix,
}

/// One named series of a figure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Legend name.
    pub name: String,
    /// Abscissae.
    pub x: Vec<f64>,
    /// Ordinates.
    pub y: Vec<f64>,
}

/// Plot description handed to the report layer; rendering happens elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// Figure title.
    pub title: String,
    /// Series in drawing order.
    pub traces: Vec<Trace>,
}

impl Figure {
    /// Empty figure.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            traces: Vec::new(),
        }
    }

    /// Append a series.
    pub fn with_trace(mut self, name: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        self.traces.push(Trace {
            name: name.into(),
            x,
            y,
        });
        self
    }
}

/// Concrete value held by an output.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputValue {
    /// No value.
    None,
    /// Flag.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Float.
    Number(f64),
    /// Text.
    Text(String),
    /// List of values.
    List(Vec<OutputValue>),
    /// Numeric array of any rank.
    Array(ArrayD<f64>),
    /// Figure description.
    Figure(Figure),
    /// Nested result.
    Result(ValidationResult),
    /// Row-major grid of results, as held by result tables.
    Grid(Array2<ValidationResult>),
}

impl OutputValue {
    /// Classify the value by shape.
    pub fn classify(&self) -> OutputType {
        match self {
            OutputValue::Text(text) if text.chars().count() > DESCRIPTION_MIN_CHARS => {
                OutputType::Description
            }
            OutputValue::Text(_)
            | OutputValue::Bool(_)
            | OutputValue::Integer(_)
            | OutputValue::Number(_) => OutputType::Scalar,
            OutputValue::List(_) => OutputType::Description,
            OutputValue::Figure(_) => OutputType::Figure,
            OutputValue::Array(array) => match array.ndim() {
                0 => OutputType::Scalar,
                1 => OutputType::Vector,
                2 => OutputType::Matrix,
                _ => OutputType::Unknown,
            },
            OutputValue::Grid(_) => OutputType::Matrix,
            OutputValue::None | OutputValue::Result(_) => OutputType::Unknown,
        }
    }

    /// Numeric view of a scalar value (including rank-0 arrays).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Integer(value) => Some(*value as f64),
            OutputValue::Number(value) => Some(*value),
            OutputValue::Bool(value) => Some(f64::from(u8::from(*value))),
            OutputValue::Array(array) if array.ndim() == 0 => array.first().copied(),
            _ => None,
        }
    }

    /// The flag, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OutputValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The text, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OutputValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// The nested result, if this is one.
    pub fn as_result(&self) -> Option<&ValidationResult> {
        match self {
            OutputValue::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Text items of a list value.
    pub fn as_strings(&self) -> Option<Vec<String>> {
        match self {
            OutputValue::List(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// True for [`OutputValue::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, OutputValue::None)
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputValue::None => write!(f, "None"),
            OutputValue::Bool(value) => write!(f, "{value}"),
            OutputValue::Integer(value) => write!(f, "{value}"),
            OutputValue::Number(value) => write!(f, "{value}"),
            OutputValue::Text(value) => write!(f, "{value}"),
            OutputValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            OutputValue::Array(array) => write!(f, "{array}"),
            OutputValue::Figure(figure) => write!(f, "<Figure: {}>", figure.title),
            OutputValue::Result(result) => write!(f, "{result}"),
            OutputValue::Grid(grid) => {
                let (rows, columns) = grid.dim();
                write!(f, "<{rows}x{columns} results>")
            }
        }
    }
}

impl From<bool> for OutputValue {
    fn from(value: bool) -> Self {
        OutputValue::Bool(value)
    }
}

impl From<i64> for OutputValue {
    fn from(value: i64) -> Self {
        OutputValue::Integer(value)
    }
}

impl From<usize> for OutputValue {
    fn from(value: usize) -> Self {
        OutputValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for OutputValue {
    fn from(value: f64) -> Self {
        OutputValue::Number(value)
    }
}

impl From<&str> for OutputValue {
    fn from(value: &str) -> Self {
        OutputValue::Text(value.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(value: String) -> Self {
        OutputValue::Text(value)
    }
}

impl From<Option<String>> for OutputValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(OutputValue::None, OutputValue::Text)
    }
}

impl From<Vec<String>> for OutputValue {
    fn from(value: Vec<String>) -> Self {
        OutputValue::List(value.into_iter().map(OutputValue::Text).collect())
    }
}

impl From<Figure> for OutputValue {
    fn from(value: Figure) -> Self {
        OutputValue::Figure(value)
    }
}

impl From<ValidationResult> for OutputValue {
    fn from(value: ValidationResult) -> Self {
        OutputValue::Result(value)
    }
}

impl From<ArrayD<f64>> for OutputValue {
    fn from(value: ArrayD<f64>) -> Self {
        OutputValue::Array(value)
    }
}

impl From<Array1<f64>> for OutputValue {
    fn from(value: Array1<f64>) -> Self {
        OutputValue::Array(value.into_dyn())
    }
}

impl From<Array2<f64>> for OutputValue {
    fn from(value: Array2<f64>) -> Self {
        OutputValue::Array(value.into_dyn())
    }
}

impl From<Array2<ValidationResult>> for OutputValue {
    fn from(value: Array2<ValidationResult>) -> Self {
        OutputValue::Grid(value)
    }
}

type Producer = Box<dyn FnOnce() -> OutputValue + Send>;

#[derive(Debug)]
struct Evaluated {
    value: OutputValue,
    output_type: OutputType,
}

/// A named value inside a result, evaluated at most once.
pub struct Output {
    evaluated: OnceLock<Evaluated>,
    producer: Mutex<Option<Producer>>,
    source: RwLock<Option<(RecordingUid, OutputKey)>>,
}

impl Output {
    /// An output over an already computed value.
    pub fn new(value: impl Into<OutputValue>) -> Self {
        let value = value.into();
        let output_type = value.classify();
        Self {
            evaluated: OnceLock::from(Evaluated { value, output_type }),
            producer: Mutex::new(None),
            source: RwLock::new(None),
        }
    }

    /// An unresolved output; `producer` runs on the first read.
    pub fn lazy<F>(producer: F) -> Self
    where
        F: FnOnce() -> OutputValue + Send + 'static,
    {
        Self {
            evaluated: OnceLock::new(),
            producer: Mutex::new(Some(Box::new(producer))),
            source: RwLock::new(None),
        }
    }

    fn evaluate(&self) -> &Evaluated {
        self.evaluated.get_or_init(|| {
            let producer = self
                .producer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            let value = producer.map_or(OutputValue::None, |producer| producer());
            let output_type = value.classify();
            Evaluated { value, output_type }
        })
    }

    /// Resolved value; forces evaluation.
    pub fn value(&self) -> &OutputValue {
        &self.evaluate().value
    }

    /// Resolved type; forces evaluation.
    pub fn output_type(&self) -> OutputType {
        self.evaluate().output_type
    }

    /// Current type without forcing evaluation: `Unresolved` until the first read.
    pub fn peek_type(&self) -> OutputType {
        self.evaluated
            .get()
            .map_or(OutputType::Unresolved, |evaluated| evaluated.output_type)
    }

    /// True once the value has been computed.
    pub fn is_resolved(&self) -> bool {
        self.evaluated.get().is_some()
    }

    /// Display text of the value; scalars use the report number format.
    pub fn formatted_value(&self) -> String {
        let evaluated = self.evaluate();
        match (&evaluated.value, evaluated.output_type) {
            (OutputValue::Integer(value), _) => format_scalar(*value as f64, true),
            (OutputValue::Number(value), _) => format_scalar(*value, false),
            (OutputValue::Array(array), OutputType::Scalar) => array
                .first()
                .map_or_else(|| String::from("nan"), |value| format_scalar(*value, false)),
            (value, _) => value.to_string(),
        }
    }

    /// Numeric view of the resolved value.
    pub fn as_f64(&self) -> Option<f64> {
        self.value().as_f64()
    }

    /// Flag view of the resolved value.
    pub fn as_bool(&self) -> Option<bool> {
        self.value().as_bool()
    }

    /// Text view of the resolved value.
    pub fn as_str(&self) -> Option<&str> {
        self.value().as_str()
    }

    /// Nested result held by the resolved value.
    pub fn as_result(&self) -> Option<&ValidationResult> {
        self.value().as_result()
    }

    /// Attach provenance: the recording that produced the owning result and this output's key.
    pub fn add_source(&self, recording_uid: impl Into<RecordingUid>, key: impl Into<OutputKey>) {
        let mut source = self
            .source
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *source = Some((recording_uid.into(), key.into()));
    }

    /// True once provenance is attached.
    pub fn has_source(&self) -> bool {
        self.source().is_some()
    }

    /// Recording uid and key this output was produced under.
    pub fn source(&self) -> Option<(RecordingUid, OutputKey)> {
        self.source
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.evaluated.get() {
            Some(evaluated) => write!(f, "O({:?})", evaluated.value),
            None => write!(f, "O(<unresolved>)"),
        }
    }
}

impl PartialEq<OutputValue> for Output {
    fn eq(&self, other: &OutputValue) -> bool {
        self.value() == other
    }
}

/// Format a scalar for reports.
///
/// Large magnitudes get thousands separators and `M`/`B` suffixes; small
/// fractions keep enough decimals to show their first significant digits,
/// with trailing zeros trimmed.
pub fn format_scalar(value: f64, integer: bool) -> String {
    if value.is_nan() {
        return String::from("nan");
    }
    if value.is_infinite() {
        return String::from(if value < 0.0 { "-inf" } else { "inf" });
    }
    let magnitude = value.abs();
    if magnitude > 1e12 {
        return format!("{} B", trim_decimals(&grouped(value / 1e9, 2)));
    }
    if magnitude > 1e9 {
        return format!("{} M", trim_decimals(&grouped(value / 1e6, 2)));
    }
    if magnitude >= 1000.0 || integer {
        return grouped(value, 0);
    }

    let shortest = value.to_string();
    let max_decimals = shortest
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.trim_end_matches('0').len());
    let fixed = format!("{:.*}", FORMAT_DECIMALS, magnitude);
    let fraction = fixed.split_once('.').map_or("", |(_, fraction)| fraction);
    let leading_zeros = fraction.len() - fraction.trim_start_matches('0').len();
    if leading_zeros == FORMAT_DECIMALS {
        return grouped(value, 0);
    }
    let digits = if magnitude >= 100.0 {
        max_decimals.min(1)
    } else if magnitude >= 10.0 {
        max_decimals.min(2)
    } else if magnitude >= 1.0 {
        max_decimals.min(3)
    } else if leading_zeros <= 3 {
        max_decimals.min(3 + leading_zeros)
    } else {
        max_decimals.min(5)
    };
    trim_decimals(&grouped(value, digits))
}

/// Fixed-point rendering with `,` thousands separators.
fn grouped(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };
    let mut out = String::with_capacity(fixed.len() + whole.len() / 3 + 1);
    if value.is_sign_negative() && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    for (idx, digit) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

fn trim_decimals(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}
