//! Call arguments of recordable functions.
//!
//! [`Arg`] is the closed set of values that can cross a recorded call
//! boundary. The tape serializer has one handler per variant and the runner
//! rebuilds the same variants from tagged documents.

use indexmap::IndexMap;
use ndarray::ArrayD;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::automation::declarative::DeclarativeObject;
use crate::automation::registry::{FunctionRef, Partial};
use crate::constants::recording::{DRY_RUN_KEY, RECORDING_UUID_KEY};
use crate::dataset::{Dataset, SourcedVector};
use crate::errors::ValidationError;
use crate::result::ValidationResult;
use crate::segmentation::{Segmentation, SegmentationMethod};
use crate::types::RecordingUid;

/// A value passed to, or returned from, a recordable function.
#[derive(Clone)]
pub enum Arg {
    /// Absence of a value.
    None,
    /// Boolean flag.
    Bool(bool),
    /// Integer scalar.
    Integer(i64),
    /// Floating-point scalar; non-finite values are taped as tagged numbers.
    Number(f64),
    /// Text scalar.
    Text(String),
    /// Ordered sequence.
    List(Vec<Arg>),
    /// Plain key-value configuration.
    Map(IndexMap<String, Arg>),
    /// Unordered collection; serialized as a list.
    Set(Vec<Arg>),
    /// A dataset, referenced on the tape by id.
    Dataset(Dataset),
    /// Column bound to its dataset.
    Vector(SourcedVector),
    /// A segmentation of a dataset.
    Segmentation(Segmentation),
    /// Raw numeric array; serialized as nested lists.
    Array(ArrayD<f64>),
    /// Declaratively reconstructible configuration object.
    Object(Arc<dyn DeclarativeObject>),
    /// A named function.
    Function(FunctionRef),
    /// A function with bound arguments.
    Partial(Partial),
    /// A result with provenance.
    Result(ValidationResult),
}

impl Arg {
    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> String {
        match self {
            Arg::None => "none".to_string(),
            Arg::Bool(_) => "bool".to_string(),
            Arg::Integer(_) => "int".to_string(),
            Arg::Number(_) => "float".to_string(),
            Arg::Text(_) => "str".to_string(),
            Arg::List(_) => "list".to_string(),
            Arg::Map(_) => "dict".to_string(),
            Arg::Set(_) => "set".to_string(),
            Arg::Dataset(_) => "Dataset".to_string(),
            Arg::Vector(_) => "SourcedVector".to_string(),
            Arg::Segmentation(_) => "Segmentation".to_string(),
            Arg::Array(_) => "ndarray".to_string(),
            Arg::Object(object) => object.class_name().to_string(),
            Arg::Function(_) => "function".to_string(),
            Arg::Partial(_) => "partial".to_string(),
            Arg::Result(_) => "ValidationResult".to_string(),
        }
    }

    /// True for [`Arg::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Arg::None)
    }

    /// The boolean value, if this is a flag.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The integer value; whole floats convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Arg::Integer(value) => Some(*value),
            Arg::Number(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    /// The numeric value of an integer or float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Integer(value) => Some(*value as f64),
            Arg::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// The text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Items of a list or set.
    pub fn as_list(&self) -> Option<&[Arg]> {
        match self {
            Arg::List(items) | Arg::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map.
    pub fn as_map(&self) -> Option<&IndexMap<String, Arg>> {
        match self {
            Arg::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// The dataset, if this is one.
    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Arg::Dataset(dataset) => Some(dataset),
            _ => None,
        }
    }

    /// The sourced column, if this is one.
    pub fn as_vector(&self) -> Option<&SourcedVector> {
        match self {
            Arg::Vector(vector) => Some(vector),
            _ => None,
        }
    }

    /// The segmentation, if this is one.
    pub fn as_segmentation(&self) -> Option<&Segmentation> {
        match self {
            Arg::Segmentation(segmentation) => Some(segmentation),
            _ => None,
        }
    }

    /// The result, if this is one.
    pub fn as_result(&self) -> Option<&ValidationResult> {
        match self {
            Arg::Result(result) => Some(result),
            _ => None,
        }
    }

    /// The named function, if this is one.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Arg::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Downcast a reconstructible object to its concrete type.
    pub fn as_object<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Object(object) => object.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Floating point values of a numeric list, array, or sourced vector.
    ///
    /// Missing entries become `NaN`.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Arg::Vector(vector) => Some(
                vector
                    .values()
                    .cells()
                    .map(|cell| cell.as_f64().unwrap_or(f64::NAN))
                    .collect(),
            ),
            Arg::Array(array) if array.ndim() == 1 => Some(array.iter().copied().collect()),
            Arg::List(items) => items
                .iter()
                .map(|item| if item.is_none() { Some(f64::NAN) } else { item.as_f64() })
                .collect(),
            _ => None,
        }
    }

    /// Unwrap a result returned by `function`.
    pub fn into_result(self, function: &str) -> Result<ValidationResult, ValidationError> {
        match self {
            Arg::Result(result) => Ok(result),
            other => Err(ValidationError::UnexpectedReturn {
                function: function.to_string(),
                received: other.kind_name(),
            }),
        }
    }

    /// Unwrap a dataset returned by `function`.
    pub fn into_dataset(self, function: &str) -> Result<Dataset, ValidationError> {
        match self {
            Arg::Dataset(dataset) => Ok(dataset),
            other => Err(ValidationError::UnexpectedReturn {
                function: function.to_string(),
                received: other.kind_name(),
            }),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::None => f.write_str("None"),
            Arg::Bool(value) => write!(f, "Bool({value})"),
            Arg::Integer(value) => write!(f, "Integer({value})"),
            Arg::Number(value) => write!(f, "Number({value})"),
            Arg::Text(value) => write!(f, "Text({value:?})"),
            Arg::List(items) => f.debug_tuple("List").field(items).finish(),
            Arg::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Arg::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Arg::Dataset(dataset) => write!(f, "Dataset({})", dataset.id()),
            Arg::Vector(vector) => {
                write!(f, "Vector({}[{}])", vector.dataset().id(), vector.name())
            }
            Arg::Segmentation(segmentation) => write!(f, "Segmentation({})", segmentation.id()),
            Arg::Array(array) => write!(f, "Array({:?})", array.shape()),
            Arg::Object(object) => write!(f, "Object({object:?})"),
            Arg::Function(function) => write!(f, "Function({function:?})"),
            Arg::Partial(partial) => write!(f, "Partial({partial:?})"),
            Arg::Result(result) => write!(f, "Result({result:?})"),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::None => f.write_str("None"),
            Arg::Bool(value) => write!(f, "{value}"),
            Arg::Integer(value) => write!(f, "{value}"),
            Arg::Number(value) => write!(f, "{value}"),
            Arg::Text(value) => write!(f, "{value:?}"),
            Arg::Dataset(dataset) => write!(f, "{dataset}"),
            Arg::Segmentation(segmentation) => write!(f, "{segmentation}"),
            Arg::Result(result) => write!(f, "{result}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Integer(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Integer(i64::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Number(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::None, Into::into)
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(value: Vec<Arg>) -> Self {
        Arg::List(value)
    }
}

impl From<IndexMap<String, Arg>> for Arg {
    fn from(value: IndexMap<String, Arg>) -> Self {
        Arg::Map(value)
    }
}

impl From<Dataset> for Arg {
    fn from(value: Dataset) -> Self {
        Arg::Dataset(value)
    }
}

impl From<SourcedVector> for Arg {
    fn from(value: SourcedVector) -> Self {
        Arg::Vector(value)
    }
}

impl From<Segmentation> for Arg {
    fn from(value: Segmentation) -> Self {
        Arg::Segmentation(value)
    }
}

impl From<ArrayD<f64>> for Arg {
    fn from(value: ArrayD<f64>) -> Self {
        Arg::Array(value)
    }
}

impl From<SegmentationMethod> for Arg {
    fn from(value: SegmentationMethod) -> Self {
        Arg::Object(Arc::new(value))
    }
}

impl From<FunctionRef> for Arg {
    fn from(value: FunctionRef) -> Self {
        Arg::Function(value)
    }
}

impl From<Partial> for Arg {
    fn from(value: Partial) -> Self {
        Arg::Partial(value)
    }
}

impl From<ValidationResult> for Arg {
    fn from(value: ValidationResult) -> Self {
        Arg::Result(value)
    }
}

/// Positional and keyword arguments of one call, plus recording controls.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    /// Positional arguments.
    pub args: Vec<Arg>,
    /// Keyword arguments in call order.
    pub kwargs: IndexMap<String, Arg>,
    recording_uuid: Option<RecordingUid>,
    dry_run: bool,
}

impl CallArgs {
    /// Empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments with the given positional values.
    pub fn positional<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Use `uid` as the correlation id when the call is recorded.
    pub fn with_recording_uuid(mut self, uid: impl Into<RecordingUid>) -> Self {
        self.recording_uuid = Some(uid.into());
        self
    }

    /// Substitute a mock result for the real computation when recorded.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Correlation id requested for the recorded call.
    pub fn recording_uuid(&self) -> Option<&str> {
        self.recording_uuid.as_deref()
    }

    /// True when the call should return a mock result.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Move the reserved `recording_uuid` and `_dry_run` keywords into controls.
    pub(crate) fn split_controls(mut self) -> Self {
        if let Some(uid) = self.kwargs.shift_remove(RECORDING_UUID_KEY)
            && let Arg::Text(uid) = uid
        {
            self.recording_uuid = Some(uid);
        }
        if let Some(flag) = self.kwargs.shift_remove(DRY_RUN_KEY) {
            self.dry_run = flag.as_bool().unwrap_or(false);
        }
        self
    }

    /// Same arguments without recording controls.
    pub(crate) fn without_controls(&self) -> Self {
        Self {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            recording_uuid: None,
            dry_run: false,
        }
    }

    /// Keyword `name`, falling back to the positional argument at `idx`.
    ///
    /// Explicit `None` values count as absent.
    pub fn get(&self, idx: usize, name: &str) -> Option<&Arg> {
        self.kwargs
            .get(name)
            .or_else(|| self.args.get(idx))
            .filter(|arg| !arg.is_none())
    }

    /// Like [`CallArgs::get`], failing with `InvalidArgument` when absent.
    pub fn require(&self, function: &str, idx: usize, name: &str) -> Result<&Arg, ValidationError> {
        self.get(idx, name).ok_or_else(|| {
            ValidationError::invalid_argument(function, format!("missing argument '{name}'"))
        })
    }

    /// Required numeric argument.
    pub fn require_f64(&self, function: &str, idx: usize, name: &str) -> Result<f64, ValidationError> {
        let arg = self.require(function, idx, name)?;
        arg.as_f64().ok_or_else(|| {
            ValidationError::invalid_argument(
                function,
                format!("'{name}' must be numeric, got {}", arg.kind_name()),
            )
        })
    }

    /// Required numeric vector argument.
    pub fn require_vector(
        &self,
        function: &str,
        idx: usize,
        name: &str,
    ) -> Result<Vec<f64>, ValidationError> {
        let arg = self.require(function, idx, name)?;
        arg.to_f64_vec().ok_or_else(|| {
            ValidationError::invalid_argument(
                function,
                format!("'{name}' must be a numeric vector, got {}", arg.kind_name()),
            )
        })
    }

    /// Optional text argument.
    pub fn text(&self, idx: usize, name: &str) -> Option<&str> {
        self.get(idx, name).and_then(Arg::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lookup_wins_over_position() {
        let call = CallArgs::positional([1, 2]).with_kwarg("y", 5);
        assert_eq!(call.get(0, "x").and_then(Arg::as_i64), Some(1));
        assert_eq!(call.get(1, "y").and_then(Arg::as_i64), Some(5));
        assert!(call.get(2, "z").is_none());
        assert!(call.require("f", 2, "z").is_err());
    }

    #[test]
    fn reserved_keywords_become_controls() {
        let call = CallArgs::positional([1])
            .with_kwarg(RECORDING_UUID_KEY, "uid-1")
            .with_kwarg(DRY_RUN_KEY, true)
            .split_controls();
        assert_eq!(call.recording_uuid(), Some("uid-1"));
        assert!(call.is_dry_run());
        assert!(call.kwargs.is_empty());
        assert!(call.without_controls().recording_uuid().is_none());
    }

    #[test]
    fn unexpected_return_names_function_and_type() {
        let err = Arg::Integer(3).into_result("bad").unwrap_err();
        assert_eq!(
            err.to_string(),
            "tried recording function 'bad', expected a result or a dataset but received int"
        );
    }

    #[test]
    fn numeric_lists_convert_with_missing_as_nan() {
        let list = Arg::List(vec![Arg::Integer(1), Arg::None, Arg::Number(2.5)]);
        let values = list.to_f64_vec().unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 2.5);
        assert!(Arg::Text("x".into()).to_f64_vec().is_none());
    }
}
