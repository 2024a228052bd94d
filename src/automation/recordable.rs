//! Interception of calls to recordable functions.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::automation::args::{Arg, CallArgs};
use crate::automation::recording::{active_tape, enter_recordable, inside_recordable};
use crate::automation::registry::{FunctionRef, NativeFn};
use crate::errors::ValidationError;
use crate::result::ValidationResult;
use crate::types::ModulePath;

/// A named function whose outermost calls are taped while recording.
///
/// Outside a recording scope, and for calls made from inside another
/// recordable function, the wrapped function runs untouched. Otherwise the
/// call is executed (or replaced by a mock on dry-run) and handed to the active
/// tape: results are recorded as tests, datasets as ingestions. Any other
/// return value is an [`ValidationError::UnexpectedReturn`].
#[derive(Clone)]
pub struct Recordable {
    module: ModulePath,
    name: String,
    func: NativeFn,
}

impl Recordable {
    /// Wrap `func` under `module::name`.
    pub fn new<F>(module: impl Into<ModulePath>, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Arg, ValidationError> + Send + Sync + 'static,
    {
        Self {
            module: module.into(),
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Module the function is registered under.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to the unwrapped function, for serialization.
    pub fn original(&self) -> FunctionRef {
        FunctionRef::from_native(
            Some((self.module.clone(), self.name.clone())),
            Arc::clone(&self.func),
        )
    }

    /// Reference whose calls go through the recording wrapper.
    pub fn function_ref(&self) -> FunctionRef {
        let wrapper = self.clone();
        FunctionRef::from_native(
            Some((self.module.clone(), self.name.clone())),
            Arc::new(move |args: &CallArgs| wrapper.call(args)),
        )
    }

    /// Call the function, recording it when a tape is active.
    pub fn call(&self, args: &CallArgs) -> Result<Arg, ValidationError> {
        let args = args.clone().split_controls();
        let plain = args.without_controls();
        if inside_recordable() {
            debug!(function = %self.name, "nested recordable call not recorded");
            return (self.func)(&plain);
        }
        let Some(tape) = active_tape() else {
            return (self.func)(&plain);
        };

        let uid = args
            .recording_uuid()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let returned = {
            let _call = enter_recordable();
            if args.is_dry_run() {
                Arg::Result(ValidationResult::mock())
            } else {
                (self.func)(&plain)?
            }
        };

        match returned {
            Arg::Result(result) => {
                tape.record_test(&self.original(), &plain, &uid, &result)?;
                result.set_recording_uid(uid.as_str());
                debug!(function = %self.name, uid = %uid, "recorded test");
                Ok(Arg::Result(result))
            }
            Arg::Dataset(dataset) => {
                tape.record_ingestion(&self.original(), &plain, &dataset)?;
                debug!(function = %self.name, dataset = dataset.id(), "recorded ingestion");
                Ok(Arg::Dataset(dataset))
            }
            other => Err(ValidationError::UnexpectedReturn {
                function: self.name.clone(),
                received: other.kind_name(),
            }),
        }
    }

    /// Call and unwrap a result.
    pub fn call_result(&self, args: &CallArgs) -> Result<ValidationResult, ValidationError> {
        self.call(args)?.into_result(&self.name)
    }
}

impl std::fmt::Debug for Recordable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Recordable({}::{})", self.module, self.name)
    }
}

/// Wrap a `fn(&CallArgs) -> Result<Arg, ValidationError>` as a [`Recordable`]
/// registered under the calling module.
///
/// ```ignore
/// let f = recordable!(add);
/// let g = recordable!(add as "plus");
/// ```
#[macro_export]
macro_rules! recordable {
    ($func:ident) => {
        $crate::automation::Recordable::new(module_path!(), stringify!($func), $func)
    };
    ($func:ident as $name:expr) => {
        $crate::automation::Recordable::new(module_path!(), $name, $func)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::recording::{record, record_into};
    use crate::automation::tape::Tape;

    fn add(args: &CallArgs) -> Result<Arg, ValidationError> {
        let x = args.require_f64("add", 0, "x")?;
        let y = args.require_f64("add", 1, "y")?;
        let result = ValidationResult::new();
        result.add_output("value", x + y);
        Ok(Arg::Result(result))
    }

    fn bare(_: &CallArgs) -> Result<Arg, ValidationError> {
        Ok(Arg::Integer(1))
    }

    #[test]
    fn calls_outside_recording_pass_through() {
        let f = Recordable::new("tests", "add", add);
        let result = f.call_result(&CallArgs::positional([1, 2])).unwrap();
        assert!(result.recording_uid().is_none());
        assert_eq!(result.value("value").and_then(|v| v.as_f64()), Some(3.0));
    }

    #[test]
    fn recorded_results_carry_their_uid() {
        let tape = Tape::new();
        let _scope = record_into(&tape);
        let f = Recordable::new("tests", "add", add);
        let result = f
            .call_result(&CallArgs::positional([1, 2]).with_recording_uuid("fixed"))
            .unwrap();
        assert_eq!(result.recording_uid().as_deref(), Some("fixed"));
        assert_eq!(tape.tests().len(), 1);
        assert!(tape.tests().contains_key("fixed"));
    }

    #[test]
    fn dry_run_records_a_mock() {
        let tape = Tape::new();
        let _scope = record_into(&tape);
        let f = Recordable::new("tests", "add", add);
        let result = f
            .call_result(&CallArgs::positional([1, 2]).with_dry_run(true))
            .unwrap();
        assert!(result.is_mock());
        assert!(result.get("anything").is_some());
    }

    #[test]
    fn bare_values_are_rejected_while_recording() {
        let _scope = record();
        let f = Recordable::new("tests", "bare", bare);
        let err = f.call(&CallArgs::new()).unwrap_err();
        assert!(matches!(err, ValidationError::UnexpectedReturn { ref function, .. } if function == "bare"));
    }

    #[test]
    fn macro_uses_the_calling_module() {
        let f = crate::recordable!(add);
        assert_eq!(f.name(), "add");
        assert_eq!(f.module(), module_path!());
        let g = crate::recordable!(add as "plus");
        assert_eq!(g.name(), "plus");
    }
}
