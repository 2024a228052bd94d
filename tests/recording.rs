use serde_json::json;

use crval::automation::{
    Recordable, Tape, active_tape, avoid_recording, is_recording, record, record_into,
    session_tape,
};
use crval::{
    Arg, CallArgs, Column, Dataset, ScalarResult, Table, ValidationError, ValidationResult,
};

fn number(arg: &Arg) -> f64 {
    arg.as_result()
        .and_then(|result| result.value("value"))
        .and_then(|value| value.as_f64())
        .or_else(|| arg.as_f64())
        .unwrap_or(f64::NAN)
}

fn add(args: &CallArgs) -> Result<Arg, ValidationError> {
    let x = number(args.require("add", 0, "x")?);
    let y = number(args.require("add", 1, "y")?);
    Ok(Arg::Result(ScalarResult::new("sum", x + y).into()))
}

fn add_twice(args: &CallArgs) -> Result<Arg, ValidationError> {
    let inner = crval::recordable!(add).call(args)?;
    crval::recordable!(add).call(&CallArgs::new().with_arg(inner).with_arg(0))
}

fn count(args: &CallArgs) -> Result<Arg, ValidationError> {
    Ok(Arg::Integer(args.args.len() as i64))
}

#[test]
fn calls_outside_a_recording_pass_through() {
    assert!(!is_recording());
    let result = crval::recordable!(add)
        .call_result(&CallArgs::positional([3, 4]))
        .unwrap();
    assert_eq!(result.value("value").and_then(|v| v.as_f64()), Some(7.0));
    assert!(result.recording_uid().is_none());
    assert!(!result.get("value").unwrap().has_source());
    assert!(session_tape().is_none());
}

#[test]
fn positional_and_keyword_arguments_are_taped_as_given() {
    let adder = crval::recordable!(add);
    let scope = record();
    let positional = adder.call_result(&CallArgs::positional([3, 4])).unwrap();
    let keywords = adder
        .call_result(&CallArgs::new().with_kwarg("y", 3).with_kwarg("x", 4))
        .unwrap();
    let tests = scope.tape().tests();
    drop(scope);

    assert_eq!(tests.len(), 2);
    let first = &tests[positional.recording_uid().unwrap().as_str()];
    assert_eq!(first.module, "recording");
    assert_eq!(first.name, "add");
    assert_eq!(first.args, vec![json!(3), json!(4)]);
    assert!(first.kwargs.is_empty());

    let second = &tests[keywords.recording_uid().unwrap().as_str()];
    assert!(second.args.is_empty());
    assert_eq!(
        second.kwargs.iter().collect::<Vec<_>>(),
        [(&"y".to_string(), &json!(3)), (&"x".to_string(), &json!(4))]
    );
    assert_eq!(keywords.value("value").and_then(|v| v.as_f64()), Some(7.0));
}

#[test]
fn recorded_outputs_carry_provenance() {
    let scope = record();
    let result = crval::recordable!(add)
        .call_result(&CallArgs::positional([1, 2]).with_recording_uuid("fixed"))
        .unwrap();
    drop(scope);

    assert_eq!(result.recording_uid().as_deref(), Some("fixed"));
    let output = result.get("value").unwrap();
    assert_eq!(
        output.source(),
        Some(("fixed".to_string(), "value".to_string()))
    );
}

#[test]
fn recorded_results_serialize_as_references() {
    let adder = crval::recordable!(add);
    let scope = record();
    let inner = adder.call_result(&CallArgs::positional([4, 5])).unwrap();
    let outer = adder
        .call_result(&CallArgs::new().with_arg(inner.clone()).with_arg(3))
        .unwrap();
    let tests = scope.tape().tests();
    drop(scope);

    assert_eq!(outer.value("value").and_then(|v| v.as_f64()), Some(12.0));
    let descriptor = &tests[outer.recording_uid().unwrap().as_str()];
    assert_eq!(
        descriptor.args[0],
        json!({"type": "result", "source_uid": inner.recording_uid().unwrap()})
    );
}

#[test]
fn nested_recordable_calls_are_not_taped() {
    let scope = record();
    let result = crval::recordable!(add_twice)
        .call_result(&CallArgs::positional([2, 3]))
        .unwrap();
    let tests = scope.tape().tests();
    drop(scope);

    assert_eq!(result.value("value").and_then(|v| v.as_f64()), Some(5.0));
    assert_eq!(tests.len(), 1);
    assert_eq!(tests.values().next().unwrap().name, "add_twice");

    // Suppression does not leak into later calls.
    let scope = record();
    crval::recordable!(add)
        .call(&CallArgs::positional([1, 1]))
        .unwrap();
    assert_eq!(scope.tape().tests().len(), 2);
}

#[test]
fn unexpected_returns_fail_only_while_recording() {
    let counter = crval::recordable!(count);
    assert!(matches!(
        counter.call(&CallArgs::positional([1, 2])).unwrap(),
        Arg::Integer(2)
    ));

    let _scope = record();
    let err = counter.call(&CallArgs::positional([1, 2])).unwrap_err();
    match err {
        ValidationError::UnexpectedReturn { function, received } => {
            assert_eq!(function, "count");
            assert_eq!(received, "int");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unrecorded_results_cannot_be_passed_to_recorded_calls() {
    let adder = crval::recordable!(add);
    let loose: ValidationResult = ScalarResult::new("sum", 1.0).into();
    let scope = record();
    let err = adder
        .call(&CallArgs::new().with_arg(loose).with_arg(1))
        .unwrap_err();
    assert!(matches!(err, ValidationError::MissingProvenance));
    assert!(scope.tape().tests().is_empty());
}

#[test]
fn rejected_calls_register_no_datasets() {
    let adder = crval::recordable!(add);
    let table = Table::new([("score", Column::Numeric(vec![0.2, 0.8]))]).unwrap();
    let loose: ValidationResult = ScalarResult::new("sum", 1.0).into();
    let scope = record();
    let err = adder
        .call(&CallArgs::new().with_arg(Dataset::new("D1", table)).with_arg(loose))
        .unwrap_err();
    assert!(matches!(err, ValidationError::MissingProvenance));
    assert!(scope.tape().tests().is_empty());
    assert!(scope.tape().datasets().is_empty());
}

#[test]
fn avoid_recording_suspends_the_active_tape() {
    let adder = crval::recordable!(add);
    let scope = record();
    {
        let _paused = avoid_recording();
        assert!(!is_recording());
        adder.call(&CallArgs::positional([1, 2])).unwrap();
    }
    assert!(is_recording());
    adder.call(&CallArgs::positional([1, 2])).unwrap();
    assert_eq!(scope.tape().tests().len(), 1);
}

#[test]
fn session_tape_outlives_scopes() {
    let adder = crval::recordable!(add);
    {
        let _scope = record();
        adder.call(&CallArgs::positional([1, 2])).unwrap();
    }
    assert!(active_tape().is_none());
    {
        let _scope = record();
        adder.call(&CallArgs::positional([3, 4])).unwrap();
    }
    assert_eq!(session_tape().unwrap().tests().len(), 2);
}

#[test]
fn explicit_tapes_do_not_touch_the_session() {
    let tape = Tape::new();
    {
        let _scope = record_into(&tape);
        assert!(active_tape().unwrap().ptr_eq(&tape));
        crval::recordable!(add)
            .call(&CallArgs::positional([1, 2]))
            .unwrap();
    }
    assert_eq!(tape.tests().len(), 1);
    assert!(session_tape().is_none());
}

#[test]
fn dry_runs_tape_a_mock() {
    let scope = record();
    let result = crval::recordable!(add)
        .call_result(&CallArgs::positional([1, 2]).with_dry_run(true))
        .unwrap();
    assert!(result.is_mock());
    assert!(result.get("anything").unwrap().as_result().unwrap().is_mock());

    let tests = scope.tape().tests();
    let descriptor = &tests[result.recording_uid().unwrap().as_str()];
    assert_eq!(descriptor.args, vec![json!(1), json!(2)]);
    assert!(descriptor.kwargs.is_empty());
}

#[test]
fn renamed_recordables_tape_their_registered_name() {
    let plus: Recordable = crval::recordable!(add as "plus");
    let scope = record();
    plus.call(&CallArgs::positional([1, 2])).unwrap();
    assert_eq!(scope.tape().tests().values().next().unwrap().name, "plus");
}
