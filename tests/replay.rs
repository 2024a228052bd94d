use serde_json::json;
use tempfile::tempdir;

use crval::automation::{Registry, Runner, Tape, TapeDocument, record, record_into};
use crval::{
    Arg, CallArgs, Recordable, ScalarResult, TapeConfig, ValidationError, ValidationResult,
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

fn echo(args: &CallArgs) -> Result<Arg, ValidationError> {
    let x = args.require_f64("echo", 0, "x")?;
    Ok(Arg::Result(ScalarResult::new("echo", x).into()))
}

fn adder() -> Recordable {
    crval::recordable!(add)
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_recordable(&adder());
    registry
}

fn value(result: &ValidationResult) -> Option<f64> {
    result.value("value").and_then(|value| value.as_f64())
}

/// Records `add(add(4, 5), 3)`, returning the tape and both results.
fn record_chain() -> (Tape, ValidationResult, ValidationResult) {
    let tape = Tape::new();
    let scope = record_into(&tape);
    let inner = adder().call_result(&CallArgs::positional([4, 5])).unwrap();
    let outer = adder()
        .call_result(&CallArgs::new().with_arg(inner.clone()).with_arg(3))
        .unwrap();
    drop(scope);
    (tape, inner, outer)
}

#[test]
fn replays_a_chain_from_a_json_document() {
    let (tape, _, outer) = record_chain();
    let document = TapeDocument::from_json(&tape.to_json().unwrap()).unwrap();

    let mut runner = Runner::new(document, registry()).unwrap();
    let replayed = runner.run(&outer.recording_uid().unwrap(), false).unwrap();
    assert_eq!(value(&replayed), Some(12.0));
    assert!(!replayed.ptr_eq(&outer));
}

#[test]
fn replays_a_chain_from_a_saved_tape() {
    let (tape, inner, outer) = record_chain();
    let dir = tempdir().unwrap();
    let path = dir.path().join("tape.json");
    tape.save(&path).unwrap();

    let mut runner = Runner::new(path.as_path(), registry()).unwrap();
    assert_eq!(
        runner.uids(),
        [inner.recording_uid().unwrap(), outer.recording_uid().unwrap()]
    );
    let replayed = runner.run(&inner.recording_uid().unwrap(), false).unwrap();
    assert_eq!(value(&replayed), Some(9.0));
}

#[test]
fn replay_is_memoized_per_uid() {
    let (tape, inner, outer) = record_chain();
    let mut runner = Runner::new(tape.to_document().unwrap(), registry()).unwrap();

    let first = runner.run(&outer.recording_uid().unwrap(), false).unwrap();
    let second = runner.run(&outer.recording_uid().unwrap(), false).unwrap();
    assert!(first.ptr_eq(&second));

    // The inner call ran once, as a dependency of the outer one.
    let dependency = runner.run(&inner.recording_uid().unwrap(), false).unwrap();
    let again = runner.run(&inner.recording_uid().unwrap(), false).unwrap();
    assert!(dependency.ptr_eq(&again));
}

#[test]
fn unknown_uids_are_reported() {
    let (tape, _, _) = record_chain();
    let mut runner = Runner::new(&tape, registry()).unwrap();
    let err = runner.run("missing", false).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownUid(uid) if uid == "missing"));
}

#[test]
fn unregistered_functions_fail_to_resolve() {
    let (tape, _, outer) = record_chain();
    let mut runner = Runner::new(&tape, Registry::new()).unwrap();
    let err = runner
        .run(&outer.recording_uid().unwrap(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        ValidationError::UnresolvedReference { ref module, ref name }
            if module == "replay" && name == "add"
    ));
}

#[test]
fn dry_runs_never_reach_the_memo() {
    let (tape, _, outer) = record_chain();
    let uid = outer.recording_uid().unwrap();
    let mut runner = Runner::new(&tape, registry()).unwrap();

    assert!(runner.run(&uid, true).unwrap().is_mock());
    let real = runner.run(&uid, false).unwrap();
    assert!(!real.is_mock());
    assert!(runner.run(&uid, true).unwrap().is_mock());
    assert!(runner.run(&uid, false).unwrap().ptr_eq(&real));
}

#[test]
fn retaping_reuses_recorded_uids() {
    let (tape, inner, outer) = record_chain();
    let mut runner = Runner::new(&tape, registry()).unwrap();

    let retaped = Tape::new();
    let scope = record_into(&retaped);
    let replayed = runner.run(&outer.recording_uid().unwrap(), false).unwrap();
    drop(scope);

    assert_eq!(replayed.recording_uid(), outer.recording_uid());
    assert_eq!(retaped.tests(), tape.tests());
    assert!(retaped.tests().contains_key(&inner.recording_uid().unwrap()));
}

#[test]
fn dry_runs_while_recording_tape_mocks() {
    let (tape, _, outer) = record_chain();
    let uid = outer.recording_uid().unwrap();
    let mut runner = Runner::new(&tape, registry()).unwrap();

    let scope = record();
    let mocked = runner.run(&uid, true).unwrap();
    let taped = scope.tape().tests();
    drop(scope);

    assert!(mocked.is_mock());
    assert_eq!(mocked.recording_uid().as_deref(), Some(uid.as_str()));
    assert!(taped.contains_key(&uid));
    assert!(!runner.run(&uid, false).unwrap().is_mock());
}

#[test]
fn tapes_storing_objects_replay_without_execution() {
    let tape = Tape::with_config(TapeConfig {
        store_objects: true,
        ..TapeConfig::default()
    });
    let scope = record_into(&tape);
    let result = adder().call_result(&CallArgs::positional([1, 2])).unwrap();
    drop(scope);

    let mut runner = Runner::new(&tape, Registry::new()).unwrap();
    let replayed = runner.run(&result.recording_uid().unwrap(), false).unwrap();
    assert!(replayed.ptr_eq(&result));

    // The document alone carries no objects.
    let mut runner = Runner::new(tape.document(), Registry::new()).unwrap();
    assert!(runner.run(&result.recording_uid().unwrap(), false).is_err());
}

#[test]
fn tape_metadata_is_stamped() {
    let (tape, _, _) = record_chain();
    let meta = tape.meta();
    assert_eq!(meta.library_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(meta.date.len(), "16/10/2026".len());
}

#[test]
fn non_finite_arguments_survive_replay() {
    let echoer = crval::recordable!(echo);
    let tape = Tape::new();
    let scope = record_into(&tape);
    let uids: Vec<String> = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY]
        .into_iter()
        .map(|x| {
            echoer
                .call_result(&CallArgs::positional([x]))
                .unwrap()
                .recording_uid()
                .unwrap()
        })
        .collect();
    drop(scope);

    let tests = tape.tests();
    assert_eq!(
        tests[uids[0].as_str()].args,
        vec![json!({"type": "number", "value": "NaN"})]
    );
    assert_eq!(
        tests[uids[2].as_str()].args,
        vec![json!({"type": "number", "value": "-inf"})]
    );

    let mut registry = Registry::new();
    registry.register_recordable(&echoer);
    let document = TapeDocument::from_json(&tape.to_json().unwrap()).unwrap();
    let mut runner = Runner::new(document, registry).unwrap();
    let replayed: Vec<f64> = uids
        .iter()
        .map(|uid| value(&runner.run(uid, false).unwrap()).unwrap())
        .collect();
    assert!(replayed[0].is_nan());
    assert_eq!(replayed[1..], [f64::INFINITY, f64::NEG_INFINITY]);
}
