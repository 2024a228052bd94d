use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::tempdir;

use crval::automation::{DatasetDescriptor, Registry, Runner, Tape, record_into};
use crval::ingestion::read_csv;
use crval::segmentation::ByGroup;
use crval::{
    Arg, BucketLabel, CallArgs, Dataset, RagColor, Recordable, ScalarRagResult, ScalarResult,
    ValidationError,
};

const DEVELOPMENT: &str = "\
segmentor 1,score,outcome
PRIVAT,0.9,1
PRIVAT,0.7,0
PRIVAT,0.2,0
ERHVERV,0.4,1
ERHVERV,0.6,0
";

const MONITORING: &str = "\
segmentor 1,score,outcome
PRIVAT,0.1,1
PRIVAT,0.5,0
PRIVAT,0.9,0
ERHVERV,0.5,1
ERHVERV,0.2,0
";

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().to_string()
}

fn count_segments(args: &CallArgs) -> Result<Arg, ValidationError> {
    let segmentation = args
        .get(0, "segmentation")
        .and_then(Arg::as_segmentation)
        .ok_or_else(|| ValidationError::InvalidArgument {
            function: "count_segments".to_string(),
            details: "expected a segmentation".to_string(),
        })?;
    let total: usize = segmentation
        .segments()
        .iter()
        .map(Dataset::observations)
        .sum();
    let result = ScalarResult::new("segments", segmentation.len() as f64);
    result.add_output("observations", total as f64);
    Ok(Arg::Result(result.into()))
}

fn counter() -> Recordable {
    crval::recordable!(count_segments)
}

/// Ingests `path` as "A", then records `count_segments` over its segmentation by `method`.
fn record_segment_count(path: &str, method: ByGroup) -> (Tape, String) {
    let registry = Registry::with_builtins();
    let from_csv = registry.function("crval::ingestion", "from_csv").unwrap();
    let tape = Tape::new();
    let scope = record_into(&tape);
    let dataset = from_csv
        .call(&CallArgs::positional([path, "A"]))
        .unwrap()
        .into_dataset("from_csv")
        .unwrap();
    let segmentation = dataset.segment("segmentor 1", method.into()).unwrap();
    let result = counter()
        .call_result(&CallArgs::new().with_arg(segmentation))
        .unwrap();
    drop(scope);
    (tape, result.recording_uid().unwrap())
}

fn replay_registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register_recordable(&counter());
    registry
}

/// Ingests `path` as "A" and records a Gini on its PRIVAT segment.
fn record_segment_gini(path: &str) -> (Tape, Dataset, String) {
    let registry = Registry::with_builtins();
    let from_csv = registry.function("crval::ingestion", "from_csv").unwrap();
    let gini = registry.function("crval::metrics", "gini").unwrap();

    let tape = Tape::new();
    let scope = record_into(&tape);
    let dataset = from_csv
        .call(&CallArgs::positional([path, "A"]))
        .unwrap()
        .into_dataset("from_csv")
        .unwrap();
    let segment = dataset
        .segment("segmentor 1", ByGroup::inferred().into())
        .unwrap()
        .get(&BucketLabel::from("PRIVAT"))
        .unwrap();
    let result = gini
        .call(
            &CallArgs::new()
                .with_arg(segment.column("score").unwrap())
                .with_arg(segment.column("outcome").unwrap()),
        )
        .unwrap()
        .into_result("gini")
        .unwrap();
    drop(scope);
    (tape, segment, result.recording_uid().unwrap())
}

#[test]
fn segments_are_taped_by_provenance() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "development.csv", DEVELOPMENT);
    let (tape, segment, uid) = record_segment_gini(&path);
    assert_eq!(segment.id(), "A>segmentor 1=PRIVAT");

    let datasets = tape.datasets();
    assert_eq!(
        datasets.keys().collect::<Vec<_>>(),
        ["A", "A>segmentor 1=PRIVAT"]
    );
    assert!(matches!(
        &datasets["A"],
        DatasetDescriptor::Ingested { source, .. } if source.name == "from_csv"
    ));
    assert_eq!(datasets["A>segmentor 1=PRIVAT"].parent(), Some("A"));

    let call = &tape.tests()[uid.as_str()];
    assert_eq!(call.module, "crval::metrics");
    assert_eq!(
        call.args[0],
        json!({"type": "sourcedarray", "dataset": "A>segmentor 1=PRIVAT", "name": "score"})
    );
}

#[test]
fn replay_reingests_and_resegments() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "development.csv", DEVELOPMENT);
    let (tape, segment, uid) = record_segment_gini(&path);

    let mut runner = Runner::new(tape.to_document().unwrap(), Registry::with_builtins()).unwrap();
    let replayed = runner.run(&uid, false).unwrap();
    assert_eq!(
        replayed.value("value").and_then(|value| value.as_f64()),
        Some(1.0)
    );

    let rebuilt = runner.dataset("A>segmentor 1=PRIVAT").unwrap();
    assert_eq!(rebuilt.id(), segment.id());
    assert_eq!(rebuilt.observations(), 3);
    assert!(!rebuilt.ptr_eq(&segment));
}

#[test]
fn replay_against_substituted_data_rewrites_segment_ids() {
    let dir = tempdir().unwrap();
    let development = write(dir.path(), "development.csv", DEVELOPMENT);
    let monitoring = write(dir.path(), "monitoring.csv", MONITORING);
    let (tape, _, uid) = record_segment_gini(&development);

    let substitute = read_csv(&monitoring, Some("B"), b',').unwrap();
    let mut runner = Runner::new(&tape, Registry::with_builtins())
        .unwrap()
        .with_datasets([("A", substitute)]);

    // The substituted segment ranks its only default last.
    let replayed = runner.run(&uid, false).unwrap();
    let gini = replayed.value("value").and_then(|value| value.as_f64()).unwrap();
    assert!(gini < 0.0);

    let segment = runner.dataset("A>segmentor 1=PRIVAT").unwrap();
    assert_eq!(segment.id(), "B>segmentor 1=PRIVAT");
    assert_eq!(segment.parent().unwrap().id(), "B");
    assert_eq!(segment.observations(), 3);

    // Siblings are reachable under their recorded-parent ids as well.
    let sibling = runner.dataset("A>segmentor 1=ERHVERV").unwrap();
    assert_eq!(sibling.id(), "B>segmentor 1=ERHVERV");
}

#[test]
fn segments_of_unknown_parents_cannot_be_replayed() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "development.csv", DEVELOPMENT);
    let (tape, _, _) = record_segment_gini(&path);

    let mut document = tape.document();
    document.datasets.shift_remove("A");
    let mut runner = Runner::new(document, Registry::with_builtins()).unwrap();
    assert!(matches!(
        runner.dataset("A>segmentor 1=PRIVAT"),
        Err(ValidationError::UnknownDataset(id)) if id == "A"
    ));
}

#[test]
fn psi_across_ingested_columns_is_rag_classified() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "development.csv", DEVELOPMENT);
    let registry = Registry::with_builtins();
    let psi = registry.function("crval::metrics", "psi").unwrap();

    let dataset = read_csv(&path, Some("A"), b',').unwrap();
    let tape = Tape::new();
    let scope = record_into(&tape);
    let result = psi
        .call(
            &CallArgs::new()
                .with_arg(dataset.column("score").unwrap())
                .with_arg(dataset.column("score").unwrap())
                .with_kwarg("buckets", 2),
        )
        .unwrap()
        .into_result("psi")
        .unwrap();
    drop(scope);

    let rag = ScalarRagResult::try_from(result).unwrap();
    assert_eq!(rag.rag_color(), Some(RagColor::Green));
    assert!(matches!(
        &tape.datasets()["A"],
        DatasetDescriptor::External { .. }
    ));
}

#[test]
fn empty_segmentations_replay() {
    let dir = tempdir().unwrap();
    let path = write(dir.path(), "development.csv", DEVELOPMENT);
    let (tape, uid) = record_segment_count(&path, ByGroup::new(Vec::new()));

    let argument = &tape.tests()[uid.as_str()].args[0];
    assert_eq!(argument["type"], "segmentation");
    assert_eq!(argument["dataset"], "A");
    assert_eq!(argument["segments"], json!([]));

    let mut runner = Runner::new(&tape, replay_registry()).unwrap();
    let replayed = runner.run(&uid, false).unwrap();
    assert_eq!(replayed.value("value").and_then(|value| value.as_f64()), Some(0.0));
}

#[test]
fn segmentations_replay_against_substituted_data() {
    let dir = tempdir().unwrap();
    let development = write(dir.path(), "development.csv", DEVELOPMENT);
    let monitoring = write(dir.path(), "monitoring.csv", MONITORING);
    let (tape, uid) = record_segment_count(&development, ByGroup::inferred());

    let substitute = read_csv(&monitoring, Some("B"), b',').unwrap();
    let mut runner = Runner::new(&tape, replay_registry())
        .unwrap()
        .with_datasets([("A", substitute)]);
    let replayed = runner.run(&uid, false).unwrap();
    assert_eq!(replayed.value("value").and_then(|value| value.as_f64()), Some(2.0));
    assert_eq!(
        replayed.value("observations").and_then(|value| value.as_f64()),
        Some(5.0)
    );
}
