/// Identifier of a dataset, stable for the life of the object.
/// Examples: `dataset`, `dataset>segmentor 1=PRIVAT`
pub type DatasetId = String;
/// Name of a column inside a tabular dataset.
/// Examples: `factor 1`, `segmentor 2`
pub type ColumnName = String;
/// Correlation identifier linking a result to the call that produced it.
/// Example: `3f1c6a2e-6d1b-4f0c-9a51-1f0f4b6d2c11`
pub type RecordingUid = String;
/// Key of a single output inside a result.
/// Examples: `value`, `passed`, `color`
pub type OutputKey = String;
/// Module component of a registered function or class path.
/// Example: `crval::ingestion`
pub type ModulePath = String;
/// Declarative document fragment as stored on a tape.
pub type Document = serde_json::Value;
