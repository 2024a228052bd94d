//! Replay of a recorded tape.
//!
//! The runner resolves recorded calls on demand by uid. Tagged argument
//! documents are turned back into live values: datasets are re-ingested or
//! re-segmented, results are obtained by running their own uid first, and
//! functions and classes are looked up in a [`Registry`]. Results and datasets
//! are memoized for the lifetime of the runner.

use chrono::Local;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::automation::args::{Arg, CallArgs};
use crate::automation::declarative::ClassDescriptor;
use crate::automation::recording::is_recording;
use crate::automation::registry::{Partial, Registry};
use crate::automation::tape::{
    CallDescriptor, DatasetDescriptor, Reference, SegmentationDescriptor, Tape, TapeDocument,
    parse_non_finite,
};
use crate::constants::document::{ALL_TAGS, TYPE_FIELD};
use crate::constants::runner::{CONTEXT_DATE_FORMAT, CONTEXT_RUN_ID};
use crate::dataset::{Dataset, segment_id};
use crate::errors::ValidationError;
use crate::result::ValidationResult;
use crate::segmentation::{BucketLabel, SegmentBy, SegmentationMethod};
use crate::types::{DatasetId, Document, RecordingUid};

/// Where a runner reads its tape from.
#[derive(Clone, Debug)]
pub enum TapeSource {
    /// A parsed tape document.
    Document(TapeDocument),
    /// A raw JSON value in tape document shape.
    Value(Document),
    /// A JSON tape file.
    Path(PathBuf),
    /// A live tape; stored objects, if any, are reused.
    Tape(Tape),
}

impl From<TapeDocument> for TapeSource {
    fn from(document: TapeDocument) -> Self {
        TapeSource::Document(document)
    }
}

impl From<Document> for TapeSource {
    fn from(value: Document) -> Self {
        TapeSource::Value(value)
    }
}

impl From<PathBuf> for TapeSource {
    fn from(path: PathBuf) -> Self {
        TapeSource::Path(path)
    }
}

impl From<&Path> for TapeSource {
    fn from(path: &Path) -> Self {
        TapeSource::Path(path.to_path_buf())
    }
}

impl From<Tape> for TapeSource {
    fn from(tape: Tape) -> Self {
        TapeSource::Tape(tape)
    }
}

impl From<&Tape> for TapeSource {
    fn from(tape: &Tape) -> Self {
        TapeSource::Tape(tape.clone())
    }
}

/// Executes recorded calls by uid, with memoization.
#[derive(Debug)]
pub struct Runner {
    registry: Registry,
    tests: IndexMap<RecordingUid, CallDescriptor>,
    definitions: IndexMap<DatasetId, DatasetDescriptor>,
    datasets: HashMap<DatasetId, Dataset>,
    runs: HashMap<RecordingUid, ValidationResult>,
}

impl Runner {
    /// Build a runner over `source`, resolving names through `registry`.
    pub fn new(source: impl Into<TapeSource>, registry: Registry) -> Result<Self, ValidationError> {
        let mut runs = HashMap::new();
        let mut datasets = HashMap::new();
        let document = match source.into() {
            TapeSource::Document(document) => document,
            TapeSource::Value(value) => TapeDocument::from_document(value)?,
            TapeSource::Path(path) => TapeDocument::load(path)?,
            TapeSource::Tape(tape) => {
                if tape.has_stored_objects() {
                    runs = tape.stored_results();
                    datasets = tape.stored_datasets();
                }
                tape.document()
            }
        };
        Ok(Self {
            registry,
            tests: document.tests,
            definitions: document.datasets,
            datasets,
            runs,
        })
    }

    /// Pre-seed live datasets under their recorded ids.
    ///
    /// A seeded dataset may carry a different id than the one it stands in
    /// for; segments replayed from it derive their ids from the seeded one.
    pub fn with_datasets<I, K>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = (K, Dataset)>,
        K: Into<DatasetId>,
    {
        for (id, dataset) in datasets {
            self.datasets.insert(id.into(), dataset);
        }
        self
    }

    /// Recorded uids in tape order.
    pub fn uids(&self) -> Vec<RecordingUid> {
        self.tests.keys().cloned().collect()
    }

    /// Registry the runner resolves names through.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Result of the call recorded under `uid`.
    ///
    /// Non-dry runs are memoized. A dry run never reads or writes the memo;
    /// while recording it is replayed with the dry-run control so that the
    /// mock is taped, otherwise a mock is returned directly.
    pub fn run(&mut self, uid: &str, dry_run: bool) -> Result<ValidationResult, ValidationError> {
        if !dry_run && let Some(result) = self.runs.get(uid) {
            debug!(uid, "replay memo hit");
            return Ok(result.clone());
        }
        let descriptor = self
            .tests
            .get(uid)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownUid(uid.to_string()))?;
        if dry_run && !is_recording() {
            warn!(uid, "dry run requested outside a recording session, returning a mock");
            return Ok(ValidationResult::mock());
        }
        info!(uid, function = %descriptor.name, dry_run, "replaying recorded call");
        let result = self
            .execute(&descriptor, Some(uid), dry_run)?
            .into_result(&descriptor.name)?;
        if !dry_run {
            self.runs.insert(uid.to_string(), result.clone());
        }
        Ok(result)
    }

    /// Dataset recorded under `id`, materializing it (and its ancestors) on first use.
    pub fn dataset(&mut self, id: &str) -> Result<Dataset, ValidationError> {
        if let Some(dataset) = self.datasets.get(id) {
            return Ok(dataset.clone());
        }
        let definition = self
            .definitions
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownDataset(id.to_string()))?;
        match definition {
            DatasetDescriptor::Ingested { source, .. } => {
                let ingested = self.execute(&source, None, false)?.into_dataset(&source.name)?;
                let dataset = if ingested.id() == id {
                    ingested
                } else {
                    ingested.with_id(id)
                };
                debug!(dataset = id, function = %source.name, "re-ingested dataset");
                self.datasets.insert(id.to_string(), dataset.clone());
                Ok(dataset)
            }
            DatasetDescriptor::External { .. } => {
                Err(ValidationError::UnknownDataset(id.to_string()))
            }
            DatasetDescriptor::Segment {
                parent,
                segment,
                segmentation,
                ..
            } => self.replay_segment(id, &parent, &segment, &segmentation),
        }
    }

    /// Re-segment the resolved parent and cache every sibling under the id it
    /// has relative to the recorded parent id.
    fn replay_segment(
        &mut self,
        id: &str,
        recorded_parent: &str,
        bucket: &Document,
        segmentation: &SegmentationDescriptor,
    ) -> Result<Dataset, ValidationError> {
        let parent = self.dataset(recorded_parent)?;
        let by = SegmentBy::from_document(&segmentation.by)?;
        let method = self.segmentation_method(&segmentation.method)?;
        let recorded_bucket = BucketLabel::from_document(bucket)?;

        let mut selected = None;
        for segment in parent.segment(by, method)?.segments() {
            let Some(origin) = segment.as_segment() else {
                continue;
            };
            let alias = segment_id(recorded_parent, origin.by(), origin.bucket());
            if selected.is_none() && origin.bucket().loosely_eq(&recorded_bucket) {
                selected = Some(segment.clone());
            }
            debug!(recorded = %alias, resolved = segment.id(), "replayed segment");
            self.datasets.entry(alias).or_insert(segment);
        }
        let segment = selected.ok_or_else(|| ValidationError::SegmentNotFound { id: id.to_string() })?;
        self.datasets.insert(id.to_string(), segment.clone());
        Ok(segment)
    }

    fn segmentation_method(&self, document: &Document) -> Result<SegmentationMethod, ValidationError> {
        let descriptor = ClassDescriptor::from_document(document)?;
        let object = self.registry.construct(&descriptor)?;
        object
            .as_any()
            .downcast_ref::<SegmentationMethod>()
            .cloned()
            .ok_or_else(|| {
                ValidationError::MalformedDocument(format!(
                    "{} is not a segmentation method",
                    descriptor.path()
                ))
            })
    }

    /// Resolve and invoke a recorded call. Recording controls are only
    /// threaded through while a recording session is active.
    fn execute(
        &mut self,
        descriptor: &CallDescriptor,
        uid: Option<&str>,
        dry_run: bool,
    ) -> Result<Arg, ValidationError> {
        let function = self.registry.function(&descriptor.module, &descriptor.name)?;
        let mut call = CallArgs::new();
        for arg in &descriptor.args {
            call.args.push(self.deserialize(arg)?);
        }
        for (key, value) in &descriptor.kwargs {
            let value = self.deserialize(value)?;
            call.kwargs.insert(key.clone(), value);
        }
        if is_recording() {
            call = call.with_dry_run(dry_run);
            if let Some(uid) = uid {
                call = call.with_recording_uuid(uid);
            }
        }
        function.call(&call)
    }

    /// Turn a serialized argument back into a live value.
    pub fn deserialize(&mut self, document: &Document) -> Result<Arg, ValidationError> {
        match document {
            Document::Null => Ok(Arg::None),
            Document::Bool(flag) => Ok(Arg::Bool(*flag)),
            Document::Number(number) => Ok(number
                .as_i64()
                .map(Arg::Integer)
                .unwrap_or_else(|| Arg::Number(number.as_f64().unwrap_or(f64::NAN)))),
            Document::String(text) => Ok(Arg::Text(text.clone())),
            Document::Array(items) => items
                .iter()
                .map(|item| self.deserialize(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Arg::List),
            Document::Object(entries) => {
                let tagged = entries
                    .get(TYPE_FIELD)
                    .and_then(Document::as_str)
                    .is_some_and(|tag| ALL_TAGS.contains(&tag));
                if tagged {
                    let reference: Reference = serde_json::from_value(document.clone())
                        .map_err(|err| ValidationError::MalformedDocument(err.to_string()))?;
                    return self.resolve(reference);
                }
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), self.deserialize(value)?);
                }
                Ok(Arg::Map(map))
            }
        }
    }

    fn resolve(&mut self, reference: Reference) -> Result<Arg, ValidationError> {
        match reference {
            Reference::Dataset { dataset } => self.dataset(&dataset).map(Arg::Dataset),
            Reference::SourcedArray { dataset, name } => {
                Ok(Arg::Vector(self.dataset(&dataset)?.column(&name)?))
            }
            Reference::Segmentation {
                dataset,
                by,
                method,
                ..
            } => {
                let parent = self.dataset(&dataset)?;
                let by = SegmentBy::from_document(&by)?;
                let method = self.segmentation_method(&method)?;
                parent.segment(by, method).map(Arg::Segmentation)
            }
            Reference::Number { value } => {
                parse_non_finite(&value).map(Arg::Number).ok_or_else(|| {
                    ValidationError::MalformedDocument(format!(
                        "'{value}' is not a non-finite number"
                    ))
                })
            }
            Reference::Class(descriptor) => self.registry.construct(&descriptor).map(Arg::Object),
            Reference::Function { module, name } => {
                self.registry.function(&module, &name).map(Arg::Function)
            }
            Reference::Partial {
                function,
                args,
                keywords,
            } => {
                let Arg::Function(function) = self.deserialize(&function)? else {
                    return Err(ValidationError::MalformedDocument(
                        "partial must wrap a function".to_string(),
                    ));
                };
                let mut partial = Partial::new(function);
                if let Arg::List(args) = self.deserialize(&args)? {
                    partial.args = args;
                }
                if let Arg::Map(keywords) = self.deserialize(&keywords)? {
                    partial.keywords = keywords;
                }
                Ok(Arg::Partial(partial))
            }
            Reference::Result { source_uid } => self.run(&source_uid, false).map(Arg::Result),
        }
    }

    /// Values for stamping reports produced from this run.
    pub fn run_context(&self) -> IndexMap<String, String> {
        IndexMap::from([
            (
                "_DATE".to_string(),
                Local::now().format(CONTEXT_DATE_FORMAT).to_string(),
            ),
            ("_ID".to_string(), CONTEXT_RUN_ID.to_string()),
        ])
    }
}
