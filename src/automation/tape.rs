//! The tape: a declarative record of recordable calls and the datasets they touched.
//!
//! A tape holds two mappings. `tests` maps a recording uid to the call that
//! produced a result; `datasets` maps a dataset id to how it can be rebuilt
//! (an ingestion call, or a parent plus the segmentation that cut it). No row
//! data is ever written. Arguments are serialized into tagged reference
//! documents that the [`Runner`](crate::automation::Runner) resolves on replay.

use chrono::Local;
use indexmap::IndexMap;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::automation::args::{Arg, CallArgs};
use crate::automation::declarative::ClassDescriptor;
use crate::automation::registry::FunctionRef;
use crate::config::TapeConfig;
use crate::dataset::Dataset;
use crate::errors::ValidationError;
use crate::result::ValidationResult;
use crate::types::{DatasetId, Document, ModulePath, RecordingUid};

/// Tape metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TapeMeta {
    /// Version of the library that wrote the tape.
    pub library_version: String,
    /// Local creation time, formatted per the tape config.
    pub date: String,
}

/// A call to a named function with serialized arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    /// Module the function is registered under.
    pub module: ModulePath,
    /// Function name.
    pub name: String,
    /// Serialized positional arguments; omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Document>,
    /// Serialized keyword arguments; omitted when empty.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub kwargs: IndexMap<String, Document>,
}

/// Marker value of the `source` field of segment entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentSource {
    /// Serialized as `"Segment"`.
    Segment,
}

/// Marker value of the `source` field of datasets with no recorded origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownSource {
    /// Serialized as `"unknown"`.
    #[serde(rename = "unknown")]
    Unknown,
}

/// Segmentation that produced a segment: the key and the tagged method descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentationDescriptor {
    /// Segmentation key document.
    pub by: Document,
    /// Tagged class descriptor of the resolved method.
    pub method: Document,
}

/// How a dataset on the tape can be rebuilt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetDescriptor {
    /// A bucket of a segmentation of `parent`.
    Segment {
        /// Always [`SegmentSource::Segment`].
        source: SegmentSource,
        /// Id of the segmented dataset.
        parent: DatasetId,
        /// Bucket label document.
        segment: Document,
        /// How the parent was cut.
        segmentation: SegmentationDescriptor,
    },
    /// A dataset returned by a recorded ingestion call.
    Ingested {
        /// The ingestion call.
        source: CallDescriptor,
        /// Id of the returned dataset.
        name: DatasetId,
    },
    /// A dataset passed into a recorded call without a recorded origin.
    External {
        /// Always [`UnknownSource::Unknown`].
        source: UnknownSource,
        /// Dataset id.
        name: DatasetId,
    },
}

impl DatasetDescriptor {
    /// Parent id of a segment entry.
    pub fn parent(&self) -> Option<&str> {
        match self {
            DatasetDescriptor::Segment { parent, .. } => Some(parent),
            _ => None,
        }
    }
}

/// Tagged reference embedded in serialized arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reference {
    /// A dataset registered under `datasets`.
    Dataset {
        /// Recorded dataset id.
        dataset: DatasetId,
    },
    /// One column of a registered dataset.
    SourcedArray {
        /// Recorded dataset id.
        dataset: DatasetId,
        /// Column name.
        name: String,
    },
    /// A segmentation of a registered dataset.
    Segmentation {
        /// Recorded id of the segmented dataset.
        dataset: DatasetId,
        /// Segmentation key document.
        by: Document,
        /// Tagged class descriptor of the resolved method.
        method: Document,
        /// Dataset references of the segments, in bucket order.
        #[serde(default)]
        segments: Vec<Document>,
    },
    /// A declaratively reconstructible object.
    Class(ClassDescriptor),
    /// A function addressable by `module::name`.
    Function {
        /// Module path.
        module: ModulePath,
        /// Function name.
        name: String,
    },
    /// A function with bound arguments.
    Partial {
        /// Function reference document.
        function: Document,
        /// Bound positional arguments.
        args: Document,
        /// Bound keyword arguments.
        keywords: Document,
    },
    /// A non-finite number (`NaN`, `inf`, `-inf`), which plain JSON cannot hold.
    Number {
        /// Text form of the value.
        value: String,
    },
    /// A previously recorded result.
    Result {
        /// Recording uid of the call that produced it.
        source_uid: RecordingUid,
    },
}

impl Reference {
    fn into_document(self) -> Result<Document, ValidationError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Top-level tape document: `{datasets, tests, meta}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TapeDocument {
    /// How each referenced dataset is rebuilt, parents before segments.
    #[serde(default)]
    pub datasets: IndexMap<DatasetId, DatasetDescriptor>,
    /// Recorded calls keyed by recording uid, in call order.
    #[serde(default)]
    pub tests: IndexMap<RecordingUid, CallDescriptor>,
    /// Writer metadata.
    #[serde(default)]
    pub meta: TapeMeta,
}

impl TapeDocument {
    /// Parse a JSON tape.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|err| ValidationError::MalformedDocument(err.to_string()))
    }

    /// Interpret an already-parsed document.
    pub fn from_document(document: Document) -> Result<Self, ValidationError> {
        serde_json::from_value(document)
            .map_err(|err| ValidationError::MalformedDocument(err.to_string()))
    }

    /// Read a JSON tape from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Pretty-printed JSON text.
    pub fn to_json(&self) -> Result<String, ValidationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct TapeState {
    config: TapeConfig,
    document: TapeDocument,
    results: HashMap<RecordingUid, ValidationResult>,
    datasets: HashMap<DatasetId, Dataset>,
}

/// Shared handle to a recording tape.
#[derive(Clone)]
pub struct Tape {
    state: Arc<Mutex<TapeState>>,
}

impl Tape {
    /// Empty tape with the default config.
    pub fn new() -> Self {
        Self::with_config(TapeConfig::default())
    }

    /// Empty tape stamped with metadata from `config`.
    pub fn with_config(config: TapeConfig) -> Self {
        let meta = TapeMeta {
            library_version: config.library_version.clone(),
            date: Local::now().format(&config.date_format).to_string(),
        };
        Self {
            state: Arc::new(Mutex::new(TapeState {
                config,
                document: TapeDocument {
                    meta,
                    ..TapeDocument::default()
                },
                results: HashMap::new(),
                datasets: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a call that returned `result` under `uid`.
    ///
    /// Nothing is written when an argument fails to serialize.
    pub fn record_test(
        &self,
        function: &FunctionRef,
        args: &CallArgs,
        uid: &str,
        result: &ValidationResult,
    ) -> Result<(), ValidationError> {
        let mut state = self.lock();
        let descriptor = state.transaction(|state| state.call_descriptor(function, args))?;
        state.document.tests.insert(uid.to_string(), descriptor);
        if state.config.store_objects {
            state.results.insert(uid.to_string(), result.clone());
        }
        Ok(())
    }

    /// Record a call that returned `dataset`.
    ///
    /// Nothing is written when an argument fails to serialize.
    pub fn record_ingestion(
        &self,
        function: &FunctionRef,
        args: &CallArgs,
        dataset: &Dataset,
    ) -> Result<(), ValidationError> {
        self.lock().transaction(|state| {
            let descriptor = state.call_descriptor(function, args)?;
            state.add_dataset(dataset, Some(descriptor))
        })
    }

    /// Register `dataset` (and its ancestors) without a recorded origin.
    pub fn add_dataset(&self, dataset: &Dataset) -> Result<(), ValidationError> {
        self.lock().add_dataset(dataset, None)
    }

    /// Serialize a value into its tape document, registering datasets it references.
    pub fn serialize(&self, value: &Arg) -> Result<Document, ValidationError> {
        self.lock().transaction(|state| state.serialize(value))
    }

    /// Recorded calls by uid.
    pub fn tests(&self) -> IndexMap<RecordingUid, CallDescriptor> {
        self.lock().document.tests.clone()
    }

    /// Dataset entries by id.
    pub fn datasets(&self) -> IndexMap<DatasetId, DatasetDescriptor> {
        self.lock().document.datasets.clone()
    }

    /// Tape metadata.
    pub fn meta(&self) -> TapeMeta {
        self.lock().document.meta.clone()
    }

    /// Snapshot of the declarative document.
    pub fn document(&self) -> TapeDocument {
        self.lock().document.clone()
    }

    /// True when live results and datasets are kept next to their entries.
    pub fn has_stored_objects(&self) -> bool {
        self.lock().config.store_objects
    }

    /// Live results kept by a storing tape.
    pub fn stored_results(&self) -> HashMap<RecordingUid, ValidationResult> {
        self.lock().results.clone()
    }

    /// Live datasets kept by a storing tape.
    pub fn stored_datasets(&self) -> HashMap<DatasetId, Dataset> {
        self.lock().datasets.clone()
    }

    /// The document as a JSON value.
    pub fn to_document(&self) -> Result<Document, ValidationError> {
        Ok(serde_json::to_value(&self.lock().document)?)
    }

    /// The document as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ValidationError> {
        self.lock().document.to_json()
    }

    /// Write the document as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let path = path.as_ref();
        let document = self.document();
        fs::write(path, document.to_json()?)?;
        info!(
            path = %path.display(),
            tests = document.tests.len(),
            datasets = document.datasets.len(),
            "saved tape"
        );
        Ok(())
    }

    /// True when both handles share the same tape.
    pub fn ptr_eq(&self, other: &Tape) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Tape")
            .field("tests", &state.document.tests.len())
            .field("datasets", &state.document.datasets.len())
            .field("store_objects", &state.config.store_objects)
            .finish()
    }
}

impl TapeState {
    /// Run `write`, dropping every dataset it registered when it fails.
    fn transaction<T>(
        &mut self,
        write: impl FnOnce(&mut Self) -> Result<T, ValidationError>,
    ) -> Result<T, ValidationError> {
        let registered = self.document.datasets.len();
        let outcome = write(self);
        if outcome.is_err() {
            for (id, _) in self.document.datasets.drain(registered..) {
                self.datasets.remove(&id);
            }
        }
        outcome
    }

    fn call_descriptor(
        &mut self,
        function: &FunctionRef,
        args: &CallArgs,
    ) -> Result<CallDescriptor, ValidationError> {
        let (Some(module), Some(name)) = (function.module(), function.name()) else {
            return Err(ValidationError::AnonymousFunction);
        };
        let (module, name) = (module.to_string(), name.to_string());
        let positional = args
            .args
            .iter()
            .map(|arg| self.serialize(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = IndexMap::with_capacity(args.kwargs.len());
        for (key, value) in &args.kwargs {
            kwargs.insert(key.clone(), self.serialize(value)?);
        }
        Ok(CallDescriptor {
            module,
            name,
            args: positional,
            kwargs,
        })
    }

    fn add_dataset(
        &mut self,
        dataset: &Dataset,
        source: Option<CallDescriptor>,
    ) -> Result<(), ValidationError> {
        if self.document.datasets.contains_key(dataset.id()) {
            return Ok(());
        }
        let descriptor = match dataset.as_segment() {
            Some(origin) => {
                self.add_dataset(origin.parent(), None)?;
                DatasetDescriptor::Segment {
                    source: SegmentSource::Segment,
                    parent: origin.parent().id().to_string(),
                    segment: origin.bucket().to_document(),
                    segmentation: SegmentationDescriptor {
                        by: origin.by().to_document(),
                        method: ClassDescriptor::of(origin.method())?.to_document(),
                    },
                }
            }
            None => match source {
                Some(source) => DatasetDescriptor::Ingested {
                    source,
                    name: dataset.id().to_string(),
                },
                None => DatasetDescriptor::External {
                    source: UnknownSource::Unknown,
                    name: dataset.id().to_string(),
                },
            },
        };
        debug!(
            dataset = dataset.id(),
            parent = descriptor.parent().unwrap_or(""),
            "registered dataset on tape"
        );
        self.document
            .datasets
            .insert(dataset.id().to_string(), descriptor);
        if self.config.store_objects {
            self.datasets
                .insert(dataset.id().to_string(), dataset.clone());
        }
        Ok(())
    }

    fn serialize(&mut self, value: &Arg) -> Result<Document, ValidationError> {
        match value {
            Arg::None => Ok(Document::String(String::new())),
            Arg::Bool(flag) => Ok(Document::Bool(*flag)),
            Arg::Integer(number) => Ok(Document::from(*number)),
            Arg::Number(number) if number.is_finite() => Ok(Document::from(*number)),
            Arg::Number(number) => Reference::Number {
                value: non_finite_text(*number).to_string(),
            }
            .into_document(),
            Arg::Text(text) => Ok(Document::String(text.clone())),
            Arg::List(items) | Arg::Set(items) => items
                .iter()
                .map(|item| self.serialize(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Document::Array),
            Arg::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, entry) in entries {
                    object.insert(key.clone(), self.serialize(entry)?);
                }
                Ok(Document::Object(object))
            }
            Arg::Dataset(dataset) => {
                self.add_dataset(dataset, None)?;
                Reference::Dataset {
                    dataset: dataset.id().to_string(),
                }
                .into_document()
            }
            Arg::Vector(vector) => {
                self.add_dataset(vector.dataset(), None)?;
                Reference::SourcedArray {
                    dataset: vector.dataset().id().to_string(),
                    name: vector.name().to_string(),
                }
                .into_document()
            }
            Arg::Segmentation(segmentation) => {
                let root = segmentation.root_dataset();
                self.add_dataset(root, None)?;
                let segments = segmentation
                    .segments()
                    .into_iter()
                    .map(|segment| self.serialize(&Arg::Dataset(segment)))
                    .collect::<Result<Vec<_>, _>>()?;
                Reference::Segmentation {
                    dataset: root.id().to_string(),
                    by: segmentation.by().to_document(),
                    method: ClassDescriptor::of(segmentation.resolved_method())?.to_document(),
                    segments,
                }
                .into_document()
            }
            Arg::Array(array) => self.serialize(&array_to_arg(array)),
            Arg::Object(object) => {
                let descriptor = ClassDescriptor::of(object.as_ref()).map_err(|err| {
                    ValidationError::Unserializable {
                        value: format!("{object:?} ({err})"),
                        kind: object.class_name().to_string(),
                    }
                })?;
                Reference::Class(descriptor).into_document()
            }
            Arg::Function(function) => match (function.module(), function.name()) {
                (Some(module), Some(name)) => Reference::Function {
                    module: module.to_string(),
                    name: name.to_string(),
                }
                .into_document(),
                _ => Err(ValidationError::AnonymousFunction),
            },
            Arg::Partial(partial) => {
                let function = self.serialize(&Arg::Function(partial.function.clone()))?;
                let args = self.serialize(&Arg::List(partial.args.clone()))?;
                let keywords = self.serialize(&Arg::Map(partial.keywords.clone()))?;
                Reference::Partial {
                    function,
                    args,
                    keywords,
                }
                .into_document()
            }
            Arg::Result(result) => {
                let source_uid = result
                    .recording_uid()
                    .ok_or(ValidationError::MissingProvenance)?;
                Reference::Result { source_uid }.into_document()
            }
        }
    }
}

/// Text form of a non-finite number, as written on the tape.
fn non_finite_text(value: f64) -> &'static str {
    if value.is_nan() {
        "NaN"
    } else if value > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

/// Parse the text form written by [`non_finite_text`].
pub(crate) fn parse_non_finite(text: &str) -> Option<f64> {
    match text {
        "NaN" | "nan" => Some(f64::NAN),
        "inf" | "Infinity" => Some(f64::INFINITY),
        "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Nested lists mirroring the array's shape; rank 0 becomes a scalar.
fn array_to_arg(array: &ArrayD<f64>) -> Arg {
    if array.ndim() == 0 {
        return array.iter().next().copied().map_or(Arg::None, Arg::Number);
    }
    Arg::List(
        array
            .axis_iter(Axis(0))
            .map(|sub| array_to_arg(&sub.to_owned()))
            .collect(),
    )
}
