#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Recording, serialization, and replay of validation runs.
pub mod automation;
/// Tape construction settings.
pub mod config;
/// Centralized constants for ids, tape documents, and outputs.
pub mod constants;
/// Datasets, segments, and sourced vectors.
pub mod dataset;
/// CSV ingestion and variable-role inference.
pub mod ingestion;
/// Statistical collaborators (PSI, AUC, Gini).
pub mod metrics;
/// Lazy outputs and their classification.
pub mod output;
/// Validation results and their specializations.
pub mod result;
/// Segmentation methods and cached partitions.
pub mod segmentation;
/// Shared type aliases.
pub mod types;
/// Tabular cells and typed columns.
pub mod value;

mod errors;

pub use automation::{
    Arg, CallArgs, Recordable, Registry, Runner, Tape, TapeDocument, TapeSource, avoid_recording,
    record, record_into,
};
pub use config::TapeConfig;
pub use dataset::{Dataset, SourcedVector, Table};
pub use errors::ValidationError;
pub use output::{Figure, Output, OutputType, OutputValue};
pub use result::{
    FigureResult, RagColor, RagResult, ResultTable, ScalarRagResult, ScalarResult,
    ScalarTestResult, TestResult, ValidationResult,
};
pub use segmentation::{BucketLabel, SegmentBy, Segmentation, SegmentationMethod};
pub use types::{ColumnName, DatasetId, Document, OutputKey, RecordingUid};
pub use value::{Cell, Column};
