use std::io;

use thiserror::Error;

use crate::types::{ColumnName, DatasetId, RecordingUid};

/// Error type for recording, serialization, replay, and dataset failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A recorded function returned something other than a result or a dataset.
    #[error(
        "tried recording function '{function}', expected a result or a dataset but received {received}"
    )]
    UnexpectedReturn {
        /// Name of the recorded function.
        function: String,
        /// Kind of the value it returned.
        received: String,
    },
    /// An argument has no tape representation.
    #[error("tried serializing {value}, but unable to serialize its type {kind}")]
    Unserializable {
        /// Debug rendering of the argument.
        value: String,
        /// Type name of the argument.
        kind: String,
    },
    /// A function without a stable name cannot be taped.
    #[error("unable to serialize an anonymous function")]
    AnonymousFunction,
    /// A result without a recording uid was passed to a recorded call.
    #[error("result has no recording provenance; it was not produced under an active recording")]
    MissingProvenance,
    /// No call is recorded under this uid.
    #[error("unknown recording uid '{0}'")]
    UnknownUid(RecordingUid),
    /// No dataset is recorded under this id.
    #[error("unknown dataset '{0}'")]
    UnknownDataset(DatasetId),
    /// The registry has no function or class under this path.
    #[error("unable to resolve '{module}::{name}' in the registry")]
    UnresolvedReference {
        /// Module of the missing entry.
        module: String,
        /// Function or class name.
        name: String,
    },
    /// A tape document does not have the expected shape.
    #[error("malformed tape document: {0}")]
    MalformedDocument(String),
    /// A column lookup failed.
    #[error("column '{column}' not found in dataset '{dataset}'")]
    ColumnNotFound {
        /// Dataset that was searched.
        dataset: DatasetId,
        /// Column that was requested.
        column: ColumnName,
    },
    /// Replaying a segmentation did not reproduce a recorded segment.
    #[error("segment '{id}' not produced by its segmentation")]
    SegmentNotFound {
        /// Recorded id of the segment.
        id: DatasetId,
    },
    /// A function received an argument it cannot use.
    #[error("invalid argument for '{function}': {details}")]
    InvalidArgument {
        /// Function that rejected the argument.
        function: String,
        /// What was wrong with it.
        details: String,
    },
    /// A segmentation could not be computed.
    #[error("segmentation error: {0}")]
    Segmentation(String),
    /// Reading or writing a file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A CSV file could not be parsed.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ValidationError {
    pub(crate) fn invalid_argument(function: &str, details: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            details: details.into(),
        }
    }
}
