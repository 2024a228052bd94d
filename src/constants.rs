/// Constants used when deriving dataset and segment identifiers.
pub mod ids {
    /// Separator between a parent dataset id and a segment qualifier (`parent>by=bucket`).
    pub const SEGMENT_SEPARATOR: &str = ">";
    /// Separator between the segmentation key and the bucket label.
    pub const BUCKET_SEPARATOR: &str = "=";
    /// Separator between the segmentation key and the method in segmentation ids.
    pub const METHOD_SEPARATOR: &str = "|";
}

/// Keys and tag values of the tape document.
pub mod document {
    /// Discriminator field of tagged reference descriptors.
    pub const TYPE_FIELD: &str = "type";
    /// Tag of a dataset reference.
    pub const TAG_DATASET: &str = "dataset";
    /// Tag of a column reference bound to a dataset.
    pub const TAG_SOURCED_ARRAY: &str = "sourcedarray";
    /// Tag of a segmentation reference.
    pub const TAG_SEGMENTATION: &str = "segmentation";
    /// Tag of a declaratively reconstructible object.
    pub const TAG_CLASS: &str = "class";
    /// Tag of a function reference.
    pub const TAG_FUNCTION: &str = "function";
    /// Tag of a partially applied function.
    pub const TAG_PARTIAL: &str = "partial";
    /// Tag of a reference to a previously recorded result.
    pub const TAG_RESULT: &str = "result";
    /// Tag of a non-finite number.
    pub const TAG_NUMBER: &str = "number";
    /// All tags understood by the runner.
    pub const ALL_TAGS: [&str; 8] = [
        TAG_DATASET,
        TAG_SOURCED_ARRAY,
        TAG_SEGMENTATION,
        TAG_CLASS,
        TAG_FUNCTION,
        TAG_PARTIAL,
        TAG_RESULT,
        TAG_NUMBER,
    ];
}

/// Constants used by segmentation methods.
pub mod segmentation {
    /// Largest number of distinct values for which equal-observation bins are searched exhaustively.
    pub const EXACT_BINNING_MAX_DISTINCT: usize = 512;
}

/// Reserved call controls threaded through recordable functions.
pub mod recording {
    /// Keyword carrying an injected correlation identifier.
    pub const RECORDING_UUID_KEY: &str = "recording_uuid";
    /// Keyword carrying the dry-run flag.
    pub const DRY_RUN_KEY: &str = "_dry_run";
}

/// Constants used by output classification and formatting.
pub mod output {
    /// Text longer than this many characters is classified as a description.
    pub const DESCRIPTION_MIN_CHARS: usize = 16;
    /// Number of decimals inspected when formatting fractional scalars.
    pub const FORMAT_DECIMALS: usize = 6;
}

/// Constants used by RAG classification.
pub mod rag {
    /// Color of a critical outcome.
    pub const RED: &str = "RED";
    /// Color of a problematic outcome.
    pub const AMBER: &str = "AMBER";
    /// Color of a good outcome.
    pub const GREEN: &str = "GREEN";
}

/// Constants used by the runner context.
pub mod runner {
    /// Date format used by `Runner::run_context`.
    pub const CONTEXT_DATE_FORMAT: &str = "%B %d, %Y";
    /// Placeholder run id used by `Runner::run_context`.
    pub const CONTEXT_RUN_ID: &str = "ABCDEFG";
}
