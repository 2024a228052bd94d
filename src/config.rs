/// Tape construction settings.
#[derive(Clone, Debug)]
pub struct TapeConfig {
    /// Keep live results and datasets alongside their declarative entries.
    ///
    /// A runner built from such a tape returns the stored objects instead of
    /// re-executing the recorded calls.
    pub store_objects: bool,
    /// Library version stamped into the tape metadata.
    pub library_version: String,
    /// `chrono` format used for the metadata creation date.
    pub date_format: String,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            store_objects: false,
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            date_format: "%d/%m/%Y".to_string(),
        }
    }
}

impl TapeConfig {
    /// Default settings with object storage enabled.
    pub fn storing_objects() -> Self {
        Self {
            store_objects: true,
            ..Self::default()
        }
    }
}
