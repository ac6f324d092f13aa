//! Error taxonomy for the browse pipeline.
//!
//! Errors fall into two classes: configuration errors that abort a run before
//! any granule is touched ([`BrowseError::InvalidParameters`]), and item-local
//! errors that only cost one granule or one destination cell. See
//! [`BrowseError::is_fatal`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrowseError>;

#[derive(Debug, Error)]
pub enum BrowseError {
    /// Bad stretch or destination configuration. Fatal to the run.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Source tile has no entry in the tile lookup (no overlap with the grid).
    #[error("source tile {0} has no entry in the tile lookup")]
    UnknownTile(String),

    /// A timestamp did not match `YYYY-MM-DDTHH:MM:SS.fffZ`.
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// The object store could not serve the request.
    #[error("storage unavailable for key {key}: {reason}")]
    StorageUnavailable { key: String, reason: String },

    /// Granule name does not follow `HLS.<product>.T<tile>.<date>.<version>`.
    #[error("malformed granule name {0:?}")]
    InvalidGranuleName(String),

    /// Raster content is inconsistent (dimensions, band count, georeferencing).
    #[error("invalid raster data: {0}")]
    InvalidData(String),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),
}

impl BrowseError {
    /// Whether this error must abort the whole run rather than a single item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidParameters(_))
    }

    pub(crate) fn storage(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::StorageUnavailable {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<quick_xml::DeError> for BrowseError {
    fn from(e: quick_xml::DeError) -> Self {
        Self::Xml(e.to_string())
    }
}
