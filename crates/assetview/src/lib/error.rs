//! Error types shared by the load and export pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the asset pipeline.
///
/// `Decode` carries the parser's own message unmodified so it can be shown
/// to the user exactly as the parser reported it.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read {path}: {source}")]
    Fetch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Decode(String),

    #[error("export failed: {0}")]
    Encode(String),
}

impl AssetError {
    /// Wrap any parser error, keeping its message verbatim.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        AssetError::Decode(err.to_string())
    }

    pub fn is_unsupported_format(&self) -> bool {
        matches!(self, AssetError::UnsupportedFormat(_))
    }
}

pub type AssetResult<T> = Result<T, AssetError>;
