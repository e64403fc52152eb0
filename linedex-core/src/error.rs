//! Error types for Linedex

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Linedex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Linedex error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Required artifact file does not exist
    #[error("missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// Compression/decompression error
    #[error("codec error: {0}")]
    Codec(String),

    /// Data corruption detected at a known position
    #[error("corruption in {} at offset {offset}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Invalid file format
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if the error indicates corruption of a built artifact
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. } | Error::InvalidFormat(_))
    }

    /// Check if the error is a missing file rather than bad data
    pub fn is_missing(&self) -> bool {
        matches!(self, Error::MissingArtifact { .. })
    }
}
