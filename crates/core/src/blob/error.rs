//! Error types for the blob store module.

use thiserror::Error;

/// Errors that can occur talking to a blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// Object or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path escapes the store root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Credential rejected or missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
