//! Error types for the archive module.

use thiserror::Error;

/// Errors that can occur while reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The bytes are not a readable archive.
    #[error("invalid archive: {0}")]
    Invalid(String),

    /// A single entry could not be decompressed.
    #[error("failed to read entry {name}: {reason}")]
    Entry { name: String, reason: String },

    /// The blocking read task failed.
    #[error("archive task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn entry(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Entry {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Invalid(e.to_string())
    }
}
