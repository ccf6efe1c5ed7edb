//! Error types for the worker module.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::blob::{BlobStoreError, TokenKind};
use crate::protocol::ProtocolError;
use crate::transcoder::TranscodeError;

/// Errors that abort a single item.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The orchestrator refused a credential.
    #[error("{kind} token denied: {reason}")]
    TokenDenied { kind: TokenKind, reason: String },

    #[error("download failed: {0}")]
    Download(#[from] BlobStoreError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Entry name does not follow `.../<module number>/<video file>`.
    #[error("malformed entry name: {name}")]
    MalformedEntry { name: String },

    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    /// The broker could not relay one of the item's units.
    #[error("upload of {module_key}/{video_key} failed: {reason}")]
    Upload {
        module_key: String,
        video_key: String,
        reason: String,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Pipeline stage the error belongs to, used as a metrics label.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Download(_) | Self::TokenDenied { .. } => "download",
            Self::Archive(_) | Self::MalformedEntry { .. } => "archive",
            Self::Transcode(_) => "transcode",
            Self::Upload { .. } => "upload",
            Self::Protocol(_) | Self::Io(_) => "other",
        }
    }
}
