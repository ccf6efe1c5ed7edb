//! Error types for the relay module.

use thiserror::Error;

/// Errors that can occur uploading through the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network-level failure worth one more attempt.
    #[error("transient upload failure: {0}")]
    Transient(String),

    /// The provider signalled its rate limit.
    #[error("relay rate limit reached{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// The provider refused the upload.
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// The rotation pool has no endpoint to hand out.
    #[error("no relay endpoints available")]
    NoEndpoints,

    /// The provider answered without a usable reference.
    #[error("invalid relay response: {0}")]
    InvalidResponse(String),

    /// A segment file is not referenced exactly once by its playlist.
    #[error("segment {segment} referenced {occurrences} times in playlist")]
    PlaylistMismatch { segment: String, occurrences: usize },

    /// I/O error reading playlists or segments.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {} ms)", ms),
        None => String::new(),
    }
}

impl RelayError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}
