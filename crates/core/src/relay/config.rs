//! Relay configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the relay broker and its endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Endpoint URLs, used round-robin.
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Allocations to one endpoint before rotating to the next.
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: u32,

    /// Segments per parallel chunk. Segments inside a chunk upload one at a time.
    #[serde(default = "default_chunk_width")]
    pub chunk_width: usize,

    /// Upload attempts per segment for transient failures (2 = one retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before retrying a transient failure (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Global pacing across all endpoints (0 = unlimited).
    #[serde(default)]
    pub requests_per_minute: u32,

    /// Whether a rate-limit response terminates the whole run.
    /// When false only the affected item fails.
    #[serde(default = "default_abort_on_rate_limit")]
    pub abort_run_on_rate_limit: bool,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_rotation_threshold() -> u32 {
    25
}

fn default_chunk_width() -> usize {
    45
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2000 // 2 seconds
}

fn default_abort_on_rate_limit() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            rotation_threshold: default_rotation_threshold(),
            chunk_width: default_chunk_width(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            requests_per_minute: 0,
            abort_run_on_rate_limit: default_abort_on_rate_limit(),
            timeout_secs: default_timeout(),
        }
    }
}
