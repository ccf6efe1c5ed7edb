//! Types for the migration orchestrator.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::blob::BlobStoreError;
use crate::catalog::CatalogError;
use crate::protocol::{ProtocolError, StatusUpdate};

/// Errors that terminate a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Checkpoint store error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CatalogError),

    /// The relay broker failed fatally.
    #[error("relay broker rejected the run: {0}")]
    BrokerRejected(String),

    /// The relay broker stopped without a reason.
    #[error("relay broker stopped unexpectedly")]
    BrokerStopped,

    /// Uploading the final name manifest failed.
    #[error("failed to upload name manifest: {0}")]
    ManifestUpload(#[source] BlobStoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Callback invoked for every status update, with the item id.
pub type StatusCallback = Arc<dyn Fn(&str, &StatusUpdate) + Send + Sync>;

/// Requests a cooperative stop. Cheap to clone.
///
/// Pending items are dropped; running workers finish.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items checkpointed in this run.
    pub completed: usize,
    /// Items whose worker failed.
    pub failed: usize,
    /// Items skipped because they were already checkpointed.
    pub skipped: usize,
    /// Items dropped from the queue by a stop or the completion cap.
    pub dropped: usize,
    /// Whether a stop was requested.
    pub stopped: bool,
    /// Highest number of workers that ran at once.
    pub peak_running: usize,
    /// Whether the final name manifest was uploaded.
    pub names_manifest_uploaded: bool,
    /// Ids of failed items, in failure order.
    pub failed_items: Vec<String>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Formats a duration as `[Nd ][Nh ]Mm Ss`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d ", days));
    }
    if days > 0 || hours > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    out.push_str(&format!("{}m {}s", minutes, seconds));
    out
}

/// Estimated time left, from the average time per completed item.
pub fn estimate_remaining(elapsed: Duration, completed: usize, remaining: usize) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / completed as f64;
    Some(Duration::from_secs_f64(per_item * remaining as f64))
}

/// [`estimate_remaining`] formatted for logs.
pub fn format_remaining(elapsed: Duration, completed: usize, remaining: usize) -> String {
    match estimate_remaining(elapsed, completed, remaining) {
        Some(eta) => format_duration(eta),
        None => "calculating...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0m 0s");
        assert_eq!(format_duration(Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(Duration::from_secs(3_600 + 61)), "1h 1m 1s");
        assert_eq!(
            format_duration(Duration::from_secs(2 * 86_400 + 5)),
            "2d 0h 0m 5s"
        );
    }

    #[test]
    fn test_remaining() {
        assert_eq!(
            format_remaining(Duration::from_secs(100), 0, 10),
            "calculating..."
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(100), 2, 3),
            Some(Duration::from_secs(150))
        );
        assert_eq!(format_remaining(Duration::from_secs(60), 1, 2), "2m 0s");
    }

    #[test]
    fn test_stop_handle() {
        let (tx, rx) = watch::channel(false);
        let handle = StopHandle::new(Arc::new(tx));
        assert!(!handle.is_stopped());
        handle.clone().stop();
        assert!(handle.is_stopped());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_run_summary_serialization() {
        let summary = RunSummary {
            completed: 2,
            failed: 1,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["completed"], 2);
        assert_eq!(json["elapsed"], 1500);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::BrokerRejected("relay rate limit reached".to_string());
        assert_eq!(
            err.to_string(),
            "relay broker rejected the run: relay rate limit reached"
        );
    }
}
