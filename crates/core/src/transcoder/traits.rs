//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::TranscodeError;
use super::types::{TranscodeJob, TranscodeOutput, TranscodeProgress};

/// Turns raw video into a segmented streaming playlist.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Transcodes the job's input into its output directory.
    async fn transcode(&self, job: TranscodeJob) -> Result<TranscodeOutput, TranscodeError>;

    /// Transcodes with progress reporting.
    ///
    /// If the sender is dropped, the transcode continues without progress reporting.
    async fn transcode_with_progress(
        &self,
        job: TranscodeJob,
        progress_tx: mpsc::Sender<TranscodeProgress>,
    ) -> Result<TranscodeOutput, TranscodeError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscodeError>;
}
