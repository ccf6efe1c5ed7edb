//! Trait definitions for the relay module.

use async_trait::async_trait;

use super::error::RelayError;
use super::types::SegmentUpload;

/// Uploads one segment to a relay endpoint and returns its stable reference.
#[async_trait]
pub trait RelayUploader: Send + Sync {
    /// Returns the name of this uploader implementation.
    fn name(&self) -> &str;

    async fn upload_segment(
        &self,
        endpoint: &str,
        segment: &SegmentUpload,
    ) -> Result<String, RelayError>;
}
