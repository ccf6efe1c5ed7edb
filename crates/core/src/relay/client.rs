//! Paced, rotating uploads with bounded retry.
//!
//! Shared by the broker's drain tasks and the playlist republisher so both
//! draw from one endpoint pool and one request budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::metrics;

use super::config::RelayConfig;
use super::error::RelayError;
use super::pacing::RequestPacer;
use super::rotation::EndpointPool;
use super::traits::RelayUploader;
use super::types::SegmentUpload;

pub struct RelayClient {
    config: RelayConfig,
    uploader: Arc<dyn RelayUploader>,
    pool: Mutex<EndpointPool>,
    pacer: Option<RequestPacer>,
}

impl RelayClient {
    pub fn new(config: RelayConfig, uploader: Arc<dyn RelayUploader>) -> Self {
        let pool = EndpointPool::new(config.endpoints.clone(), config.rotation_threshold);
        Self {
            pacer: RequestPacer::new(config.requests_per_minute),
            pool: Mutex::new(pool),
            config,
            uploader,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn uploader_name(&self) -> &str {
        self.uploader.name()
    }

    /// Whether `error` should end the whole run rather than one item.
    pub fn is_run_fatal(&self, error: &RelayError) -> bool {
        match error {
            RelayError::NoEndpoints => true,
            RelayError::RateLimited { .. } => self.config.abort_run_on_rate_limit,
            _ => false,
        }
    }

    /// Uploads one file, retrying transient failures up to `max_attempts`.
    ///
    /// `on_retry` is called with the failed attempt number before each wait.
    pub async fn upload_with_retry(
        &self,
        upload: &SegmentUpload,
        on_retry: &(dyn Fn(u32, &RelayError) + Send + Sync),
    ) -> Result<String, RelayError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if let Some(pacer) = &self.pacer {
                pacer.acquire().await;
            }
            let endpoint = self.pool.lock().await.acquire()?;

            match self.uploader.upload_segment(&endpoint, upload).await {
                Ok(reference) => {
                    metrics::SEGMENT_UPLOADS.with_label_values(&["success"]).inc();
                    return Ok(reference);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    metrics::SEGMENT_UPLOADS
                        .with_label_values(&["transient"])
                        .inc();
                    metrics::UPLOAD_RETRIES.inc();
                    warn!(
                        "Upload of {} failed (attempt {}/{}), retrying in {}ms: {}",
                        upload.file_name,
                        attempt,
                        max_attempts,
                        self.config.retry_delay_ms,
                        e
                    );
                    on_retry(attempt, &e);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => {
                    let label = if e.is_rate_limit() {
                        metrics::RATE_LIMIT_HITS.inc();
                        "rate_limited"
                    } else if e.is_retryable() {
                        "transient"
                    } else {
                        "rejected"
                    };
                    metrics::SEGMENT_UPLOADS.with_label_values(&[label]).inc();
                    return Err(e);
                }
            }
        }
    }
}
