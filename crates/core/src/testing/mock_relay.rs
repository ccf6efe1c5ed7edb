//! Mock relay uploader for testing.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::relay::{RelayError, RelayUploader, SegmentUpload};

/// A recorded upload attempt.
#[derive(Debug, Clone)]
pub struct RecordedSegmentUpload {
    pub endpoint: String,
    pub item_id: String,
    pub file_name: String,
    pub success: bool,
}

/// Mock implementation of the RelayUploader trait.
///
/// Successful uploads return `ref-<file name>`. Failures are scripted per
/// segment name or per item and consumed one per attempt.
///
/// # Example
///
/// ```rust,ignore
/// let relay = MockRelay::new();
/// relay.fail_item("c2", vec![RelayError::Transient("reset".into())]).await;
///
/// // ... run the broker ...
///
/// assert_eq!(relay.attempts_for_item("c2").await, 4);
/// ```
#[derive(Debug, Default)]
pub struct MockRelay {
    /// Every attempt, in order.
    attempts: Arc<RwLock<Vec<RecordedSegmentUpload>>>,
    /// Scripted failures by segment file name.
    segment_failures: Arc<RwLock<HashMap<String, VecDeque<RelayError>>>>,
    /// Scripted failures for any segment of an item.
    item_failures: Arc<RwLock<HashMap<String, VecDeque<RelayError>>>>,
    /// Simulated latency per upload.
    delay: Duration,
    /// Seed and upper bound of extra per-segment latency.
    jitter: Option<(u64, Duration)>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds latency to every upload.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Adds up to `max` extra latency per segment, derived from `seed` and
    /// the segment name. Different seeds give different completion orders.
    pub fn with_jitter(mut self, seed: u64, max: Duration) -> Self {
        self.jitter = Some((seed, max));
        self
    }

    fn latency(&self, file_name: &str) -> Duration {
        let Some((seed, max)) = self.jitter else {
            return self.delay;
        };
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return self.delay;
        }
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        file_name.hash(&mut hasher);
        self.delay + Duration::from_millis(hasher.finish() % (max_ms + 1))
    }

    /// Fail the next attempts on `file_name` with `errors`, in order.
    pub async fn fail_segment(&self, file_name: &str, errors: Vec<RelayError>) {
        self.segment_failures
            .write()
            .await
            .entry(file_name.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail the next attempts on any segment of `item_id` with `errors`, in order.
    pub async fn fail_item(&self, item_id: &str, errors: Vec<RelayError>) {
        self.item_failures
            .write()
            .await
            .entry(item_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Successful uploads, in completion order.
    pub async fn recorded_uploads(&self) -> Vec<RecordedSegmentUpload> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.success)
            .cloned()
            .collect()
    }

    /// All attempts, successful or not.
    pub async fn recorded_attempts(&self) -> Vec<RecordedSegmentUpload> {
        self.attempts.read().await.clone()
    }

    pub async fn attempts_for(&self, file_name: &str) -> usize {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.file_name == file_name)
            .count()
    }

    pub async fn attempts_for_item(&self, item_id: &str) -> usize {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.item_id == item_id)
            .count()
    }

    async fn scripted_failure(&self, segment: &SegmentUpload) -> Option<RelayError> {
        if let Some(queue) = self
            .segment_failures
            .write()
            .await
            .get_mut(&segment.file_name)
        {
            if let Some(err) = queue.pop_front() {
                return Some(err);
            }
        }
        self.item_failures
            .write()
            .await
            .get_mut(&segment.item_id)
            .and_then(|queue| queue.pop_front())
    }
}

#[async_trait]
impl RelayUploader for MockRelay {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload_segment(
        &self,
        endpoint: &str,
        segment: &SegmentUpload,
    ) -> Result<String, RelayError> {
        let latency = self.latency(&segment.file_name);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self.scripted_failure(segment).await;
        self.attempts.write().await.push(RecordedSegmentUpload {
            endpoint: endpoint.to_string(),
            item_id: segment.item_id.clone(),
            file_name: segment.file_name.clone(),
            success: failure.is_none(),
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(format!("ref-{}", segment.file_name)),
        }
    }
}
