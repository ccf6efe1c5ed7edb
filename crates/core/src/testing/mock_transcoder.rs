//! Mock transcoder for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::transcoder::{TranscodeError, TranscodeJob, TranscodeOutput, TranscodeProgress, Transcoder};

use super::write_hls_fixture;

/// Tracks how many transcodes run at once, overall and per item.
#[derive(Debug, Default)]
struct Concurrency {
    active: usize,
    peak: usize,
    per_item: HashMap<String, usize>,
    per_item_peak: HashMap<String, usize>,
}

/// Mock implementation of the Transcoder trait.
///
/// Writes a synthetic playlist plus `.ts` files instead of running ffmpeg.
///
/// Provides controllable behavior for testing:
/// - Track jobs for assertions
/// - Fail every job of selected items
/// - Measure concurrency
#[derive(Debug)]
pub struct MockTranscoder {
    /// Recorded jobs.
    jobs: Arc<RwLock<Vec<TranscodeJob>>>,
    /// Items whose jobs fail with malformed input.
    failing_items: Arc<RwLock<HashSet<String>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<TranscodeError>>>,
    /// Segments written per job.
    segments_per_job: Arc<RwLock<usize>>,
    /// Simulated transcode duration.
    duration: Arc<RwLock<Duration>>,
    concurrency: Arc<RwLock<Concurrency>>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscoder {
    /// Create a new mock transcoder writing 3 segments per job.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            failing_items: Arc::new(RwLock::new(HashSet::new())),
            next_error: Arc::new(RwLock::new(None)),
            segments_per_job: Arc::new(RwLock::new(3)),
            duration: Arc::new(RwLock::new(Duration::from_millis(10))),
            concurrency: Arc::new(RwLock::new(Concurrency::default())),
        }
    }

    /// Get all recorded jobs.
    pub async fn recorded_jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.clone()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Make every job of `item_id` fail as malformed input.
    pub async fn fail_item(&self, item_id: &str) {
        self.failing_items.write().await.insert(item_id.to_string());
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: TranscodeError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_segments_per_job(&self, segments: usize) {
        *self.segments_per_job.write().await = segments;
    }

    /// Set the simulated transcode duration.
    pub async fn set_duration(&self, duration: Duration) {
        *self.duration.write().await = duration;
    }

    /// Highest number of simultaneous transcodes seen.
    pub async fn peak_concurrency(&self) -> usize {
        self.concurrency.read().await.peak
    }

    /// Highest number of simultaneous transcodes seen for one item.
    pub async fn peak_concurrency_for(&self, item_id: &str) -> usize {
        self.concurrency
            .read()
            .await
            .per_item_peak
            .get(item_id)
            .copied()
            .unwrap_or(0)
    }

    async fn enter(&self, item_id: &str) {
        let mut c = self.concurrency.write().await;
        c.active += 1;
        c.peak = c.peak.max(c.active);
        let count = c.per_item.entry(item_id.to_string()).or_default();
        *count += 1;
        let count = *count;
        let peak = c.per_item_peak.entry(item_id.to_string()).or_default();
        *peak = (*peak).max(count);
    }

    async fn leave(&self, item_id: &str) {
        let mut c = self.concurrency.write().await;
        c.active = c.active.saturating_sub(1);
        if let Some(count) = c.per_item.get_mut(item_id) {
            *count = count.saturating_sub(1);
        }
    }

    async fn run(
        &self,
        job: TranscodeJob,
        progress_tx: Option<mpsc::Sender<TranscodeProgress>>,
    ) -> Result<TranscodeOutput, TranscodeError> {
        self.jobs.write().await.push(job.clone());

        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if self.failing_items.read().await.contains(&job.item_id) {
            return Err(TranscodeError::malformed(
                &job.input_path,
                "Invalid data found when processing input",
            ));
        }

        self.enter(&job.item_id).await;
        let duration = *self.duration.read().await;
        let half = duration / 2;

        tokio::time::sleep(half).await;
        if let Some(tx) = &progress_tx {
            let _ = tx
                .send(TranscodeProgress {
                    job_id: job.job_id.clone(),
                    percent: 50.0,
                    time_secs: 5.0,
                    duration_secs: Some(10.0),
                    speed: Some("10x".to_string()),
                })
                .await;
        }
        tokio::time::sleep(duration - half).await;

        let segments = *self.segments_per_job.read().await;
        let written = write_hls_fixture(&job.output_dir, &job.stem, segments);
        self.leave(&job.item_id).await;
        let playlist_path = written?;

        let playlist = tokio::fs::read_to_string(&playlist_path).await?;
        Ok(TranscodeOutput {
            job_id: job.job_id,
            playlist_path,
            playlist,
            segments: (0..segments).map(|n| format!("{}{}.ts", job.stem, n)).collect(),
            duration_ms: duration.as_millis() as u64,
        })
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(&self, job: TranscodeJob) -> Result<TranscodeOutput, TranscodeError> {
        self.run(job, None).await
    }

    async fn transcode_with_progress(
        &self,
        job: TranscodeJob,
        progress_tx: mpsc::Sender<TranscodeProgress>,
    ) -> Result<TranscodeOutput, TranscodeError> {
        self.run(job, Some(progress_tx)).await
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        Ok(())
    }
}
