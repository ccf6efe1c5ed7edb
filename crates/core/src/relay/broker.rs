//! Relay broker.
//!
//! A single broker task owns every per-item upload queue. Each queue has at
//! most one drain task; it processes the item's tasks one at a time, in
//! submission order. Queues of different items drain concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::protocol::{BrokerEvent, Frame, Message, ProtocolError, QueueData, StatusUpdate};
use crate::transcoder::list_segments;

use super::client::RelayClient;
use super::config::RelayConfig;
use super::error::RelayError;
use super::playlist::substitute_segments;
use super::traits::RelayUploader;
use super::types::{SegmentUpload, UploadResult, UploadTask};

/// Sending side of the broker inbox. Cheap to clone.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Frame>,
}

impl BrokerHandle {
    /// Wraps a raw sender. Frames sent through it are not processed by a broker.
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    /// Queues a task for its item.
    pub fn submit(&self, data: &QueueData) -> Result<(), ProtocolError> {
        let frame = data.encode()?;
        self.tx
            .send(frame)
            .map_err(|_| ProtocolError::ChannelClosed("broker"))
    }
}

/// Shared state every drain task works with. Only the broker creates it.
struct DrainContext {
    client: RelayClient,
    events: mpsc::UnboundedSender<Frame>,
}

/// How a drain task ended.
enum DrainOutcome {
    /// Queue was empty when checked.
    Drained,
    /// A task failed; the rest of the item's queue is discarded.
    ItemFailed,
    /// The broker cannot continue.
    Fatal,
}

struct DrainExit {
    item_id: String,
    rx: mpsc::UnboundedReceiver<UploadTask>,
    outcome: DrainOutcome,
}

/// Entry in the queue table.
struct ItemQueue {
    tx: mpsc::UnboundedSender<UploadTask>,
    drain: AbortHandle,
}

/// Single shared coordinator of per-item upload queues.
pub struct RelayBroker {
    config: RelayConfig,
    uploader: Arc<dyn RelayUploader>,
}

impl RelayBroker {
    pub fn new(config: RelayConfig, uploader: Arc<dyn RelayUploader>) -> Self {
        Self { config, uploader }
    }

    /// Starts the broker task. Events are sent to `events` as encoded
    /// [`BrokerEvent`]s. The task ends once every handle is dropped and all
    /// queues drained, or after a fatal failure.
    pub fn spawn(self, events: mpsc::UnboundedSender<Frame>) -> (BrokerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            "Relay broker starting with {} endpoint(s), uploader {}",
            self.config.endpoints.len(),
            self.uploader.name()
        );
        let ctx = Arc::new(DrainContext {
            client: RelayClient::new(self.config, self.uploader),
            events,
        });
        let handle = tokio::spawn(run_broker(ctx, rx));
        (BrokerHandle { tx }, handle)
    }
}

async fn run_broker(ctx: Arc<DrainContext>, mut inbox: mpsc::UnboundedReceiver<Frame>) {
    let mut queues: HashMap<String, ItemQueue> = HashMap::new();
    let mut drains: JoinSet<DrainExit> = JoinSet::new();
    let mut failed_items: HashSet<String> = HashSet::new();
    let mut inbox_open = true;

    loop {
        tokio::select! {
            frame = inbox.recv(), if inbox_open => {
                let Some(frame) = frame else {
                    debug!("Broker inbox closed, finishing {} queue(s)", queues.len());
                    inbox_open = false;
                    continue;
                };
                let data = match QueueData::decode(&frame) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Broker dropped malformed frame: {}", e);
                        continue;
                    }
                };
                if failed_items.contains(&data.item_id) {
                    debug!("Dropping task for failed item {}", data.item_id);
                    continue;
                }
                submit(&ctx, &mut queues, &mut drains, data);
            }
            Some(joined) = drains.join_next() => {
                let exit = match joined {
                    Ok(exit) => exit,
                    Err(e) => {
                        error!("Relay drain task panicked: {}", e);
                        send_event(&ctx.events, &BrokerEvent::Reject {
                            reason: format!("relay drain task failed: {}", e),
                        });
                        break;
                    }
                };
                match exit.outcome {
                    DrainOutcome::Drained => {
                        if exit.rx.is_empty() {
                            debug!("Upload queue for {} drained", exit.item_id);
                            queues.remove(&exit.item_id);
                        } else {
                            // Tasks arrived after the drain saw an empty queue.
                            let abort = drains.spawn(drain_queue(Arc::clone(&ctx), exit.item_id.clone(), exit.rx));
                            if let Some(queue) = queues.get_mut(&exit.item_id) {
                                queue.drain = abort;
                            }
                        }
                    }
                    DrainOutcome::ItemFailed => {
                        let discarded = exit.rx.len();
                        if discarded > 0 {
                            debug!("Discarding {} queued task(s) for {}", discarded, exit.item_id);
                        }
                        queues.remove(&exit.item_id);
                        failed_items.insert(exit.item_id);
                    }
                    DrainOutcome::Fatal => break,
                }
            }
            else => break,
        }
    }

    for (item_id, queue) in queues.drain() {
        debug!("Aborting upload queue for {}", item_id);
        queue.drain.abort();
    }
    drains.shutdown().await;
    debug!("Relay broker stopped");
}

/// Appends to an existing queue or creates one with its own drain task.
fn submit(
    ctx: &Arc<DrainContext>,
    queues: &mut HashMap<String, ItemQueue>,
    drains: &mut JoinSet<DrainExit>,
    data: QueueData,
) {
    let QueueData { item_id, task } = data;

    if let Some(queue) = queues.get(&item_id) {
        if queue.tx.send(task).is_ok() {
            return;
        }
        // Receiver is gone only if the drain task was aborted.
        warn!("Upload queue for {} was closed, dropping task", item_id);
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    if tx.send(task).is_err() {
        return;
    }
    debug!("Creating upload queue for {}", item_id);
    let drain = drains.spawn(drain_queue(Arc::clone(ctx), item_id.clone(), rx));
    queues.insert(item_id, ItemQueue { tx, drain });
}

fn send_event(events: &mpsc::UnboundedSender<Frame>, event: &BrokerEvent) {
    match event.encode() {
        Ok(frame) => {
            if events.send(frame).is_err() {
                debug!("Broker event receiver closed");
            }
        }
        Err(e) => warn!("Failed to encode broker event: {}", e),
    }
}

/// Processes queued tasks until the queue is empty or a task fails.
async fn drain_queue(
    ctx: Arc<DrainContext>,
    item_id: String,
    mut rx: mpsc::UnboundedReceiver<UploadTask>,
) -> DrainExit {
    loop {
        let task = match rx.try_recv() {
            Ok(task) => task,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                return DrainExit {
                    item_id,
                    rx,
                    outcome: DrainOutcome::Drained,
                };
            }
        };

        match ctx.process_task(&task, rx.len()).await {
            Ok(result) => {
                send_event(
                    &ctx.events,
                    &BrokerEvent::UploadResult {
                        item_id: item_id.clone(),
                        result,
                    },
                );
            }
            Err(e) if ctx.is_run_fatal(&e) => {
                error!("Relay failure for {} is fatal: {}", item_id, e);
                send_event(
                    &ctx.events,
                    &BrokerEvent::Reject {
                        reason: e.to_string(),
                    },
                );
                return DrainExit {
                    item_id,
                    rx,
                    outcome: DrainOutcome::Fatal,
                };
            }
            Err(e) => {
                warn!(
                    "Upload of {}/{} for {} failed: {}",
                    task.module_key, task.video_key, item_id, e
                );
                send_event(
                    &ctx.events,
                    &BrokerEvent::UploadFailed {
                        item_id: item_id.clone(),
                        module_key: task.module_key,
                        video_key: task.video_key,
                        reason: e.to_string(),
                    },
                );
                return DrainExit {
                    item_id,
                    rx,
                    outcome: DrainOutcome::ItemFailed,
                };
            }
        }
    }
}

impl DrainContext {
    fn is_run_fatal(&self, error: &RelayError) -> bool {
        self.client.is_run_fatal(error)
    }

    fn status(&self, item_id: &str, update: StatusUpdate) {
        send_event(
            &self.events,
            &BrokerEvent::Status {
                item_id: item_id.to_string(),
                update,
            },
        );
    }

    /// Uploads every segment of one task and rewrites its playlist.
    async fn process_task(
        &self,
        task: &UploadTask,
        on_hold: usize,
    ) -> Result<UploadResult, RelayError> {
        let playlist = tokio::fs::read_to_string(&task.playlist_path).await?;
        let segments = list_segments(&task.local_folder).await?;
        let total = segments.len();

        debug!(
            "Relaying {} segment(s) of {}/{} for {}",
            total, task.module_key, task.video_key, task.item_id
        );
        self.status(
            &task.item_id,
            StatusUpdate::Uploading {
                module: task.module_key.clone(),
                video: task.video_key.clone(),
                uploaded: 0,
                total,
                on_hold,
            },
        );

        let uploaded = AtomicUsize::new(0);
        let chunk_width = self.client.config().chunk_width.max(1);
        let chunks = segments
            .chunks(chunk_width)
            .map(|chunk| self.upload_chunk(task, chunk, &uploaded, total, on_hold));
        let references: HashMap<String, String> = try_join_all(chunks)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let playlist = substitute_segments(&playlist, &references)?;

        Ok(UploadResult {
            module_key: task.module_key.clone(),
            video_key: task.video_key.clone(),
            folder: task.local_folder.clone(),
            playlist,
        })
    }

    /// Uploads the segments of one chunk one after the other.
    async fn upload_chunk(
        &self,
        task: &UploadTask,
        chunk: &[String],
        uploaded: &AtomicUsize,
        total: usize,
        on_hold: usize,
    ) -> Result<Vec<(String, String)>, RelayError> {
        let mut references = Vec::with_capacity(chunk.len());
        for file_name in chunk {
            let segment = SegmentUpload {
                item_id: task.item_id.clone(),
                file_name: file_name.clone(),
                path: task.local_folder.join(file_name),
            };
            let reference = self.upload_with_retry(&segment).await?;
            let done = uploaded.fetch_add(1, Ordering::SeqCst) + 1;
            self.status(
                &task.item_id,
                StatusUpdate::Uploading {
                    module: task.module_key.clone(),
                    video: task.video_key.clone(),
                    uploaded: done,
                    total,
                    on_hold,
                },
            );
            references.push((file_name.clone(), reference));
        }
        Ok(references)
    }

    /// Uploads one segment, reporting each retry as a status update.
    async fn upload_with_retry(&self, segment: &SegmentUpload) -> Result<String, RelayError> {
        let on_retry = |attempt: u32, e: &RelayError| {
            self.status(
                &segment.item_id,
                StatusUpdate::Retrying {
                    segment: segment.file_name.clone(),
                    attempt,
                    reason: e.to_string(),
                },
            );
        };
        self.client.upload_with_retry(segment, &on_retry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_hls_fixture, MockRelay};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn config(endpoints: usize) -> RelayConfig {
        RelayConfig {
            endpoints: (0..endpoints).map(|i| format!("mock://ep-{}", i)).collect(),
            rotation_threshold: 2,
            chunk_width: 3,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn task(dir: &Path, item_id: &str, video: &str, segments: usize) -> UploadTask {
        let folder = dir.join(format!("{}-{}", item_id, video));
        let playlist_path = write_hls_fixture(&folder, video, segments).unwrap();
        UploadTask {
            item_id: item_id.to_string(),
            module_key: "1".to_string(),
            video_key: video.to_string(),
            local_folder: folder,
            playlist_path,
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Frame>) -> BrokerEvent {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for broker event")
            .expect("broker event channel closed");
        BrokerEvent::decode(&frame).unwrap()
    }

    /// Skips status updates.
    async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Frame>) -> BrokerEvent {
        loop {
            match next_event(rx).await {
                BrokerEvent::Status { .. } => continue,
                other => return other,
            }
        }
    }

    fn submit_task(handle: &BrokerHandle, task: UploadTask) {
        handle
            .submit(&QueueData {
                item_id: task.item_id.clone(),
                task,
            })
            .unwrap();
    }

    fn segment_lines(playlist: &str) -> Vec<&str> {
        playlist
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    }

    #[tokio::test]
    async fn test_uploads_and_rewrites_playlist() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(2), relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 7));

        match next_outcome(&mut events_rx).await {
            BrokerEvent::UploadResult { item_id, result } => {
                assert_eq!(item_id, "c1");
                assert_eq!(result.video_key, "intro");
                assert_eq!(segment_lines(&result.playlist).len(), 7);
                assert!(segment_lines(&result.playlist)
                    .iter()
                    .all(|line| line.starts_with("ref-")));
                for n in 0..7 {
                    assert!(result.playlist.contains(&format!("ref-intro{}.ts", n)));
                }
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(relay.recorded_uploads().await.len(), 7);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_playlist_independent_of_completion_order() {
        let mut playlists = Vec::new();
        let mut orders = Vec::new();

        for seed in [1, 99991] {
            let dir = TempDir::new().unwrap();
            let relay =
                Arc::new(MockRelay::new().with_jitter(seed, Duration::from_millis(15)));
            let mut config = config(2);
            config.chunk_width = 4;
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let (handle, join) = RelayBroker::new(config, relay.clone()).spawn(events_tx);

            submit_task(&handle, task(dir.path(), "c1", "lesson", 23));

            match next_outcome(&mut events_rx).await {
                BrokerEvent::UploadResult { result, .. } => playlists.push(result.playlist),
                other => panic!("unexpected event: {:?}", other),
            }
            let order: Vec<String> = relay
                .recorded_uploads()
                .await
                .into_iter()
                .map(|u| u.file_name)
                .collect();
            orders.push(order);

            drop(handle);
            join.await.unwrap();
        }

        assert_eq!(orders[0].len(), 23);
        assert_ne!(orders[0], orders[1]);
        assert_eq!(playlists[0], playlists[1]);

        let lines = segment_lines(&playlists[0]);
        let expected: Vec<String> = (0..23).map(|n| format!("ref-lesson{}.ts", n)).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_item_tasks_processed_in_order() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new().with_delay(Duration::from_millis(5)));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(1), relay.clone()).spawn(events_tx);

        for video in ["a", "b", "c"] {
            submit_task(&handle, task(dir.path(), "c1", video, 4));
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            if let BrokerEvent::UploadResult { result, .. } = next_outcome(&mut events_rx).await {
                order.push(result.video_key);
            }
        }
        assert_eq!(order, vec!["a", "b", "c"]);

        // Segments of a task never interleave with the next task of the item.
        let uploads = relay.recorded_uploads().await;
        let first_b = uploads.iter().position(|u| u.file_name.starts_with('b'));
        let last_a = uploads.iter().rposition(|u| u.file_name.starts_with('a'));
        assert!(last_a < first_b);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment("intro1.ts", vec![RelayError::Transient("reset".into())])
            .await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(2), relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 3));

        assert!(matches!(
            next_outcome(&mut events_rx).await,
            BrokerEvent::UploadResult { .. }
        ));
        assert_eq!(relay.attempts_for("intro1.ts").await, 2);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_bound_fails_item() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment(
                "intro0.ts",
                vec![
                    RelayError::Transient("reset".into()),
                    RelayError::Transient("reset".into()),
                    RelayError::Transient("reset".into()),
                ],
            )
            .await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(2), relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 1));

        match next_outcome(&mut events_rx).await {
            BrokerEvent::UploadFailed {
                item_id, video_key, ..
            } => {
                assert_eq!(item_id, "c1");
                assert_eq!(video_key, "intro");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(relay.attempts_for("intro0.ts").await, 2);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_item_drops_later_tasks() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment("a0.ts", vec![RelayError::Rejected("too large".into())])
            .await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(1), relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "a", 1));
        assert!(matches!(
            next_outcome(&mut events_rx).await,
            BrokerEvent::UploadFailed { .. }
        ));

        submit_task(&handle, task(dir.path(), "c1", "b", 1));
        submit_task(&handle, task(dir.path(), "c2", "z", 1));
        match next_outcome(&mut events_rx).await {
            BrokerEvent::UploadResult { item_id, .. } => assert_eq!(item_id, "c2"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(relay.attempts_for("b0.ts").await, 0);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_run() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment(
                "intro0.ts",
                vec![RelayError::RateLimited {
                    retry_after_ms: None,
                }],
            )
            .await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(1), relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 1));

        assert!(matches!(
            next_outcome(&mut events_rx).await,
            BrokerEvent::Reject { .. }
        ));
        assert_eq!(relay.attempts_for("intro0.ts").await, 1);
        // Broker stops on its own after a reject.
        timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
        drop(handle);
    }

    #[tokio::test]
    async fn test_rate_limit_fails_item_when_configured() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment(
                "intro0.ts",
                vec![RelayError::RateLimited {
                    retry_after_ms: None,
                }],
            )
            .await;
        let mut config = config(1);
        config.abort_run_on_rate_limit = false;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config, relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 1));

        assert!(matches!(
            next_outcome(&mut events_rx).await,
            BrokerEvent::UploadFailed { .. }
        ));
        assert_eq!(relay.attempts_for("intro0.ts").await, 1);

        drop(handle);
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_pool_is_fatal() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config(0), relay).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 1));

        match next_outcome(&mut events_rx).await {
            BrokerEvent::Reject { reason } => assert!(reason.contains("no relay endpoints")),
            other => panic!("unexpected event: {:?}", other),
        }
        timeout(Duration::from_secs(5), join).await.unwrap().unwrap();
        drop(handle);
    }

    #[tokio::test]
    async fn test_endpoints_rotate_across_uploads() {
        let dir = TempDir::new().unwrap();
        let relay = Arc::new(MockRelay::new());
        let mut config = config(2);
        config.chunk_width = 45;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = RelayBroker::new(config, relay.clone()).spawn(events_tx);

        submit_task(&handle, task(dir.path(), "c1", "intro", 8));
        next_outcome(&mut events_rx).await;

        let uploads = relay.recorded_uploads().await;
        let first = uploads
            .iter()
            .filter(|u| u.endpoint == "mock://ep-0")
            .count();
        assert_eq!(first, 4);

        drop(handle);
        join.await.unwrap();
    }
}
