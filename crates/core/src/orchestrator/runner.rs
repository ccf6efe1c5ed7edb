//! Migration orchestrator implementation.
//!
//! Drives pending items through a bounded pool of workers:
//! - Pending items are dequeued FIFO while fewer than `concurrency` run
//! - Worker reports are staged and flushed once per loop turn
//! - A broker reject aborts every worker and ends the run

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveReader;
use crate::blob::{join_store_path, BlobStore, TokenKind, TokenProvider};
use crate::catalog::{
    BaseListing, CatalogRecord, CheckpointStore, ContentItem, ItemStatus, Manifest,
};
use crate::config::Config;
use crate::metrics;
use crate::protocol::{
    BrokerEvent, Frame, Message, ProtocolError, StatusUpdate, WorkerEnvelope, WorkerEvent,
    WorkerInbound,
};
use crate::relay::{BrokerHandle, RelayBroker, RelayConfig, RelayUploader};
use crate::transcoder::Transcoder;
use crate::worker::{Worker, WorkerConfig, WorkerContext, WorkerError};

use super::config::OrchestratorConfig;
use super::types::{
    format_duration, format_remaining, OrchestratorError, RunSummary, StatusCallback, StopHandle,
};

/// External services the orchestrator hands to workers and the broker.
#[derive(Clone)]
pub struct Collaborators {
    pub blob_store: Arc<dyn BlobStore>,
    pub tokens: Arc<dyn TokenProvider>,
    pub archive_reader: Arc<dyn ArchiveReader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub relay: Arc<dyn RelayUploader>,
}

/// Bounded worker pool over a queue of content items.
pub struct Orchestrator {
    config: OrchestratorConfig,
    worker_config: WorkerConfig,
    relay_config: RelayConfig,
    /// Destination path of the name manifest.
    names_manifest_path: String,
    collaborators: Collaborators,
    status_callback: Option<StatusCallback>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config: config.orchestrator.clone(),
            worker_config: config.worker.clone(),
            relay_config: config.relay.clone(),
            names_manifest_path: join_store_path(
                &config.destination.path,
                &config.catalog.names_manifest_path,
            ),
            collaborators,
            status_callback: None,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Registers a callback that receives every status update.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status_callback = Some(callback);
        self
    }

    /// Handle for requesting a cooperative stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.stop_tx))
    }

    /// Processes `items` until the queue and every worker are drained.
    ///
    /// Items already in `store` are skipped. Completed items are checkpointed
    /// as they finish. Once every id of `base` is checkpointed the name
    /// manifest is uploaded.
    pub async fn run(
        &self,
        items: Vec<ContentItem>,
        store: &mut CheckpointStore,
        base: &BaseListing,
    ) -> Result<RunSummary, OrchestratorError> {
        let started_at = Instant::now();
        let mut summary = RunSummary::default();

        let mut seen = HashSet::new();
        let mut pending = VecDeque::new();
        for mut item in items {
            if store.has(&item.id) {
                summary.skipped += 1;
                continue;
            }
            if !seen.insert(item.id.clone()) {
                warn!("Ignoring duplicate item {}", item.id);
                continue;
            }
            item.status = ItemStatus::Pending;
            pending.push_back(item);
        }

        info!(
            "Starting run: {} item(s) pending, {} already checkpointed, concurrency {}",
            pending.len(),
            summary.skipped,
            self.config.concurrency
        );

        let (events_tx, broker_rx) = mpsc::unbounded_channel();
        let (broker, broker_task) = RelayBroker::new(
            self.relay_config.clone(),
            Arc::clone(&self.collaborators.relay),
        )
        .spawn(events_tx);
        let (outbox, worker_rx) = mpsc::unbounded_channel();

        let mut run = RunState {
            orchestrator: self,
            base,
            target: pending.len(),
            pending,
            handles: HashMap::new(),
            task_ids: HashMap::new(),
            workers: JoinSet::new(),
            broker,
            outbox,
            summary,
            started_at,
        };

        let driven = run.drive(store, worker_rx, broker_rx).await;

        if driven.is_err() {
            run.workers.shutdown().await;
            // Aborted workers never reach their own cleanup.
            self.remove_scratch_dirs(run.handles.keys()).await;
        }
        broker_task.abort();
        metrics::WORKERS_ACTIVE.set(0);

        // Records of workers that finished before a failure are still kept.
        let flushed = store.flush_async().await;
        driven?;
        flushed?;

        let mut summary = run.summary;
        summary.elapsed = started_at.elapsed();

        if !base.is_empty() && base.iter().all(|(id, _)| store.has(id)) {
            self.upload_names_manifest(store).await?;
            summary.names_manifest_uploaded = true;
        }

        info!(
            "Run finished in {}: {} completed, {} failed, {} skipped, {} dropped",
            format_duration(summary.elapsed),
            summary.completed,
            summary.failed,
            summary.skipped,
            summary.dropped
        );
        Ok(summary)
    }

    async fn remove_scratch_dirs(&self, item_ids: impl Iterator<Item = &String>) {
        if self.worker_config.keep_temp_files {
            return;
        }
        for id in item_ids {
            let dir = self.worker_config.temp_dir.join(id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Removed scratch directory {:?}", dir),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", dir, e),
            }
        }
    }

    /// Uploads the name -> id map of every checkpointed record.
    async fn upload_names_manifest(
        &self,
        store: &CheckpointStore,
    ) -> Result<(), OrchestratorError> {
        let names: BTreeMap<&str, &str> = store
            .load()
            .iter()
            .map(|(id, record)| (record.name.as_str(), id.as_str()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&names)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let token = self
            .collaborators
            .tokens
            .get_token(TokenKind::Upload)
            .await
            .map_err(OrchestratorError::ManifestUpload)?;
        let ack = self
            .collaborators
            .blob_store
            .upload(&self.names_manifest_path, bytes, &token)
            .await
            .map_err(OrchestratorError::ManifestUpload)?;

        info!(
            "Uploaded name manifest with {} entries to {} ({} bytes)",
            names.len(),
            ack.path,
            ack.size_bytes
        );
        Ok(())
    }
}

/// Orchestrator-side view of a running worker.
struct WorkerHandle {
    inbox: mpsc::UnboundedSender<Frame>,
    abort: AbortHandle,
    display_name: String,
    started_at: Instant,
    /// Set once the worker reported its manifest.
    manifest: Option<Manifest>,
}

type WorkerExit = (String, Result<(), WorkerError>);

/// Mutable state of a single run.
struct RunState<'a> {
    orchestrator: &'a Orchestrator,
    base: &'a BaseListing,
    target: usize,
    pending: VecDeque<ContentItem>,
    handles: HashMap<String, WorkerHandle>,
    task_ids: HashMap<Id, String>,
    workers: JoinSet<WorkerExit>,
    broker: BrokerHandle,
    outbox: mpsc::UnboundedSender<Frame>,
    summary: RunSummary,
    started_at: Instant,
}

impl RunState<'_> {
    async fn drive(
        &mut self,
        store: &mut CheckpointStore,
        mut worker_rx: mpsc::UnboundedReceiver<Frame>,
        mut broker_rx: mpsc::UnboundedReceiver<Frame>,
    ) -> Result<(), OrchestratorError> {
        let mut stop_rx = self.orchestrator.stop_tx.subscribe();
        let period = Duration::from_millis(self.orchestrator.config.summary_interval_ms.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            if *stop_rx.borrow_and_update() && !self.summary.stopped {
                self.summary.stopped = true;
                self.drop_pending("stop requested");
            }
            let cap = self.orchestrator.config.max_completed;
            if cap > 0 && self.summary.completed >= cap && !self.pending.is_empty() {
                info!("Completion cap of {} reached", cap);
                self.drop_pending("completion cap reached");
            }

            self.start_workers();

            if self.handles.is_empty() && self.pending.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = stop_rx.changed(), if !self.summary.stopped => {
                    info!("Stop requested, letting {} worker(s) finish", self.handles.len());
                }
                frame = broker_rx.recv() => match frame {
                    Some(frame) => self.on_broker_frame(&frame)?,
                    None => return Err(OrchestratorError::BrokerStopped),
                },
                Some(frame) = worker_rx.recv() => {
                    self.on_worker_frame(&frame).await;
                }
                Some(joined) = self.workers.join_next_with_id() => {
                    // Reports sent right before exit are handled first.
                    while let Ok(frame) = worker_rx.try_recv() {
                        self.on_worker_frame(&frame).await;
                    }
                    self.on_worker_exit(joined, store);
                }
                _ = ticker.tick() => {
                    self.log_progress(store);
                }
            }

            if store.staged_count() > 0 {
                let flushed = store.flush_async().await?;
                debug!("Checkpointed {} item(s)", flushed);
            }
        }

        Ok(())
    }

    fn drop_pending(&mut self, reason: &str) {
        if self.pending.is_empty() {
            return;
        }
        info!("Dropping {} pending item(s): {}", self.pending.len(), reason);
        self.summary.dropped += self.pending.len();
        self.pending.clear();
    }

    fn start_workers(&mut self) {
        while self.handles.len() < self.orchestrator.config.concurrency {
            let Some(mut item) = self.pending.pop_front() else {
                break;
            };
            if self.handles.contains_key(&item.id) {
                warn!("Item {} is already running, skipping", item.id);
                continue;
            }
            item.status = ItemStatus::Running;

            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let collaborators = &self.orchestrator.collaborators;
            let ctx = WorkerContext {
                item: item.clone(),
                config: self.orchestrator.worker_config.clone(),
                blob_store: Arc::clone(&collaborators.blob_store),
                archive_reader: Arc::clone(&collaborators.archive_reader),
                transcoder: Arc::clone(&collaborators.transcoder),
                broker: self.broker.clone(),
                outbox: self.outbox.clone(),
                inbox: inbox_rx,
            };

            let item_id = item.id.clone();
            let abort = self
                .workers
                .spawn(async move { (item_id, Worker::new(ctx).run().await) });
            self.task_ids.insert(abort.id(), item.id.clone());

            info!("Starting worker for {} ({})", item.display_name, item.id);
            self.handles.insert(
                item.id,
                WorkerHandle {
                    inbox: inbox_tx,
                    abort,
                    display_name: item.display_name,
                    started_at: Instant::now(),
                    manifest: None,
                },
            );
            self.summary.peak_running = self.summary.peak_running.max(self.handles.len());
        }
        metrics::WORKERS_ACTIVE.set(self.handles.len() as i64);
    }

    async fn on_worker_frame(&mut self, frame: &[u8]) {
        let envelope = match WorkerEnvelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropped malformed worker frame: {}", e);
                return;
            }
        };
        let item_id = envelope.item_id;

        match envelope.event {
            WorkerEvent::RequestToken { kind } => {
                let reply = match self.orchestrator.collaborators.tokens.get_token(kind).await {
                    Ok(token) => WorkerInbound::Token { kind, token },
                    Err(e) => {
                        warn!("{}: {} token unavailable: {}", item_id, kind, e);
                        WorkerInbound::TokenDenied {
                            kind,
                            reason: e.to_string(),
                        }
                    }
                };
                self.send_to_worker(&item_id, &reply);
            }
            WorkerEvent::Status { update } => self.report_status(&item_id, &update),
            WorkerEvent::Data { manifest } => match self.handles.get_mut(&item_id) {
                Some(handle) => {
                    debug!(
                        "{}: manifest with {} module(s) received",
                        item_id,
                        manifest.modules.len()
                    );
                    handle.manifest = Some(manifest);
                }
                None => warn!("Manifest from unknown item {} ignored", item_id),
            },
        }
    }

    fn on_broker_frame(&mut self, frame: &[u8]) -> Result<(), OrchestratorError> {
        let event = match BrokerEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropped malformed broker frame: {}", e);
                return Ok(());
            }
        };

        match event {
            BrokerEvent::Status { item_id, update } => self.report_status(&item_id, &update),
            BrokerEvent::UploadResult { item_id, result } => {
                self.send_to_worker(&item_id, &WorkerInbound::UploadResult { result });
            }
            BrokerEvent::UploadFailed {
                item_id,
                module_key,
                video_key,
                reason,
            } => {
                self.send_to_worker(
                    &item_id,
                    &WorkerInbound::UploadFailed {
                        module_key,
                        video_key,
                        reason,
                    },
                );
            }
            BrokerEvent::Reject { reason } => {
                error!("Relay broker rejected the run: {}", reason);
                for handle in self.handles.values() {
                    handle.abort.abort();
                }
                return Err(OrchestratorError::BrokerRejected(reason));
            }
        }
        Ok(())
    }

    fn send_to_worker(&self, item_id: &str, message: &WorkerInbound) {
        let Some(handle) = self.handles.get(item_id) else {
            debug!("No running worker for {}, message dropped", item_id);
            return;
        };
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode message for {}: {}", item_id, e);
                return;
            }
        };
        if handle.inbox.send(frame).is_err() {
            debug!("Worker for {} already exited", item_id);
        }
    }

    fn report_status(&self, item_id: &str, update: &StatusUpdate) {
        match update {
            StatusUpdate::Log { message } => info!("{}: {}", item_id, message),
            StatusUpdate::Retrying {
                segment,
                attempt,
                reason,
            } => warn!(
                "{}: retrying {} after attempt {}: {}",
                item_id, segment, attempt, reason
            ),
            StatusUpdate::Started { name } => info!("{}: started {}", item_id, name),
            StatusUpdate::Finished => info!("{}: finished", item_id),
            other => debug!("{}: {} {:?}", item_id, other.label(), other),
        }

        if let Some(callback) = &self.orchestrator.status_callback {
            callback(item_id, update);
        }
    }

    fn on_worker_exit(
        &mut self,
        joined: Result<(Id, WorkerExit), JoinError>,
        store: &mut CheckpointStore,
    ) {
        let (item_id, outcome) = match joined {
            Ok((task_id, (item_id, outcome))) => {
                self.task_ids.remove(&task_id);
                (item_id, outcome.map_err(|e| (e.stage(), e.to_string())))
            }
            Err(e) => {
                let Some(item_id) = self.task_ids.remove(&e.id()) else {
                    error!("Unknown worker task ended: {}", e);
                    return;
                };
                (item_id, Err(("panic", e.to_string())))
            }
        };

        let Some(handle) = self.handles.remove(&item_id) else {
            warn!("Exit of untracked worker {}", item_id);
            return;
        };
        metrics::WORKERS_ACTIVE.set(self.handles.len() as i64);
        let took = format_duration(handle.started_at.elapsed());

        match (outcome, handle.manifest) {
            (Ok(()), Some(manifest)) => {
                let record = CatalogRecord::from_manifest(self.base.get(&item_id), &manifest);
                info!(
                    "{} ({}) completed in {}: {} video(s)",
                    handle.display_name,
                    item_id,
                    took,
                    record.video_count()
                );
                store.stage(item_id, record);
                self.summary.completed += 1;
                metrics::ITEMS_COMPLETED.inc();
            }
            (Ok(()), None) => {
                self.record_failure(item_id, "protocol", "worker exited without a manifest");
            }
            (Err((stage, reason)), _) => {
                warn!(
                    "{} ({}) failed after {}: {}",
                    handle.display_name, item_id, took, reason
                );
                self.record_failure(item_id, stage, &reason);
            }
        }
    }

    fn record_failure(&mut self, item_id: String, stage: &str, reason: &str) {
        debug!("{} failed in stage {}: {}", item_id, stage, reason);
        metrics::ITEMS_FAILED.with_label_values(&[stage]).inc();
        self.summary.failed += 1;
        self.summary.failed_items.push(item_id);
    }

    fn log_progress(&self, store: &CheckpointStore) {
        let elapsed = self.started_at.elapsed();
        let remaining = self.pending.len() + self.handles.len();
        info!(
            "Progress: {} running, {}/{} completed, {} failed, {} checkpointed, elapsed {}, remaining {}",
            self.handles.len(),
            self.summary.completed,
            self.target,
            self.summary.failed,
            store.len(),
            format_duration(elapsed),
            format_remaining(elapsed, self.summary.completed, remaining)
        );
    }
}
