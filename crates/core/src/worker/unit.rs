//! Per-item worker pipeline.
//!
//! A worker owns one content item. It talks to the orchestrator and the relay
//! broker only through encoded frames: tokens are requested from the
//! orchestrator, upload tasks go to the broker, and upload results come back
//! on the worker's inbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{extension_predicate, ArchiveEntry, ArchiveReader};
use crate::blob::{AccessToken, BlobStore, TokenCache, TokenKind};
use crate::catalog::{ContentItem, Manifest, ModuleMap};
use crate::metrics;
use crate::protocol::{
    Frame, Message, ProtocolError, QueueData, StatusUpdate, WorkerEnvelope, WorkerEvent,
    WorkerInbound,
};
use crate::relay::{BrokerHandle, UploadResult, UploadTask};
use crate::transcoder::{TranscodeJob, Transcoder};

use super::config::WorkerConfig;
use super::entries::{parse_entry_name, UnitKey};
use super::error::WorkerError;

/// Everything a worker needs to process one item.
pub struct WorkerContext {
    pub item: ContentItem,
    pub config: WorkerConfig,
    pub blob_store: Arc<dyn BlobStore>,
    pub archive_reader: Arc<dyn ArchiveReader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub broker: BrokerHandle,
    /// Frames to the orchestrator.
    pub outbox: mpsc::UnboundedSender<Frame>,
    /// Frames from the orchestrator and the broker.
    pub inbox: mpsc::UnboundedReceiver<Frame>,
}

/// Processes a single content item.
pub struct Worker {
    item: ContentItem,
    config: WorkerConfig,
    blob_store: Arc<dyn BlobStore>,
    archive_reader: Arc<dyn ArchiveReader>,
    transcoder: Arc<dyn Transcoder>,
    broker: BrokerHandle,
    outbox: mpsc::UnboundedSender<Frame>,
    inbox: mpsc::UnboundedReceiver<Frame>,
    tokens: TokenCache,
    sent: usize,
    received: usize,
    modules: ModuleMap,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            item: ctx.item,
            config: ctx.config,
            blob_store: ctx.blob_store,
            archive_reader: ctx.archive_reader,
            transcoder: ctx.transcoder,
            broker: ctx.broker,
            outbox: ctx.outbox,
            inbox: ctx.inbox,
            tokens: TokenCache::new(),
            sent: 0,
            received: 0,
            modules: ModuleMap::new(),
        }
    }

    /// Runs the pipeline and reports the manifest to the orchestrator.
    ///
    /// The item's scratch directory is removed on exit, successful or not,
    /// unless `keep_temp_files` is set.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let work_dir = self.work_dir();
        let result = self.process(&work_dir).await;

        if !self.config.keep_temp_files {
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {:?}: {}", work_dir, e);
                }
            }
        }

        let manifest = result?;
        self.emit(WorkerEvent::Data { manifest })?;
        self.status(StatusUpdate::Finished);
        Ok(())
    }

    fn work_dir(&self) -> PathBuf {
        self.config.temp_dir.join(&self.item.id)
    }

    async fn process(&mut self, work_dir: &Path) -> Result<Manifest, WorkerError> {
        self.status(StatusUpdate::Started {
            name: self.item.display_name.clone(),
        });

        let token = self.request_token(TokenKind::Download).await?;

        self.status(StatusUpdate::Downloading {
            path: self.item.source_path.clone(),
        });
        let bytes = self
            .blob_store
            .download(&self.item.source_path, &token)
            .await?;
        debug!(
            "Downloaded {} ({} bytes)",
            self.item.source_path,
            bytes.len()
        );

        let entries = self
            .archive_reader
            .read(bytes, extension_predicate(&self.config.unit_extension))
            .await?;

        // All names are validated before any unit is transcoded.
        let mut units: Vec<(UnitKey, ArchiveEntry)> = entries
            .into_iter()
            .map(|entry| parse_entry_name(entry.name()).map(|key| (key, entry)))
            .collect::<Result<_, _>>()?;
        units.sort_by(|(a, _), (b, _)| a.sort_cmp(b));

        info!("{}: {} unit(s) to migrate", self.item.id, units.len());
        self.status(StatusUpdate::Extracting { units: units.len() });

        for (key, entry) in units {
            self.transcode_and_submit(work_dir, key, entry).await?;
            self.drain_inbox().await?;
        }

        while self.received < self.sent {
            self.status(StatusUpdate::Waiting {
                sent: self.sent,
                received: self.received,
            });
            let frame = self
                .inbox
                .recv()
                .await
                .ok_or(ProtocolError::ChannelClosed("worker inbox"))?;
            self.handle_inbound(frame).await?;
        }

        Ok(Manifest {
            item_id: self.item.id.clone(),
            name: self.item.display_name.clone(),
            modules: std::mem::take(&mut self.modules),
        })
    }

    async fn transcode_and_submit(
        &mut self,
        work_dir: &Path,
        key: UnitKey,
        entry: ArchiveEntry,
    ) -> Result<(), WorkerError> {
        let unit_id = Uuid::new_v4().to_string();
        let folder = work_dir.join(&unit_id);
        tokio::fs::create_dir_all(&folder).await?;

        let input_path = folder.join(format!("{}{}", unit_id, self.config.unit_extension));
        let content = entry.into_bytes().await?;
        tokio::fs::write(&input_path, content).await?;

        let job = TranscodeJob {
            job_id: unit_id.clone(),
            item_id: self.item.id.clone(),
            input_path: input_path.clone(),
            output_dir: folder.clone(),
            stem: unit_id,
        };

        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        let transcode = self.transcoder.transcode_with_progress(job, progress_tx);
        let forward = async {
            while let Some(progress) = progress_rx.recv().await {
                self.status(StatusUpdate::Transcoding {
                    module: key.module_key.clone(),
                    video: key.video_key.clone(),
                    percent: progress.percent,
                });
            }
        };
        let started = std::time::Instant::now();
        let (result, ()) = tokio::join!(transcode, forward);
        let elapsed = started.elapsed().as_secs_f64();

        let output = match result {
            Ok(output) => {
                metrics::TRANSCODE_DURATION
                    .with_label_values(&["success"])
                    .observe(elapsed);
                output
            }
            Err(e) => {
                metrics::TRANSCODE_DURATION
                    .with_label_values(&["failed"])
                    .observe(elapsed);
                return Err(e.into());
            }
        };

        // The raw unit is no longer needed once segments exist.
        if let Err(e) = tokio::fs::remove_file(&input_path).await {
            debug!("Failed to remove {:?}: {}", input_path, e);
        }

        self.broker.submit(&QueueData {
            item_id: self.item.id.clone(),
            task: UploadTask {
                item_id: self.item.id.clone(),
                module_key: key.module_key,
                video_key: key.video_key,
                local_folder: folder,
                playlist_path: output.playlist_path,
            },
        })?;
        self.sent += 1;
        Ok(())
    }

    /// Handles whatever arrived while transcoding, without waiting.
    async fn drain_inbox(&mut self) -> Result<(), WorkerError> {
        while let Ok(frame) = self.inbox.try_recv() {
            self.handle_inbound(frame).await?;
        }
        Ok(())
    }

    async fn handle_inbound(&mut self, frame: Frame) -> Result<(), WorkerError> {
        match WorkerInbound::decode(&frame)? {
            WorkerInbound::Token { kind, token } => {
                self.tokens.set_token(kind, token);
                Ok(())
            }
            WorkerInbound::TokenDenied { kind, reason } => {
                Err(WorkerError::TokenDenied { kind, reason })
            }
            WorkerInbound::UploadResult { result } => {
                self.record_result(result).await;
                Ok(())
            }
            WorkerInbound::UploadFailed {
                module_key,
                video_key,
                reason,
            } => Err(WorkerError::Upload {
                module_key,
                video_key,
                reason,
            }),
        }
    }

    async fn record_result(&mut self, result: UploadResult) {
        self.received += 1;
        debug!(
            "{}: received {}/{} ({}/{})",
            self.item.id, result.module_key, result.video_key, self.received, self.sent
        );
        if !self.config.keep_temp_files {
            if let Err(e) = tokio::fs::remove_dir_all(&result.folder).await {
                debug!("Failed to remove {:?}: {}", result.folder, e);
            }
        }
        self.modules
            .entry(result.module_key)
            .or_default()
            .insert(result.video_key, result.playlist);
    }

    async fn request_token(&mut self, kind: TokenKind) -> Result<AccessToken, WorkerError> {
        if let Some(token) = self.tokens.get(kind) {
            return Ok(token.clone());
        }

        self.emit(WorkerEvent::RequestToken { kind })?;
        loop {
            let frame = self
                .inbox
                .recv()
                .await
                .ok_or(ProtocolError::ChannelClosed("worker inbox"))?;
            self.handle_inbound(frame).await?;
            if let Some(token) = self.tokens.get(kind) {
                return Ok(token.clone());
            }
        }
    }

    fn emit(&self, event: WorkerEvent) -> Result<(), ProtocolError> {
        let frame = WorkerEnvelope {
            item_id: self.item.id.clone(),
            event,
        }
        .encode()?;
        self.outbox
            .send(frame)
            .map_err(|_| ProtocolError::ChannelClosed("orchestrator"))
    }

    fn status(&self, update: StatusUpdate) {
        if let Err(e) = self.emit(WorkerEvent::Status { update }) {
            debug!("{}: status not delivered: {}", self.item.id, e);
        }
    }
}
