//! Republishes stored playlists through the relay.
//!
//! Every playlist text held in the checkpoint store is uploaded as a file and
//! the stored value is replaced by the returned reference. Values that are
//! already references are left untouched, so a pass can be repeated after an
//! interruption.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Map;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogError, CatalogRecord, CheckpointStore, ModuleMap};

use super::client::RelayClient;
use super::config::RelayConfig;
use super::error::RelayError;
use super::traits::RelayUploader;
use super::types::SegmentUpload;

/// First line of every playlist text.
const PLAYLIST_HEADER: &str = "#EXTM3U";

#[derive(Debug, Error)]
pub enum RepublishError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Checkpoint(#[from] CatalogError),
}

/// Outcome of a republish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepublishSummary {
    pub uploaded: usize,
    /// Values that were already references.
    pub skipped: usize,
    /// `item/module/video` keys whose upload failed.
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
struct PlaylistEntry {
    item_id: String,
    name: String,
    module_key: String,
    video_key: String,
    playlist: String,
}

impl PlaylistEntry {
    fn key(&self) -> String {
        format!("{}/{}/{}", self.item_id, self.module_key, self.video_key)
    }

    fn file_name(&self) -> String {
        let stem: String = format!("{}-{}-{}", self.item_id, self.module_key, self.video_key)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.m3u8", stem)
    }
}

#[derive(Default)]
struct ChunkOutcome {
    done: Vec<(PlaylistEntry, String)>,
    failed: Vec<String>,
    fatal: Option<RelayError>,
}

/// Uploads playlist texts and swaps them for relay references.
pub struct PlaylistRepublisher {
    client: RelayClient,
    scratch_dir: PathBuf,
}

impl PlaylistRepublisher {
    /// Playlist files are written under `scratch_dir` while they upload.
    pub fn new(
        config: RelayConfig,
        uploader: Arc<dyn RelayUploader>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: RelayClient::new(config, uploader),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Uploads every stored playlist text and checkpoints the references.
    ///
    /// Entries are split into chunks of `chunk_width`. Chunks run concurrently
    /// and the entries of a chunk one after the other. References obtained
    /// before a fatal relay error are still flushed.
    pub async fn run(
        &self,
        store: &mut CheckpointStore,
    ) -> Result<RepublishSummary, RepublishError> {
        let (entries, skipped) = collect_playlists(store);
        let mut summary = RepublishSummary {
            skipped,
            ..Default::default()
        };
        if entries.is_empty() {
            info!("No playlist texts to republish ({} already references)", skipped);
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(RelayError::from)?;
        info!(
            "Republishing {} playlist(s) through {}",
            entries.len(),
            self.client.uploader_name()
        );

        let total = entries.len();
        let started = AtomicUsize::new(0);
        let chunk_width = self.client.config().chunk_width.max(1);
        let outcomes = join_all(
            entries
                .chunks(chunk_width)
                .map(|chunk| self.upload_chunk(chunk, &started, total)),
        )
        .await;

        let mut fatal = None;
        for outcome in outcomes {
            for (entry, reference) in outcome.done {
                store.stage(entry.item_id.clone(), reference_record(&entry, reference));
                summary.uploaded += 1;
            }
            summary.failed.extend(outcome.failed);
            if fatal.is_none() {
                fatal = outcome.fatal;
            }
        }

        store.flush_async().await?;

        if let Some(e) = fatal {
            return Err(e.into());
        }
        info!(
            "Republished {} playlist(s), {} failed, {} skipped",
            summary.uploaded,
            summary.failed.len(),
            summary.skipped
        );
        Ok(summary)
    }

    async fn upload_chunk(
        &self,
        chunk: &[PlaylistEntry],
        started: &AtomicUsize,
        total: usize,
    ) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        for entry in chunk {
            let n = started.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "[{}/{}] Uploading playlist: {} #{} #{}",
                n, total, entry.name, entry.module_key, entry.video_key
            );

            match self.upload_entry(entry).await {
                Ok(reference) => outcome.done.push((entry.clone(), reference)),
                Err(e) if self.client.is_run_fatal(&e) => {
                    warn!("Stopping playlist uploads: {}", e);
                    outcome.fatal = Some(e);
                    return outcome;
                }
                Err(e) => {
                    warn!("Failed to republish {}: {}", entry.key(), e);
                    outcome.failed.push(entry.key());
                }
            }
        }
        outcome
    }

    async fn upload_entry(&self, entry: &PlaylistEntry) -> Result<String, RelayError> {
        let file_name = entry.file_name();
        let path = self.scratch_dir.join(&file_name);
        tokio::fs::write(&path, &entry.playlist).await?;

        let upload = SegmentUpload {
            item_id: entry.item_id.clone(),
            file_name,
            path,
        };
        let result = self
            .client
            .upload_with_retry(&upload, &|_: u32, _: &RelayError| {})
            .await;
        remove_scratch_file(&upload.path).await;
        result
    }
}

async fn remove_scratch_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Failed to remove {:?}: {}", path, e);
    }
}

fn is_playlist_text(value: &str) -> bool {
    value.trim_start().starts_with(PLAYLIST_HEADER)
}

/// Playlist texts in store order, plus the number of values skipped.
fn collect_playlists(store: &CheckpointStore) -> (Vec<PlaylistEntry>, usize) {
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (item_id, record) in store.load() {
        for (module_key, videos) in &record.modules {
            for (video_key, value) in videos {
                if !is_playlist_text(value) {
                    skipped += 1;
                    continue;
                }
                entries.push(PlaylistEntry {
                    item_id: item_id.clone(),
                    name: record.name.clone(),
                    module_key: module_key.clone(),
                    video_key: video_key.clone(),
                    playlist: value.clone(),
                });
            }
        }
    }
    (entries, skipped)
}

/// A record holding only the replaced pair, merged into the stored one on flush.
fn reference_record(entry: &PlaylistEntry, reference: String) -> CatalogRecord {
    let mut modules = ModuleMap::new();
    modules
        .entry(entry.module_key.clone())
        .or_default()
        .insert(entry.video_key.clone(), reference);
    CatalogRecord {
        name: entry.name.clone(),
        modules,
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRelay;
    use tempfile::TempDir;

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:10.000000,\nref-a0.ts\n#EXT-X-ENDLIST\n";

    fn config() -> RelayConfig {
        RelayConfig {
            endpoints: vec!["mock://ep-0".to_string()],
            chunk_width: 2,
            retry_delay_ms: 5,
            ..Default::default()
        }
    }

    fn record(name: &str, videos: &[(&str, &str)]) -> CatalogRecord {
        let mut modules = ModuleMap::new();
        for (video, value) in videos {
            modules
                .entry("1".to_string())
                .or_default()
                .insert(video.to_string(), value.to_string());
        }
        let mut extra = Map::new();
        extra.insert("icon".to_string(), "course.png".into());
        CatalogRecord {
            name: name.to_string(),
            modules,
            extra,
        }
    }

    fn seeded_store(dir: &TempDir) -> CheckpointStore {
        let mut store = CheckpointStore::open(dir.path().join("database.json")).unwrap();
        store.stage(
            "a",
            record("Course A", &[("intro", PLAYLIST), ("outro", PLAYLIST)]),
        );
        store.stage(
            "b",
            record(
                "Course B",
                &[("intro", "ProxyId=1%2F2%2Fb.m3u8"), ("deep dive", PLAYLIST)],
            ),
        );
        store.flush().unwrap();
        store
    }

    #[tokio::test]
    async fn test_replaces_playlists_with_references() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let relay = Arc::new(MockRelay::new());
        let scratch = dir.path().join("scratch");
        let republisher = PlaylistRepublisher::new(config(), relay.clone(), &scratch);

        let summary = republisher.run(&mut store).await.unwrap();

        assert_eq!(summary.uploaded, 3);
        assert_eq!(summary.skipped, 1);
        assert!(summary.failed.is_empty());

        let reopened = CheckpointStore::open(dir.path().join("database.json")).unwrap();
        let a = &reopened.load()["a"];
        assert_eq!(a.modules["1"]["intro"], "ref-a-1-intro.m3u8");
        assert_eq!(a.modules["1"]["outro"], "ref-a-1-outro.m3u8");
        assert_eq!(a.extra["icon"], "course.png");
        let b = &reopened.load()["b"];
        assert_eq!(b.modules["1"]["intro"], "ProxyId=1%2F2%2Fb.m3u8");
        assert_eq!(b.modules["1"]["deep dive"], "ref-b-1-deep_dive.m3u8");

        assert_eq!(relay.recorded_uploads().await.len(), 3);
        let mut leftover = tokio::fs::read_dir(&scratch).await.unwrap();
        assert!(leftover.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_pass_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let relay = Arc::new(MockRelay::new());
        let republisher =
            PlaylistRepublisher::new(config(), relay.clone(), dir.path().join("scratch"));

        republisher.run(&mut store).await.unwrap();
        let summary = republisher.run(&mut store).await.unwrap();

        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.skipped, 4);
        assert_eq!(relay.recorded_uploads().await.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_playlist_text() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment(
                "a-1-intro.m3u8",
                vec![
                    RelayError::Transient("reset".into()),
                    RelayError::Transient("reset".into()),
                ],
            )
            .await;
        let republisher =
            PlaylistRepublisher::new(config(), relay.clone(), dir.path().join("scratch"));

        let summary = republisher.run(&mut store).await.unwrap();

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, vec!["a/1/intro"]);
        assert_eq!(relay.attempts_for("a-1-intro.m3u8").await, 2);
        assert_eq!(store.load()["a"].modules["1"]["intro"], PLAYLIST);
        assert_eq!(store.load()["a"].modules["1"]["outro"], "ref-a-1-outro.m3u8");
    }

    #[tokio::test]
    async fn test_rate_limit_stops_and_keeps_finished_uploads() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir);
        let relay = Arc::new(MockRelay::new());
        relay
            .fail_segment(
                "a-1-outro.m3u8",
                vec![RelayError::RateLimited {
                    retry_after_ms: None,
                }],
            )
            .await;
        let mut config = config();
        config.chunk_width = 3;
        let republisher =
            PlaylistRepublisher::new(config, relay.clone(), dir.path().join("scratch"));

        let err = republisher.run(&mut store).await.unwrap_err();
        assert!(matches!(err, RepublishError::Relay(RelayError::RateLimited { .. })));

        // Entries are a/intro, a/outro, b/deep dive in one chunk; the first made it.
        let reopened = CheckpointStore::open(dir.path().join("database.json")).unwrap();
        assert_eq!(reopened.load()["a"].modules["1"]["intro"], "ref-a-1-intro.m3u8");
        assert_eq!(reopened.load()["a"].modules["1"]["outro"], PLAYLIST);
        assert_eq!(reopened.load()["b"].modules["1"]["deep dive"], PLAYLIST);
        assert_eq!(relay.attempts_for("b-1-deep_dive.m3u8").await, 0);
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let entry = PlaylistEntry {
            item_id: "c1".to_string(),
            name: "Course".to_string(),
            module_key: "2".to_string(),
            video_key: "a/b c".to_string(),
            playlist: PLAYLIST.to_string(),
        };
        assert_eq!(entry.file_name(), "c1-2-a_b_c.m3u8");
        assert_eq!(entry.key(), "c1/2/a/b c");
    }
}
