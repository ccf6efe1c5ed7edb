//! Relay failure policy integration tests.
//!
//! Transient failures are retried once, rate limits either end the run or
//! fail the item depending on configuration, and an empty endpoint pool is
//! always fatal.

use std::sync::Arc;

use serde_json::Map;
use tempfile::TempDir;

use segrelay_core::archive::IndexedZipReader;
use segrelay_core::catalog::BaseEntry;
use segrelay_core::testing::{
    fixtures, MockBlobStore, MockRelay, MockTokenProvider, MockTranscoder,
};
use segrelay_core::{
    BaseListing, CheckpointStore, Collaborators, Config, ContentItem, Orchestrator,
    OrchestratorError, RelayError,
};

struct TestHarness {
    blob_store: Arc<MockBlobStore>,
    transcoder: Arc<MockTranscoder>,
    relay: Arc<MockRelay>,
    config: Config,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.worker.temp_dir = temp_dir.path().join("work");
        config.orchestrator.concurrency = 1;
        config.relay.endpoints = vec!["https://relay.test/hook/1".to_string()];
        config.relay.retry_delay_ms = 10;

        Self {
            blob_store: Arc::new(MockBlobStore::new()),
            transcoder: Arc::new(MockTranscoder::new()),
            relay: Arc::new(MockRelay::new()),
            config,
            temp_dir,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            &self.config,
            Collaborators {
                blob_store: self.blob_store.clone(),
                tokens: Arc::new(MockTokenProvider::new()),
                archive_reader: Arc::new(IndexedZipReader::new(true)),
                transcoder: self.transcoder.clone(),
                relay: self.relay.clone(),
            },
        )
    }

    fn open_store(&self) -> CheckpointStore {
        CheckpointStore::open(self.temp_dir.path().join("database.json"))
            .expect("Failed to open checkpoint store")
    }

    async fn seed(&self, ids: &[&str]) -> (Vec<ContentItem>, BaseListing) {
        let mut items = Vec::new();
        let mut entries = std::collections::BTreeMap::new();
        for id in ids {
            let path = format!("courses/{}.zip", id);
            self.blob_store.put(&path, fixtures::course_archive(id)).await;
            items.push(ContentItem::new(*id, format!("Course {}", id), path));
            entries.insert(
                id.to_string(),
                BaseEntry {
                    name: format!("Course {}", id),
                    extra: Map::new(),
                },
            );
        }
        (items, BaseListing::from_entries(entries))
    }
}

fn transient() -> RelayError {
    RelayError::Transient("connection reset".to_string())
}

fn rate_limited() -> RelayError {
    RelayError::RateLimited {
        retry_after_ms: Some(1000),
    }
}

#[tokio::test]
async fn test_transient_failure_retried_once() {
    let harness = TestHarness::new();
    let (items, base) = harness.seed(&["a", "b"]).await;
    harness.relay.fail_item("b", vec![transient()]).await;
    let mut store = harness.open_store();

    let summary = harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    // 3 units with 3 segments each, plus the one retried attempt.
    assert_eq!(harness.relay.attempts_for_item("b").await, 10);
    assert_eq!(harness.relay.attempts_for_item("a").await, 9);
}

#[tokio::test]
async fn test_second_transient_failure_fails_item_without_third_attempt() {
    let harness = TestHarness::new();
    let (items, base) = harness.seed(&["a", "b", "c"]).await;
    harness
        .relay
        .fail_item("b", vec![transient(), transient()])
        .await;
    let mut store = harness.open_store();

    let summary = harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed_items, vec!["b"]);
    assert_eq!(harness.relay.attempts_for_item("b").await, 2);
    assert!(!store.has("b"));
    assert!(store.has("a") && store.has("c"));
}

#[tokio::test]
async fn test_rate_limit_terminates_run_by_default() {
    let harness = TestHarness::new();
    let (items, base) = harness.seed(&["a", "b", "c"]).await;
    harness.relay.fail_item("b", vec![rate_limited()]).await;
    let mut store = harness.open_store();

    let err = harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap_err();
    match err {
        OrchestratorError::BrokerRejected(reason) => {
            assert!(reason.contains("retry after 1000 ms"), "{}", reason)
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // No retry on a rate limit.
    assert_eq!(harness.relay.attempts_for_item("b").await, 1);
    assert_eq!(harness.relay.attempts_for_item("c").await, 0);

    // Work finished before the reject is kept.
    let reopened = harness.open_store();
    assert!(reopened.has("a"));
    assert!(!reopened.has("b"));
    assert!(!reopened.has("c"));

    // The aborted worker's scratch directory is gone too.
    assert!(!harness.config.worker.temp_dir.join("b").exists());
}

#[tokio::test]
async fn test_rate_limit_fails_only_item_when_configured() {
    let mut harness = TestHarness::new();
    harness.config.relay.abort_run_on_rate_limit = false;
    let (items, base) = harness.seed(&["a", "b", "c"]).await;
    harness.relay.fail_item("b", vec![rate_limited()]).await;
    let mut store = harness.open_store();

    let summary = harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed_items, vec!["b"]);
    assert_eq!(harness.relay.attempts_for_item("b").await, 1);
}

#[tokio::test]
async fn test_empty_endpoint_pool_is_fatal() {
    let mut harness = TestHarness::new();
    harness.config.relay.endpoints.clear();
    let (items, base) = harness.seed(&["a"]).await;
    let mut store = harness.open_store();

    let err = harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::BrokerRejected(_)));
    assert!(harness.open_store().is_empty());
}

#[tokio::test]
async fn test_rotation_spreads_uploads_across_endpoints() {
    let mut harness = TestHarness::new();
    harness.config.relay.endpoints = vec![
        "https://relay.test/hook/1".to_string(),
        "https://relay.test/hook/2".to_string(),
    ];
    harness.config.relay.rotation_threshold = 3;
    let (items, base) = harness.seed(&["a"]).await;
    let mut store = harness.open_store();

    harness
        .orchestrator()
        .run(items, &mut store, &base)
        .await
        .unwrap();

    let uploads = harness.relay.recorded_attempts().await;
    assert_eq!(uploads.len(), 9);
    let first = uploads
        .iter()
        .filter(|u| u.endpoint.ends_with("/1"))
        .count();
    let second = uploads
        .iter()
        .filter(|u| u.endpoint.ends_with("/2"))
        .count();
    // 9 acquisitions with threshold 3 over 2 slots: 3 + 3 + 3.
    assert_eq!((first, second), (6, 3));
}
