//! Mock blob store for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::blob::{AccessToken, BlobStore, BlobStoreError, ListEntry, UploadAck};

/// A recorded upload for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedBlobUpload {
    pub path: String,
    pub bytes: Vec<u8>,
    /// Whether a non-anonymous token was presented.
    pub authenticated: bool,
}

/// In-memory implementation of the BlobStore trait.
///
/// Provides controllable behavior for testing:
/// - Seed objects with `put`
/// - Track downloads and uploads for assertions
/// - Simulate failures
///
/// # Example
///
/// ```rust,ignore
/// let store = MockBlobStore::new();
/// store.put("courses/c1.zip", zip_bytes).await;
///
/// // ... run the engine ...
///
/// let uploads = store.recorded_uploads().await;
/// assert_eq!(uploads[0].path, "migrated/names.json");
/// ```
#[derive(Debug)]
pub struct MockBlobStore {
    /// Stored objects by path.
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    /// Recorded download paths.
    downloads: Arc<RwLock<Vec<String>>>,
    /// Recorded uploads.
    uploads: Arc<RwLock<Vec<RecordedBlobUpload>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<BlobStoreError>>>,
}

impl Default for MockBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBlobStore {
    /// Create an empty mock store.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            downloads: Arc::new(RwLock::new(Vec::new())),
            uploads: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Seed an object.
    pub async fn put(&self, path: &str, bytes: Vec<u8>) {
        self.objects
            .write()
            .await
            .insert(normalize(path), bytes);
    }

    /// Read an object back.
    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(&normalize(path)).cloned()
    }

    /// Get all recorded download paths.
    pub async fn recorded_downloads(&self) -> Vec<String> {
        self.downloads.read().await.clone()
    }

    /// Get all recorded uploads.
    pub async fn recorded_uploads(&self) -> Vec<RecordedBlobUpload> {
        self.uploads.read().await.clone()
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: BlobStoreError) {
        *self.next_error.write().await = Some(error);
    }

    async fn take_error(&self) -> Option<BlobStoreError> {
        self.next_error.write().await.take()
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl BlobStore for MockBlobStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(&self, path: &str, _token: &AccessToken) -> Result<Vec<u8>, BlobStoreError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        let path = normalize(path);
        self.downloads.write().await.push(path.clone());
        self.objects
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or(BlobStoreError::NotFound(path))
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        token: &AccessToken,
    ) -> Result<UploadAck, BlobStoreError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        let path = normalize(path);
        let size_bytes = bytes.len() as u64;
        self.uploads.write().await.push(RecordedBlobUpload {
            path: path.clone(),
            bytes: bytes.clone(),
            authenticated: !token.is_anonymous(),
        });
        self.objects.write().await.insert(path.clone(), bytes);
        Ok(UploadAck { path, size_bytes })
    }

    async fn list(
        &self,
        path: &str,
        recursive: bool,
        _token: &AccessToken,
    ) -> Result<Vec<ListEntry>, BlobStoreError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        let base = normalize(path);
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };

        let objects = self.objects.read().await;
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let parts: Vec<&str> = rest.split('/').collect();
            if recursive {
                for depth in 1..parts.len() {
                    dirs.insert(parts[..depth].join("/"));
                }
                files.insert(rest.to_string());
            } else if parts.len() == 1 {
                files.insert(rest.to_string());
            } else {
                dirs.insert(parts[0].to_string());
            }
        }

        if files.is_empty() && dirs.is_empty() && !base.is_empty() {
            return Err(BlobStoreError::NotFound(base));
        }

        let mut entries: Vec<ListEntry> = dirs
            .into_iter()
            .map(|name| ListEntry {
                name,
                is_file: false,
            })
            .chain(files.into_iter().map(|name| ListEntry {
                name,
                is_file: true,
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
