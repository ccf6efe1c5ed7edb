//! Filesystem-backed blob store.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::error::BlobStoreError;
use super::traits::BlobStore;
use super::types::{AccessToken, ListEntry, UploadAck};

/// Blob store rooted at a local directory. Tokens are accepted and ignored.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a store path under the root, rejecting anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf, BlobStoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(BlobStoreError::InvalidPath(path.to_string())),
            }
        }
        Ok(resolved)
    }

    async fn collect_entries(
        base: &Path,
        dir: &Path,
        recursive: bool,
        entries: &mut Vec<ListEntry>,
    ) -> Result<(), BlobStoreError> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut read_dir = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                let full = entry.path();
                let name = full
                    .strip_prefix(base)
                    .unwrap_or(&full)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");

                entries.push(ListEntry {
                    name,
                    is_file: file_type.is_file(),
                });

                if recursive && file_type.is_dir() {
                    stack.push(full);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn download(&self, path: &str, _token: &AccessToken) -> Result<Vec<u8>, BlobStoreError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                debug!("Read {} bytes from {:?}", bytes.len(), full);
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(BlobStoreError::Io(e)),
        }
    }

    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _token: &AccessToken,
    ) -> Result<UploadAck, BlobStoreError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size_bytes = bytes.len() as u64;
        tokio::fs::write(&full, bytes).await?;
        debug!("Wrote {} bytes to {:?}", size_bytes, full);

        Ok(UploadAck {
            path: path.to_string(),
            size_bytes,
        })
    }

    async fn list(
        &self,
        path: &str,
        recursive: bool,
        _token: &AccessToken,
    ) -> Result<Vec<ListEntry>, BlobStoreError> {
        let full = self.resolve(path)?;
        if !full.is_dir() {
            return Err(BlobStoreError::NotFound(path.to_string()));
        }

        let mut entries = Vec::new();
        Self::collect_entries(&full, &full, recursive, &mut entries).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        let token = AccessToken::anonymous();

        let ack = store
            .upload("out/names.json", b"{}".to_vec(), &token)
            .await
            .unwrap();
        assert_eq!(ack.size_bytes, 2);
        assert!(dir.path().join("out/names.json").exists());

        let bytes = store.download("out/names.json", &token).await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store
            .download("missing.zip", &AccessToken::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store
            .download("../etc/passwd", &AccessToken::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_list_flat_and_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("courses/nested")).unwrap();
        std::fs::write(dir.path().join("courses/a.zip"), b"a").unwrap();
        std::fs::write(dir.path().join("courses/nested/b.zip"), b"b").unwrap();

        let store = FsBlobStore::new(dir.path());
        let token = AccessToken::anonymous();

        let flat = store.list("courses", false, &token).await.unwrap();
        assert_eq!(
            flat,
            vec![
                ListEntry {
                    name: "a.zip".to_string(),
                    is_file: true
                },
                ListEntry {
                    name: "nested".to_string(),
                    is_file: false
                },
            ]
        );

        let deep = store.list("courses", true, &token).await.unwrap();
        assert!(deep
            .iter()
            .any(|e| e.name == "nested/b.zip" && e.is_file));
    }
}
