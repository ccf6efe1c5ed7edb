//! Trait definitions for the blob store module.

use async_trait::async_trait;

use super::error::BlobStoreError;
use super::types::{AccessToken, ListEntry, TokenKind, UploadAck};

/// Remote or local store holding source archives and migration output.
///
/// Paths are `/`-separated and relative to the store root.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Downloads the object at `path`.
    async fn download(&self, path: &str, token: &AccessToken) -> Result<Vec<u8>, BlobStoreError>;

    /// Uploads `bytes` to `path`, replacing any existing object.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        token: &AccessToken,
    ) -> Result<UploadAck, BlobStoreError>;

    /// Lists the entries under `path`. Names are relative to `path`.
    async fn list(
        &self,
        path: &str,
        recursive: bool,
        token: &AccessToken,
    ) -> Result<Vec<ListEntry>, BlobStoreError>;
}

/// Source of store credentials. Token refresh happens behind this trait.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, kind: TokenKind) -> Result<AccessToken, BlobStoreError>;
}
