//! Blob store access.
//!
//! The engine fetches source archives and uploads its final manifest through
//! the [`BlobStore`] trait. Credentials come from a [`TokenProvider`] and are
//! handed to workers on request.

mod error;
mod fs_store;
mod traits;
mod types;

pub use error::BlobStoreError;
pub use fs_store::FsBlobStore;
pub use traits::{BlobStore, TokenProvider};
pub use types::{AccessToken, ListEntry, StaticTokenProvider, TokenCache, TokenKind, UploadAck};

/// Joins two `/`-separated store paths.
pub fn join_store_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}
