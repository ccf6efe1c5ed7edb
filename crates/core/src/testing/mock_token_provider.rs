//! Mock token provider for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::blob::{AccessToken, BlobStoreError, TokenKind, TokenProvider};

/// Mock implementation of the TokenProvider trait.
///
/// Hands out `<kind>-token` and records every request.
#[derive(Debug, Default)]
pub struct MockTokenProvider {
    requests: Arc<RwLock<Vec<TokenKind>>>,
    /// If set, the next request will fail with this error.
    next_error: Arc<RwLock<Option<BlobStoreError>>>,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded_requests(&self) -> Vec<TokenKind> {
        self.requests.read().await.clone()
    }

    /// Configure the next request to fail with the given error.
    pub async fn set_next_error(&self, error: BlobStoreError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn get_token(&self, kind: TokenKind) -> Result<AccessToken, BlobStoreError> {
        self.requests.write().await.push(kind);
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        Ok(AccessToken::new(format!("{}-token", kind)))
    }
}
