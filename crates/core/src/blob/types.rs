//! Types for the blob store module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::CredentialsConfig;

use super::error::BlobStoreError;
use super::traits::TokenProvider;

/// Which credential a caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Download,
    Upload,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Download => write!(f, "download"),
            TokenKind::Upload => write!(f, "upload"),
        }
    }
}

/// Opaque store credential. The value never shows up in debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Token for stores that do not authenticate.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "AccessToken(anonymous)")
        } else {
            write!(f, "AccessToken(***)")
        }
    }
}

/// An entry returned by [`BlobStore::list`](super::BlobStore::list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub is_file: bool,
}

/// Acknowledgement of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub path: String,
    pub size_bytes: u64,
}

/// Tokens received so far, kept by the side that asked for them.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: HashMap<TokenKind, AccessToken>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&mut self, kind: TokenKind, token: AccessToken) {
        self.tokens.insert(kind, token);
    }

    pub fn get(&self, kind: TokenKind) -> Option<&AccessToken> {
        self.tokens.get(&kind)
    }
}

/// Token provider backed by configured credentials.
///
/// Missing credentials resolve to an anonymous token.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    download: Option<String>,
    upload: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(download: Option<String>, upload: Option<String>) -> Self {
        Self { download, upload }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(config.download_token.clone(), config.upload_token.clone())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, kind: TokenKind) -> Result<AccessToken, BlobStoreError> {
        let value = match kind {
            TokenKind::Download => &self.download,
            TokenKind::Upload => &self.upload,
        };
        Ok(value
            .as_ref()
            .map(|v| AccessToken::new(v.clone()))
            .unwrap_or_else(AccessToken::anonymous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::new("sl.very-secret");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
        assert_eq!(
            format!("{:?}", AccessToken::anonymous()),
            "AccessToken(anonymous)"
        );
    }

    #[test]
    fn test_token_cache() {
        let mut cache = TokenCache::new();
        assert!(cache.get(TokenKind::Download).is_none());

        cache.set_token(TokenKind::Download, AccessToken::new("d"));
        assert_eq!(cache.get(TokenKind::Download).unwrap().as_str(), "d");
        assert!(cache.get(TokenKind::Upload).is_none());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new(Some("down".to_string()), None);

        let download = provider.get_token(TokenKind::Download).await.unwrap();
        assert_eq!(download.as_str(), "down");

        let upload = provider.get_token(TokenKind::Upload).await.unwrap();
        assert!(upload.is_anonymous());
    }

    #[test]
    fn test_token_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&TokenKind::Download).unwrap(),
            "\"download\""
        );
    }
}
