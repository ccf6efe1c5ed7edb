//! Webhook relay uploader.
//!
//! Posts each segment as a multipart file attachment and turns the returned
//! attachment URL into a stable proxy reference.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::config::RelayConfig;
use super::error::RelayError;
use super::traits::RelayUploader;
use super::types::SegmentUpload;

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    url: String,
}

/// Uploads segments to webhook endpoints over HTTP.
pub struct WebhookRelay {
    client: Client,
}

impl WebhookRelay {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::Rejected(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Converts an attachment URL into `ProxyId=<url-encoded path>`.
///
/// The path is everything after `/attachments/`, without the query string.
/// URLs without an attachment path are returned unchanged.
pub fn proxy_reference(url: &str) -> String {
    match url.split_once("/attachments/") {
        Some((_, rest)) => {
            let path = rest.split_once('?').map_or(rest, |(path, _)| path);
            format!("ProxyId={}", urlencoding::encode(path))
        }
        None => url.to_string(),
    }
}

fn map_send_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        RelayError::Transient(e.to_string())
    } else {
        RelayError::Rejected(e.to_string())
    }
}

/// Playlists go up as text, everything else as a transport stream segment.
fn content_type(file_name: &str) -> &'static str {
    if file_name.to_ascii_lowercase().ends_with(".m3u8") {
        "text/plain"
    } else {
        "video/mp2t"
    }
}

/// Delay in milliseconds from a `Retry-After` value given in seconds.
/// Fractional seconds are accepted; HTTP dates are not.
fn parse_retry_after(value: &str) -> Option<u64> {
    let secs = value.trim().parse::<f64>().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

#[async_trait]
impl RelayUploader for WebhookRelay {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn upload_segment(
        &self,
        endpoint: &str,
        segment: &SegmentUpload,
    ) -> Result<String, RelayError> {
        let bytes = tokio::fs::read(&segment.path).await?;
        let size = bytes.len();

        let part = multipart::Part::bytes(bytes)
            .file_name(segment.file_name.clone())
            .mime_str(content_type(&segment.file_name))
            .map_err(|e| RelayError::Rejected(e.to_string()))?;
        let form = multipart::Form::new().text("content", "").part("file", part);

        let response = self
            .client
            .post(endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(RelayError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(RelayError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        let attachment = body
            .attachments
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::InvalidResponse("response has no attachments".to_string()))?;

        debug!(
            "Relayed {} ({} bytes) for {}",
            segment.file_name, size, segment.item_id
        );
        Ok(proxy_reference(&attachment.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type("abc0.ts"), "video/mp2t");
        assert_eq!(content_type("c1-1-intro.M3U8"), "text/plain");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(3000));
        assert_eq!(parse_retry_after(" 0.25 "), Some(250));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_proxy_reference_encodes_path() {
        let url = "https://cdn.example.com/attachments/123/456/abc0.ts?ex=1&is=2";
        assert_eq!(proxy_reference(url), "ProxyId=123%2F456%2Fabc0.ts");
    }

    #[test]
    fn test_proxy_reference_without_query() {
        let url = "https://cdn.example.com/attachments/1/2/seg 1.ts";
        assert_eq!(proxy_reference(url), "ProxyId=1%2F2%2Fseg%201.ts");
    }

    #[test]
    fn test_proxy_reference_passthrough() {
        assert_eq!(
            proxy_reference("https://example.com/file.ts"),
            "https://example.com/file.ts"
        );
    }

    #[test]
    fn test_response_parsing() {
        let body: WebhookResponse = serde_json::from_str(
            r#"{"id":"1","attachments":[{"id":"9","url":"https://x/attachments/a/b.ts"}]}"#,
        )
        .unwrap();
        assert_eq!(body.attachments[0].url, "https://x/attachments/a/b.ts");

        let empty: WebhookResponse = serde_json::from_str(r#"{"id":"1"}"#).unwrap();
        assert!(empty.attachments.is_empty());
    }

    #[test]
    fn test_new_client() {
        let relay = WebhookRelay::new(&RelayConfig::default()).unwrap();
        assert_eq!(relay.name(), "webhook");
    }
}
