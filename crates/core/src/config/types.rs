use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::relay::RelayConfig;
use crate::transcoder::TranscoderConfig;
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Checkpoint and listing files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// The checkpoint store, rewritten on every flush.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    /// Read-only listing of every item the migration targets.
    #[serde(default = "default_base_listing_path")]
    pub base_listing_path: PathBuf,
    /// Optional id -> archive file index. When absent the source root is listed.
    #[serde(default)]
    pub content_index_path: Option<PathBuf>,
    /// Destination path of the final name -> id manifest.
    #[serde(default = "default_names_manifest_path")]
    pub names_manifest_path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            base_listing_path: default_base_listing_path(),
            content_index_path: None,
            names_manifest_path: default_names_manifest_path(),
        }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("database.json")
}

fn default_base_listing_path() -> PathBuf {
    PathBuf::from("data/base-catalog.json")
}

fn default_names_manifest_path() -> String {
    "names.json".to_string()
}

/// Blob store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Root directory of the filesystem-backed store.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("store")
}

/// Where source archives live inside the store
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: String,
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            archive_extension: default_archive_extension(),
        }
    }
}

fn default_source_path() -> String {
    "courses".to_string()
}

fn default_archive_extension() -> String {
    ".zip".to_string()
}

/// Where migration output is uploaded inside the store
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    #[serde(default = "default_destination_path")]
    pub path: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            path: default_destination_path(),
        }
    }
}

fn default_destination_path() -> String {
    "migrated".to_string()
}

/// Archive reader backend
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveBackend {
    /// Random access through the central directory.
    #[default]
    Indexed,
    /// Sequential read of local file headers.
    Streaming,
}

/// Archive reader configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub backend: ArchiveBackend,
    /// Decompress entry content while reading instead of on first access.
    /// The streaming backend always reads eagerly.
    #[serde(default = "default_eager")]
    pub eager: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackend::default(),
            eager: default_eager(),
        }
    }
}

fn default_eager() -> bool {
    true
}

/// Credentials handed to workers on request
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub download_token: Option<String>,
    #[serde(default)]
    pub upload_token: Option<String>,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub catalog: CatalogConfig,
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub orchestrator: OrchestratorConfig,
    pub worker: WorkerConfig,
    pub archive: ArchiveConfig,
    pub transcoder: TranscoderConfig,
    pub relay: SanitizedRelayConfig,
    pub credentials: SanitizedCredentialsConfig,
}

/// Relay config with endpoint URLs hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRelayConfig {
    pub endpoint_count: usize,
    pub rotation_threshold: u32,
    pub chunk_width: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub requests_per_minute: u32,
    pub abort_run_on_rate_limit: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCredentialsConfig {
    pub download_token_configured: bool,
    pub upload_token_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            catalog: config.catalog.clone(),
            store: config.store.clone(),
            source: config.source.clone(),
            destination: config.destination.clone(),
            orchestrator: config.orchestrator.clone(),
            worker: config.worker.clone(),
            archive: config.archive.clone(),
            transcoder: config.transcoder.clone(),
            relay: SanitizedRelayConfig {
                endpoint_count: config.relay.endpoints.len(),
                rotation_threshold: config.relay.rotation_threshold,
                chunk_width: config.relay.chunk_width,
                max_attempts: config.relay.max_attempts,
                retry_delay_ms: config.relay.retry_delay_ms,
                requests_per_minute: config.relay.requests_per_minute,
                abort_run_on_rate_limit: config.relay.abort_run_on_rate_limit,
                timeout_secs: config.relay.timeout_secs,
            },
            credentials: SanitizedCredentialsConfig {
                download_token_configured: config
                    .credentials
                    .download_token
                    .as_ref()
                    .is_some_and(|t| !t.is_empty()),
                upload_token_configured: config
                    .credentials
                    .upload_token
                    .as_ref()
                    .is_some_and(|t| !t.is_empty()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.catalog.checkpoint_path, PathBuf::from("database.json"));
        assert_eq!(config.source.archive_extension, ".zip");
        assert_eq!(config.orchestrator.concurrency, 2);
        assert_eq!(config.relay.chunk_width, 45);
        assert_eq!(config.archive.backend, ArchiveBackend::Indexed);
        assert!(config.archive.eager);
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[catalog]
checkpoint_path = "/var/lib/segrelay/db.json"
content_index_path = "data/content-ids.json"

[store]
root = "/mnt/store"

[source]
path = "archives"

[archive]
backend = "streaming"
eager = false

[relay]
endpoints = ["https://relay.example/a", "https://relay.example/b"]
rotation_threshold = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.catalog.checkpoint_path,
            PathBuf::from("/var/lib/segrelay/db.json")
        );
        assert_eq!(
            config.catalog.content_index_path,
            Some(PathBuf::from("data/content-ids.json"))
        );
        assert_eq!(config.store.root, PathBuf::from("/mnt/store"));
        assert_eq!(config.source.path, "archives");
        assert_eq!(config.archive.backend, ArchiveBackend::Streaming);
        assert!(!config.archive.eager);
        assert_eq!(config.relay.endpoints.len(), 2);
        assert_eq!(config.relay.rotation_threshold, 5);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.relay.endpoints = vec!["https://relay.example/secret".to_string()];
        config.credentials.upload_token = Some("token".to_string());

        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(!json.contains("secret"));
        assert!(!json.contains("\"token\""));
        assert_eq!(sanitized.relay.endpoint_count, 1);
        assert!(sanitized.credentials.upload_token_configured);
        assert!(!sanitized.credentials.download_token_configured);
    }
}
