pub mod archive;
pub mod blob;
pub mod catalog;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod relay;
pub mod testing;
pub mod transcoder;
pub mod worker;

pub use archive::{create_archive_reader, ArchiveError, ArchiveReader};
pub use blob::{BlobStore, BlobStoreError, FsBlobStore, StaticTokenProvider, TokenProvider};
pub use catalog::{BaseListing, CatalogError, CatalogRecord, CheckpointStore, ContentItem};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use orchestrator::{
    Collaborators, Orchestrator, OrchestratorError, RunSummary, StatusCallback, StopHandle,
};
pub use relay::{RelayBroker, RelayError, RelayUploader, WebhookRelay};
pub use transcoder::{FfmpegTranscoder, TranscodeError, Transcoder};
pub use worker::{Worker, WorkerError};
