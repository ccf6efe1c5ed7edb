//! Segment relay.
//!
//! Uploads HLS segments through a pool of rate-limited endpoints and rewrites
//! playlists to point at the uploaded references.

mod broker;
mod client;
mod config;
mod error;
mod pacing;
mod playlist;
mod republish;
mod rotation;
mod traits;
mod types;
mod webhook;

pub use broker::{BrokerHandle, RelayBroker};
pub use client::RelayClient;
pub use config::RelayConfig;
pub use error::RelayError;
pub use pacing::{RequestPacer, TokenBucket};
pub use playlist::substitute_segments;
pub use republish::{PlaylistRepublisher, RepublishError, RepublishSummary};
pub use rotation::{EndpointPool, RotationSlot};
pub use traits::RelayUploader;
pub use types::{SegmentUpload, UploadResult, UploadTask};
pub use webhook::{proxy_reference, WebhookRelay};
