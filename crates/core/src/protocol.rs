//! Message protocol between the orchestrator, workers and the relay broker.
//!
//! Every message is encoded to UTF-8 JSON bytes before it crosses a task
//! boundary. Channels carry [`Frame`]s only.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::{AccessToken, TokenKind};
use crate::catalog::Manifest;
use crate::relay::{UploadResult, UploadTask};

/// Serialized message bytes.
pub type Frame = Vec<u8>;

/// Errors encoding, decoding or delivering frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

/// A JSON message that can cross a task boundary.
pub trait Message: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Frame, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Structured progress reported by workers and the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusUpdate {
    Started {
        name: String,
    },
    Log {
        message: String,
    },
    Downloading {
        path: String,
    },
    Extracting {
        units: usize,
    },
    Transcoding {
        module: String,
        video: String,
        percent: f32,
    },
    Uploading {
        module: String,
        video: String,
        uploaded: usize,
        total: usize,
        /// Tasks still queued behind this one for the same item.
        on_hold: usize,
    },
    Retrying {
        segment: String,
        attempt: u32,
        reason: String,
    },
    Waiting {
        sent: usize,
        received: usize,
    },
    Finished,
}

impl StatusUpdate {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Log { .. } => "log",
            Self::Downloading { .. } => "downloading",
            Self::Extracting { .. } => "extracting",
            Self::Transcoding { .. } => "transcoding",
            Self::Uploading { .. } => "uploading",
            Self::Retrying { .. } => "retrying",
            Self::Waiting { .. } => "waiting",
            Self::Finished => "finished",
        }
    }
}

/// Worker → orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerEvent {
    RequestToken { kind: TokenKind },
    Status { update: StatusUpdate },
    Data { manifest: Manifest },
}

/// [`WorkerEvent`] tagged with the item it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    pub item_id: String,
    pub event: WorkerEvent,
}

impl Message for WorkerEnvelope {}

/// Orchestrator or broker → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerInbound {
    Token {
        kind: TokenKind,
        token: AccessToken,
    },
    TokenDenied {
        kind: TokenKind,
        reason: String,
    },
    UploadResult {
        result: UploadResult,
    },
    UploadFailed {
        module_key: String,
        video_key: String,
        reason: String,
    },
}

impl Message for WorkerInbound {}

/// Worker → broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueData {
    pub item_id: String,
    pub task: UploadTask,
}

impl Message for QueueData {}

/// Broker → orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BrokerEvent {
    Status {
        item_id: String,
        update: StatusUpdate,
    },
    UploadResult {
        item_id: String,
        result: UploadResult,
    },
    UploadFailed {
        item_id: String,
        module_key: String,
        video_key: String,
        reason: String,
    },
    /// The broker cannot continue. Terminates the run.
    Reject { reason: String },
}

impl Message for BrokerEvent {}
