//! Types for the relay module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One transcoded unit waiting for its segments to be relayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub item_id: String,
    pub module_key: String,
    pub video_key: String,
    /// Directory holding the playlist and its `.ts` segments.
    pub local_folder: PathBuf,
    pub playlist_path: PathBuf,
}

/// Outcome of a fully relayed task, returned to the submitting worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub module_key: String,
    pub video_key: String,
    pub folder: PathBuf,
    /// Playlist text with every segment name replaced by its reference.
    pub playlist: String,
}

/// A single segment file handed to a [`RelayUploader`](super::RelayUploader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentUpload {
    pub item_id: String,
    pub file_name: String,
    pub path: PathBuf,
}
