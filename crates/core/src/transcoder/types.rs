//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A request to turn one video into an HLS playlist plus segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJob {
    /// Unique job ID.
    pub job_id: String,
    /// Item the video belongs to.
    pub item_id: String,
    /// Raw input video.
    pub input_path: PathBuf,
    /// Directory receiving the playlist and the segments.
    pub output_dir: PathBuf,
    /// Playlist file stem. Segments are named `{stem}{n}.ts`.
    pub stem: String,
}

impl TranscodeJob {
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.m3u8", self.stem))
    }

    pub fn segment_pattern(&self) -> PathBuf {
        self.output_dir.join(format!("{}%d.ts", self.stem))
    }
}

/// Progress update during a transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeProgress {
    pub job_id: String,
    /// Progress percentage (0-100).
    pub percent: f32,
    /// Output time processed so far in seconds.
    pub time_secs: f64,
    /// Input duration if known.
    pub duration_secs: Option<f64>,
    /// Encoding speed, e.g. "2.5x".
    pub speed: Option<String>,
}

/// Result of a finished transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeOutput {
    pub job_id: String,
    pub playlist_path: PathBuf,
    /// Playlist text as written by the transcoder.
    pub playlist: String,
    /// Segment file names, sorted.
    pub segments: Vec<String>,
    pub duration_ms: u64,
}

/// Lists `.ts` segment file names in `dir`, sorted.
pub async fn list_segments(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".ts") && entry.file_type().await?.is_file() {
            segments.push(name);
        }
    }
    segments.sort();
    Ok(segments)
}
