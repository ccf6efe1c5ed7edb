//! HLS transcoding.
//!
//! Each unit is converted to an HLS playlist plus `.ts` segments by an
//! external ffmpeg process. Progress is parsed from `-progress pipe:2`.

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::TranscoderConfig;
pub use error::TranscodeError;
pub use ffmpeg::FfmpegTranscoder;
pub use traits::Transcoder;
pub use types::{list_segments, TranscodeJob, TranscodeOutput, TranscodeProgress};
