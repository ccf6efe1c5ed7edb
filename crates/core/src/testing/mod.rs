//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator trait,
//! allowing the orchestrator, workers and broker to be exercised without
//! ffmpeg, a network relay or a real store.
//!
//! # Example
//!
//! ```rust,ignore
//! use segrelay_core::testing::{MockBlobStore, MockRelay, MockTranscoder};
//!
//! let store = MockBlobStore::new();
//! store.put("courses/c1.zip", fixtures::course_archive("c1")).await;
//!
//! let transcoder = MockTranscoder::new();
//! transcoder.fail_item("c2").await;
//! ```

mod mock_blob_store;
mod mock_relay;
mod mock_token_provider;
mod mock_transcoder;

pub use mock_blob_store::{MockBlobStore, RecordedBlobUpload};
pub use mock_relay::{MockRelay, RecordedSegmentUpload};
pub use mock_token_provider::MockTokenProvider;
pub use mock_transcoder::MockTranscoder;
pub use fixtures::{build_zip, write_hls_fixture};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::{Cursor, Write};
    use std::path::{Path, PathBuf};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Builds an in-memory zip archive.
    ///
    /// Panics on write errors, which cannot happen for an in-memory buffer.
    pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// A course archive with two modules and three videos.
    pub fn course_archive(name: &str) -> Vec<u8> {
        build_zip(&[
            (&format!("{}/1/intro.mp4", name), b"intro"),
            (&format!("{}/1/setup.mp4", name), b"setup"),
            (&format!("{}/2/deep-dive.mp4", name), b"deep-dive"),
            (&format!("{}/2/slides.pdf", name), b"pdf"),
        ])
    }

    /// Writes `{stem}.m3u8` and `{stem}0.ts` .. `{stem}{n-1}.ts` into `folder`.
    /// Returns the playlist path.
    pub fn write_hls_fixture(folder: &Path, stem: &str, segments: usize) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(folder)?;

        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n",
        );
        for n in 0..segments {
            let name = format!("{}{}.ts", stem, n);
            std::fs::write(folder.join(&name), format!("segment {}", n))?;
            playlist.push_str("#EXTINF:10.000000,\n");
            playlist.push_str(&name);
            playlist.push('\n');
        }
        playlist.push_str("#EXT-X-ENDLIST\n");

        let path = folder.join(format!("{}.m3u8", stem));
        std::fs::write(&path, playlist)?;
        Ok(path)
    }
}
