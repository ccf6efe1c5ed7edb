//! Zip archive readers.

use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

use super::error::ArchiveError;
use super::traits::ArchiveReader;
use super::types::{ArchiveEntry, NamePredicate};

/// Upper bound on the buffer reserved from a header's declared size.
const MAX_PREALLOC_BYTES: u64 = 8 << 20;

fn read_entry<R: Read>(name: &str, mut file: R, size_hint: u64) -> Result<Vec<u8>, ArchiveError> {
    // The declared size comes from the archive and is not trusted.
    let mut buf = Vec::with_capacity(size_hint.min(MAX_PREALLOC_BYTES) as usize);
    file.read_to_end(&mut buf)
        .map_err(|e| ArchiveError::entry(name, e))?;
    Ok(buf)
}

/// Reads through the central directory. Supports deferred decompression.
#[derive(Debug, Clone)]
pub struct IndexedZipReader {
    eager: bool,
}

impl IndexedZipReader {
    pub fn new(eager: bool) -> Self {
        Self { eager }
    }

    fn read_blocking(
        bytes: Vec<u8>,
        predicate: NamePredicate,
        eager: bool,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let bytes = Arc::new(bytes);
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        let mut entries = Vec::new();

        for index in 0..archive.len() {
            let file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            if !predicate(&name) {
                continue;
            }

            if eager {
                let size = file.size();
                entries.push(ArchiveEntry::loaded(name.clone(), read_entry(&name, file, size)?));
            } else {
                drop(file);
                let shared = Arc::clone(&bytes);
                let entry_name = name.clone();
                entries.push(ArchiveEntry::deferred(
                    name,
                    Arc::new(move || {
                        let mut archive = ZipArchive::new(Cursor::new(shared.as_slice()))?;
                        let file = archive.by_index(index)?;
                        let size = file.size();
                        read_entry(&entry_name, file, size)
                    }),
                ));
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl ArchiveReader for IndexedZipReader {
    fn name(&self) -> &str {
        "zip-indexed"
    }

    async fn read(
        &self,
        bytes: Vec<u8>,
        predicate: NamePredicate,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let eager = self.eager;
        let entries = tokio::task::spawn_blocking(move || Self::read_blocking(bytes, predicate, eager))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;
        debug!("Read {} matching entries (eager: {})", entries.len(), eager);
        Ok(entries)
    }
}

/// Reads local file headers front to back. Content is always loaded.
#[derive(Debug, Clone, Default)]
pub struct StreamingZipReader;

impl StreamingZipReader {
    pub fn new() -> Self {
        Self
    }

    fn read_blocking(
        bytes: Vec<u8>,
        predicate: NamePredicate,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut reader = Cursor::new(bytes);
        let mut entries = Vec::new();

        while let Some(mut file) = zip::read::read_zipfile_from_stream(&mut reader)? {
            let name = file.name().to_string();
            if file.is_dir() || !predicate(&name) {
                std::io::copy(&mut file, &mut std::io::sink())
                    .map_err(|e| ArchiveError::entry(&name, e))?;
                continue;
            }
            let size = file.size();
            entries.push(ArchiveEntry::loaded(name.clone(), read_entry(&name, &mut file, size)?));
        }

        Ok(entries)
    }
}

#[async_trait]
impl ArchiveReader for StreamingZipReader {
    fn name(&self) -> &str {
        "zip-streaming"
    }

    async fn read(
        &self,
        bytes: Vec<u8>,
        predicate: NamePredicate,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let entries = tokio::task::spawn_blocking(move || Self::read_blocking(bytes, predicate))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;
        debug!("Streamed {} matching entries", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::extension_predicate;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn sample() -> Vec<u8> {
        build_zip(&[
            ("course/1/intro.mp4", b"intro-bytes"),
            ("course/1/notes.pdf", b"pdf"),
            ("course/2/deep-dive.mp4", b"deep-bytes"),
        ])
    }

    #[tokio::test]
    async fn test_indexed_eager_filters_and_loads() {
        let reader = IndexedZipReader::new(true);
        let entries = reader
            .read(sample(), extension_predicate(".mp4"))
            .await
            .unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["course/1/intro.mp4", "course/2/deep-dive.mp4"]);
        assert!(entries.iter().all(|e| e.is_loaded()));
    }

    #[tokio::test]
    async fn test_indexed_lazy_defers_content() {
        let reader = IndexedZipReader::new(false);
        let mut entries = reader
            .read(sample(), extension_predicate(".mp4"))
            .await
            .unwrap();

        assert!(entries.iter().all(|e| !e.is_loaded()));
        let last = entries.pop().unwrap();
        assert_eq!(last.into_bytes().await.unwrap(), b"deep-bytes");
    }

    #[tokio::test]
    async fn test_streaming_matches_indexed() {
        let reader = StreamingZipReader::new();
        let entries = reader
            .read(sample(), extension_predicate(".mp4"))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        let first = entries.into_iter().next().unwrap();
        assert_eq!(first.name(), "course/1/intro.mp4");
        assert_eq!(first.into_bytes().await.unwrap(), b"intro-bytes");
    }

    /// Single stored entry whose headers claim a zip64 uncompressed size of
    /// `declared` while holding only `content`.
    fn forged_zip64(name: &str, content: &[u8], crc: u32, declared: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let zip64_extra = |out: &mut Vec<u8>| {
            out.extend_from_slice(&0x0001u16.to_le_bytes());
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&declared.to_le_bytes());
        };

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // flags, method, time
        out.extend_from_slice(&0x0021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(content.len() as u32).to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&12u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        zip64_extra(&mut out);
        out.extend_from_slice(content);

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&0x0021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(content.len() as u32).to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&12u16.to_le_bytes());
        out.extend_from_slice(&[0; 10]); // comment, disk, attributes
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        zip64_extra(&mut out);
        let cd_size = out.len() as u32 - cd_offset;

        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn test_declared_size_is_not_preallocated() {
        let forged = forged_zip64("lesson.mp4", b"abcd", 0xed82_cd11, 1 << 46);

        for eager in [true, false] {
            let entries = IndexedZipReader::new(eager)
                .read(forged.clone(), extension_predicate(".mp4"))
                .await
                .unwrap();
            assert_eq!(entries.len(), 1);
            let entry = entries.into_iter().next().unwrap();
            assert_eq!(entry.into_bytes().await.unwrap(), b"abcd");
        }

        let entries = StreamingZipReader::new()
            .read(forged, extension_predicate(".mp4"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_archive() {
        let reader = IndexedZipReader::new(true);
        let err = reader
            .read(b"not a zip".to_vec(), extension_predicate(".mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Invalid(_)));
    }
}
