//! Archive readers.
//!
//! Two interchangeable zip backends: [`IndexedZipReader`] goes through the
//! central directory and can defer decompression, [`StreamingZipReader`]
//! walks local headers in order.

mod error;
mod traits;
mod types;
mod zip_reader;

pub use error::ArchiveError;
pub use traits::ArchiveReader;
pub use types::{extension_predicate, ArchiveEntry, EntryLoader, NamePredicate};
pub use zip_reader::{IndexedZipReader, StreamingZipReader};

use std::sync::Arc;

use crate::config::{ArchiveBackend, ArchiveConfig};

/// Builds the reader selected in configuration.
pub fn create_archive_reader(config: &ArchiveConfig) -> Arc<dyn ArchiveReader> {
    match config.backend {
        ArchiveBackend::Indexed => Arc::new(IndexedZipReader::new(config.eager)),
        ArchiveBackend::Streaming => Arc::new(StreamingZipReader::new()),
    }
}
