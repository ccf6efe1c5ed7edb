//! Trait definitions for the archive module.

use async_trait::async_trait;

use super::error::ArchiveError;
use super::types::{ArchiveEntry, NamePredicate};

/// Reads the entries of an archive held in memory.
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    /// Returns the name of this reader implementation.
    fn name(&self) -> &str;

    /// Returns the file entries whose names satisfy `predicate`, in archive order.
    async fn read(
        &self,
        bytes: Vec<u8>,
        predicate: NamePredicate,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError>;
}
