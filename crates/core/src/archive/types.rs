//! Types for the archive module.

use std::fmt;
use std::sync::Arc;

use super::error::ArchiveError;

/// Filter applied to entry names.
pub type NamePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Deferred content loader.
pub type EntryLoader = Arc<dyn Fn() -> Result<Vec<u8>, ArchiveError> + Send + Sync>;

/// Matches entries by file extension, case-insensitively.
pub fn extension_predicate(extension: &str) -> NamePredicate {
    let extension = extension.to_ascii_lowercase();
    Arc::new(move |name: &str| name.to_ascii_lowercase().ends_with(&extension))
}

enum EntryContent {
    Loaded(Vec<u8>),
    Deferred(EntryLoader),
}

/// One file inside an archive.
pub struct ArchiveEntry {
    name: String,
    content: EntryContent,
}

impl ArchiveEntry {
    pub fn loaded(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: EntryContent::Loaded(bytes),
        }
    }

    pub fn deferred(name: impl Into<String>, loader: EntryLoader) -> Self {
        Self {
            name: name.into(),
            content: EntryContent::Deferred(loader),
        }
    }

    /// Full path of the entry inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.content, EntryContent::Loaded(_))
    }

    /// Materializes the content, decompressing deferred entries off the runtime.
    pub async fn into_bytes(self) -> Result<Vec<u8>, ArchiveError> {
        match self.content {
            EntryContent::Loaded(bytes) => Ok(bytes),
            EntryContent::Deferred(loader) => tokio::task::spawn_blocking(move || loader())
                .await
                .map_err(|e| ArchiveError::Task(e.to_string()))?,
        }
    }
}

impl fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
