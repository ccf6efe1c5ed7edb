//! JSON checkpoint store.
//!
//! The store is a single JSON object keyed by item id. Records are staged in
//! memory and only reach disk through [`CheckpointStore::flush`], which
//! rewrites the whole file through a temporary sibling and a rename.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{CatalogError, CatalogRecord};

/// Durable mapping of completed items.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    persisted: BTreeMap<String, CatalogRecord>,
    staged: BTreeMap<String, CatalogRecord>,
}

impl CheckpointStore {
    /// Opens the store at `path`, creating an empty one if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&path, "{}")?;
            info!("Created empty checkpoint store at {:?}", path);
        }

        let persisted = Self::read_file(&path)?;
        debug!(
            "Loaded {} checkpointed items from {:?}",
            persisted.len(),
            path
        );

        Ok(Self {
            path,
            persisted,
            staged: BTreeMap::new(),
        })
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, CatalogRecord>, CatalogError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| CatalogError::StoreCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All persisted records. Staged records are not included.
    pub fn load(&self) -> &BTreeMap<String, CatalogRecord> {
        &self.persisted
    }

    /// Whether `id` has been checkpointed.
    pub fn has(&self, id: &str) -> bool {
        self.persisted.contains_key(id)
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.persisted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persisted.is_empty()
    }

    /// Buffers a record for the next flush. No I/O.
    pub fn stage(&mut self, id: impl Into<String>, record: CatalogRecord) {
        let id = id.into();
        match self.staged.get_mut(&id) {
            Some(existing) => existing.merge(record),
            None => {
                self.staged.insert(id, record);
            }
        }
    }

    /// Number of records waiting for a flush.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Writes persisted and staged records atomically and clears the buffer.
    ///
    /// Returns the number of records that were staged. Nothing is written
    /// when the buffer is empty.
    pub fn flush(&mut self) -> Result<usize, CatalogError> {
        let Some(merged) = self.merged() else {
            return Ok(0);
        };
        let json = Self::serialize(&merged)?;
        Self::write_atomic(&self.path, json.as_bytes())?;
        Ok(self.commit(merged))
    }

    /// Same as [`CheckpointStore::flush`], with the file I/O moved to the
    /// blocking pool.
    pub async fn flush_async(&mut self) -> Result<usize, CatalogError> {
        let Some(merged) = self.merged() else {
            return Ok(0);
        };
        let json = Self::serialize(&merged)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&path, json.as_bytes()))
            .await
            .map_err(|e| CatalogError::Task(e.to_string()))??;
        Ok(self.commit(merged))
    }

    /// Persisted records with the staged ones merged in, or `None` when
    /// nothing is staged.
    fn merged(&self) -> Option<BTreeMap<String, CatalogRecord>> {
        if self.staged.is_empty() {
            return None;
        }

        let mut merged = self.persisted.clone();
        for (id, record) in &self.staged {
            match merged.get_mut(id) {
                Some(existing) => existing.merge(record.clone()),
                None => {
                    merged.insert(id.clone(), record.clone());
                }
            }
        }
        Some(merged)
    }

    fn commit(&mut self, merged: BTreeMap<String, CatalogRecord>) -> usize {
        let flushed = self.staged.len();
        self.persisted = merged;
        self.staged.clear();
        debug!(
            "Flushed {} records, {} checkpointed in total",
            flushed,
            self.persisted.len()
        );
        flushed
    }

    fn serialize(records: &BTreeMap<String, CatalogRecord>) -> Result<String, CatalogError> {
        serde_json::to_string_pretty(records).map_err(|e| CatalogError::Serialize(e.to_string()))
    }

    /// Writes `contents` to a synced temp sibling, renames it over `path`
    /// and syncs the parent directory.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CatalogError> {
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, path)?;
        Self::sync_parent(path)?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_parent(path: &Path) -> Result<(), CatalogError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(_path: &Path) -> Result<(), CatalogError> {
        Ok(())
    }

    /// Renames persisted records according to `renames` (old name -> new name)
    /// and stages the changed records. Returns how many records changed.
    pub fn stage_renames(&mut self, renames: &BTreeMap<String, String>) -> usize {
        let changed: Vec<(String, CatalogRecord)> = self
            .persisted
            .iter()
            .filter_map(|(id, record)| {
                renames.get(&record.name).map(|new_name| {
                    let mut renamed = record.clone();
                    renamed.name = new_name.clone();
                    (id.clone(), renamed)
                })
            })
            .collect();

        let count = changed.len();
        for (id, record) in changed {
            self.staged.insert(id, record);
        }
        count
    }
}
