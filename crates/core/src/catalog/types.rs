//! Types for the catalog module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Module key -> video key -> uploaded playlist reference.
pub type ModuleMap = BTreeMap<String, BTreeMap<String, String>>;

/// One migrated item as persisted in the checkpoint store.
///
/// Metadata carried over from the base listing (icon, category, ...) is kept
/// in `extra` and written back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub name: String,
    #[serde(default)]
    pub modules: ModuleMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogRecord {
    /// Builds a record from a base listing entry and a finished manifest.
    pub fn from_manifest(base: Option<&BaseEntry>, manifest: &Manifest) -> Self {
        match base {
            Some(entry) => Self {
                name: entry.name.clone(),
                modules: manifest.modules.clone(),
                extra: entry.extra.clone(),
            },
            None => Self {
                name: manifest.name.clone(),
                modules: manifest.modules.clone(),
                extra: Map::new(),
            },
        }
    }

    /// Overlays `other` onto this record. Module/video pairs from `other` win.
    pub fn merge(&mut self, other: CatalogRecord) {
        self.name = other.name;
        for (module, videos) in other.modules {
            self.modules.entry(module).or_default().extend(videos);
        }
        self.extra.extend(other.extra);
    }

    /// Number of videos across all modules.
    pub fn video_count(&self) -> usize {
        self.modules.values().map(|videos| videos.len()).sum()
    }
}

/// An entry of the read-only base listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEntry {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result a worker reports for a fully processed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub item_id: String,
    pub name: String,
    pub modules: ModuleMap,
}

/// Lifecycle of a content item inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One top-level archive to migrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub display_name: String,
    /// Location of the archive in the source store.
    pub source_path: String,
    pub status: ItemStatus,
}

impl ContentItem {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            source_path: source_path.into(),
            status: ItemStatus::Pending,
        }
    }
}
