//! Source and base listings.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::blob::{join_store_path, AccessToken, BlobStore};

use super::{BaseEntry, CatalogError, CheckpointStore, ContentItem};

/// Read-only listing of every item the migration targets.
#[derive(Debug, Clone, Default)]
pub struct BaseListing {
    entries: BTreeMap<String, BaseEntry>,
}

impl BaseListing {
    /// Loads the base listing. A missing file is fatal.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::BaseListingMissing(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let entries = serde_json::from_str(&raw).map_err(|e| CatalogError::ListingCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: BTreeMap<String, BaseEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&BaseEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BaseEntry)> {
        self.entries.iter()
    }
}

/// Loads the id -> archive file index.
pub fn load_content_index(path: &Path) -> Result<BTreeMap<String, String>, CatalogError> {
    if !path.exists() {
        return Err(CatalogError::ContentIndexMissing(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| CatalogError::ListingCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn display_name(id: &str, file_name: &str, extension: &str, base: &BaseListing) -> String {
    match base.get(id) {
        Some(entry) => entry.name.clone(),
        None => file_name
            .strip_suffix(extension)
            .unwrap_or(file_name)
            .to_string(),
    }
}

/// Builds content items from an id -> archive file index.
pub fn items_from_index(
    index: &BTreeMap<String, String>,
    source_path: &str,
    extension: &str,
    base: &BaseListing,
) -> Vec<ContentItem> {
    index
        .iter()
        .map(|(id, file_name)| {
            ContentItem::new(
                id.clone(),
                display_name(id, file_name, extension, base),
                join_store_path(source_path, file_name),
            )
        })
        .collect()
}

/// Lists the source directory and turns every archive into a content item.
/// The file stem is used as the item id.
pub async fn discover_items(
    store: &dyn BlobStore,
    token: &AccessToken,
    source_path: &str,
    extension: &str,
    base: &BaseListing,
) -> Result<Vec<ContentItem>, CatalogError> {
    let entries = store
        .list(source_path, false, token)
        .await
        .map_err(|e| CatalogError::SourceListing(e.to_string()))?;

    let mut items: Vec<ContentItem> = entries
        .into_iter()
        .filter(|entry| entry.is_file && entry.name.ends_with(extension))
        .map(|entry| {
            let id = entry
                .name
                .strip_suffix(extension)
                .unwrap_or(&entry.name)
                .to_string();
            ContentItem::new(
                id.clone(),
                display_name(&id, &entry.name, extension, base),
                join_store_path(source_path, &entry.name),
            )
        })
        .collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));

    debug!("Discovered {} archives under {:?}", items.len(), source_path);
    Ok(items)
}

/// Items that have not been checkpointed yet, in listing order.
pub fn pending_items(items: Vec<ContentItem>, store: &CheckpointStore) -> Vec<ContentItem> {
    let total = items.len();
    let pending: Vec<ContentItem> = items.into_iter().filter(|i| !store.has(&i.id)).collect();
    if pending.len() < total {
        debug!(
            "Skipping {} items already checkpointed",
            total - pending.len()
        );
    }
    pending
}

/// Loads the rename mapping used to correct item names: `[{"old": .., "new": ..}]`.
pub fn load_rename_mapping(path: &Path) -> Result<BTreeMap<String, String>, CatalogError> {
    #[derive(serde::Deserialize)]
    struct Rename {
        old: String,
        new: String,
    }

    let raw = fs::read_to_string(path)?;
    let renames: Vec<Rename> =
        serde_json::from_str(&raw).map_err(|e| CatalogError::ListingCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut mapping = BTreeMap::new();
    for rename in renames {
        if let Some(previous) = mapping.insert(rename.old.clone(), rename.new) {
            warn!("Duplicate rename for {:?}, dropping {:?}", rename.old, previous);
        }
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBlobStore;
    use tempfile::TempDir;

    fn base_listing() -> BaseListing {
        let mut entries = BTreeMap::new();
        entries.insert(
            "c1".to_string(),
            BaseEntry {
                name: "Course One".to_string(),
                extra: Default::default(),
            },
        );
        BaseListing::from_entries(entries)
    }

    #[test]
    fn test_missing_base_listing_is_fatal() {
        let err = BaseListing::load(Path::new("/nonexistent/base.json")).unwrap_err();
        assert!(matches!(err, CatalogError::BaseListingMissing(_)));
    }

    #[test]
    fn test_load_base_listing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("base.json");
        fs::write(
            &path,
            r#"{"c1": {"name": "Course One", "icon": "1.png"}, "c2": {"name": "Course Two"}}"#,
        )
        .unwrap();

        let listing = BaseListing::load(&path).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing.get("c1").unwrap().name, "Course One");
        assert!(listing.get("c1").unwrap().extra.contains_key("icon"));
    }

    #[test]
    fn test_items_from_index_uses_base_names() {
        let index = BTreeMap::from([
            ("c1".to_string(), "course-one.zip".to_string()),
            ("c9".to_string(), "unlisted.zip".to_string()),
        ]);
        let items = items_from_index(&index, "courses", ".zip", &base_listing());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].display_name, "Course One");
        assert_eq!(items[0].source_path, "courses/course-one.zip");
        assert_eq!(items[1].display_name, "unlisted");
    }

    #[tokio::test]
    async fn test_discover_items_filters_archives() {
        let store = MockBlobStore::new();
        store.put("courses/c1.zip", b"zip".to_vec()).await;
        store.put("courses/c2.zip", b"zip".to_vec()).await;
        store.put("courses/readme.txt", b"txt".to_vec()).await;

        let items = discover_items(
            &store,
            &AccessToken::anonymous(),
            "courses",
            ".zip",
            &base_listing(),
        )
        .await
        .unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(items[0].display_name, "Course One");
        assert_eq!(items[1].display_name, "c2");
    }

    #[test]
    fn test_load_rename_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixes.json");
        fs::write(&path, r#"[{"old": "Rust 1O1", "new": "Rust 101"}]"#).unwrap();

        let mapping = load_rename_mapping(&path).unwrap();
        assert_eq!(mapping.get("Rust 1O1").map(String::as_str), Some("Rust 101"));
    }
}
