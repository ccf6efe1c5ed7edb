//! Catalog of migrated items.
//!
//! Holds the checkpoint store that makes runs resumable, the read-only base
//! listing, source discovery and the SQLite export.

mod listing;
mod sqlite;
mod store;
mod types;

pub use listing::{
    discover_items, items_from_index, load_content_index, load_rename_mapping, pending_items,
    BaseListing,
};
pub use sqlite::{export_catalog, verify_export, ExportSummary, VerifyReport};
pub use store::CheckpointStore;
pub use types::{BaseEntry, CatalogRecord, ContentItem, ItemStatus, Manifest, ModuleMap};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The checkpoint file exists but cannot be parsed.
    #[error("checkpoint store {path:?} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    /// The required base listing does not exist.
    #[error("base listing not found: {0:?}")]
    BaseListingMissing(PathBuf),

    /// The configured content index does not exist.
    #[error("content index not found: {0:?}")]
    ContentIndexMissing(PathBuf),

    /// A listing file cannot be parsed.
    #[error("listing {path:?} is invalid: {reason}")]
    ListingCorrupt { path: PathBuf, reason: String },

    /// Listing the source store failed.
    #[error("failed to list source store: {0}")]
    SourceListing(String),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// SQLite error during export or verification.
    #[error("database error: {0}")]
    Database(String),

    /// The blocking write task failed.
    #[error("checkpoint task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
