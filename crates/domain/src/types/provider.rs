//! Remote provider catalog types

use serde::{Deserialize, Serialize};

/// One endpoint listing from the remote provider catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Provider-side identity; becomes the sticky `provider_ref`.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub region: String,
}

/// Dry-run preview row: a catalog entry annotated with local import state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPreview {
    pub entry: CatalogEntry,
    pub already_imported: bool,
}

/// Outcome of an import pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: u32,
    pub refreshed: u32,
    pub skipped: u32,
}
