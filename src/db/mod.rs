//! Database layer for modfetch
//!
//! SQLite persistence for the artifact cache.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by table:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`artifacts`] - Authoritative per-artifact metadata and its conflict-checked merge
//! - [`local_copies`] - Paths of archives found on this machine, keyed by fingerprint digest

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod artifacts;
mod local_copies;
mod migrations;

pub use artifacts::MergeSummary;

/// Authoritative metadata for one artifact
///
/// Every field has exactly one canonical value. A field known both locally and remotely
/// must agree, otherwise one of the two databases is corrupt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ArtifactRecord {
    /// Hex digest of the archive fingerprint (primary key)
    pub fingerprint: String,
    /// Canonical file name of the archive
    #[serde(default)]
    pub canonical_filename: Option<String>,
    /// Short human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Self-reported mod id
    #[serde(default)]
    pub modid: Option<String>,
    /// Self-reported mod version
    #[serde(default)]
    pub version: Option<String>,
    /// Pipe-delimited list of compatible game versions
    #[serde(default)]
    pub mc_versions: Option<String>,
    /// Mod loader and its version
    #[serde(default)]
    pub loader: Option<String>,
    /// Pipe-delimited required mod ids with version constraints; empty means none
    #[serde(default)]
    pub dependencies: Option<String>,
    /// Like `dependencies`, for optional companions
    #[serde(default)]
    pub recommendations: Option<String>,
    /// SHA-256 of the pristine archive as distributed
    #[serde(default)]
    pub canonical_sha256: Option<String>,
    /// Size in bytes of the pristine archive as distributed
    #[serde(default)]
    pub canonical_filesize: Option<i64>,
}

impl ArtifactRecord {
    /// A record that carries nothing but its key
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            ..Default::default()
        }
    }
}

/// Local copy record from database
#[derive(Debug, Clone, FromRow)]
pub struct LocalCopyRow {
    /// Unique database ID, also the registration order
    pub id: i64,
    /// Hex digest of the archive fingerprint
    pub fingerprint: String,
    /// Absolute path of the copy
    pub path: String,
    /// Unix timestamp when the copy was registered
    pub added_at: i64,
}

impl LocalCopyRow {
    /// The stored path
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// Database handle for modfetch
pub struct Database {
    pool: SqlitePool,
}
