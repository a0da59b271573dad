//! Storage module for persisting harvested data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Conflict-safe repository upserts
//! - Crawl run and partition progress tracking for resumption
//! - Batched, retrying writes off the async runtime

mod schema;
mod sqlite;
mod traits;
mod writer;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult, UpsertCounts};
pub use writer::{RepositorySink, UpsertWriter};

use crate::state::RunStatus;
use crate::HarvestError;

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub target_count: u64,

    /// Records committed across every invocation of this run
    pub discovered_count: u64,

    pub plan_fingerprint: String,
}
