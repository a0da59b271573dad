//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::crawler::RepositoryRecord;
use crate::state::{Partition, PartitionStatus, RunStatus};
use crate::storage::RunRecord;
use std::collections::HashMap;
use thiserror::Error;

/// Outcome of an upsert: rows created vs. rows overwritten
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Partition not found: {run_id}/{key}")]
    PartitionNotFound { run_id: i64, key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Write failed after {attempts} attempts: {last}")]
    WriteFailed { attempts: u32, last: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the harvester.
/// Callers share one backend behind a mutex; every method that writes more
/// than one row does so in a single transaction.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run in the `running` state
    ///
    /// # Arguments
    ///
    /// * `target_count` - Records after which the crawl counts as complete
    /// * `plan_fingerprint` - Fingerprint of the partition plan
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, target_count: u64, plan_fingerprint: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run (clears `finished_at` when going back to running)
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Sets a run's final status with a finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Partition Progress =====

    /// Persists the full partition plan of a run
    fn insert_partitions(&mut self, run_id: i64, partitions: &[Partition]) -> StorageResult<()>;

    /// Loads a run's partitions in plan order
    fn load_partitions(&self, run_id: i64) -> StorageResult<Vec<Partition>>;

    /// Commits a partition's position and adds `added` records to the run total
    ///
    /// Both updates happen in one transaction, so a crash never leaves the
    /// aggregate count out of step with the partition rows.
    fn commit_partition(
        &mut self,
        run_id: i64,
        partition: &Partition,
        added: u64,
    ) -> StorageResult<()>;

    /// Counts a run's partitions by status
    fn count_partitions_by_status(
        &self,
        run_id: i64,
    ) -> StorageResult<HashMap<PartitionStatus, u64>>;

    // ===== Repositories =====

    /// Inserts or fully overwrites every record, in one transaction
    ///
    /// # Returns
    ///
    /// How many records created a new row and how many overwrote one
    fn upsert_repositories(&mut self, records: &[RepositoryRecord])
        -> StorageResult<UpsertCounts>;

    /// Gets a repository by its node id
    fn get_repository(&self, github_id: &str) -> StorageResult<Option<RepositoryRecord>>;

    /// Lists repositories ordered by stars, most starred first
    fn list_repositories_by_stars(
        &self,
        limit: Option<usize>,
    ) -> StorageResult<Vec<RepositoryRecord>>;

    // ===== Statistics =====

    /// Gets total repository count
    fn count_repositories(&self) -> StorageResult<u64>;

    /// Most common primary languages with their repository counts
    fn top_languages(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
