//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::RepositoryRecord;
use crate::state::{Partition, PartitionStatus, RunStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult, UpsertCounts};
use crate::storage::RunRecord;
use crate::HarvestError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;

const UPSERT_REPOSITORY_SQL: &str = "
    INSERT INTO repositories (
        github_id, name, owner_login, full_name, description,
        stargazers_count, forks_count, open_issues_count, language,
        created_at, updated_at, pushed_at, disk_usage_kb,
        archived, disabled, license_key, first_seen_at, last_seen_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
    ON CONFLICT(github_id) DO UPDATE SET
        name = excluded.name,
        owner_login = excluded.owner_login,
        full_name = excluded.full_name,
        description = excluded.description,
        stargazers_count = excluded.stargazers_count,
        forks_count = excluded.forks_count,
        open_issues_count = excluded.open_issues_count,
        language = excluded.language,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at,
        pushed_at = excluded.pushed_at,
        disk_usage_kb = excluded.disk_usage_kb,
        archived = excluded.archived,
        disabled = excluded.disabled,
        license_key = excluded.license_key,
        last_seen_at = excluded.last_seen_at";

const REPOSITORY_COLUMNS: &str = "github_id, name, owner_login, full_name, description,
    stargazers_count, forks_count, open_issues_count, language,
    created_at, updated_at, pushed_at, disk_usage_kb, archived, disabled, license_key";

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, status, target_count, discovered_count, plan_fingerprint";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(RunStatus::Interrupted),
        target_count: row.get::<_, i64>(4)?.max(0) as u64,
        discovered_count: row.get::<_, i64>(5)?.max(0) as u64,
        plan_fingerprint: row.get(6)?,
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        github_id: row.get(0)?,
        name: row.get(1)?,
        owner_login: row.get(2)?,
        full_name: row.get(3)?,
        description: row.get(4)?,
        stargazers_count: row.get(5)?,
        forks_count: row.get(6)?,
        open_issues_count: row.get(7)?,
        language: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        pushed_at: row.get(11)?,
        disk_usage_kb: row.get(12)?,
        archived: row.get(13)?,
        disabled: row.get(14)?,
        license_key: row.get(15)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, target_count: u64, plan_fingerprint: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_runs (started_at, status, target_count, plan_fingerprint)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                now,
                RunStatus::Running.to_db_string(),
                target_count as i64,
                plan_fingerprint
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM crawl_runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM crawl_runs ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = NULL WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Partition Progress =====

    fn insert_partitions(&mut self, run_id: i64, partitions: &[Partition]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO crawl_partitions
                 (run_id, partition_key, ordinal, predicate, cursor, status,
                  records_discovered, pages_fetched, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (ordinal, partition) in partitions.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    partition.key,
                    ordinal as i64,
                    partition.predicate,
                    partition.cursor,
                    partition.status.to_db_string(),
                    partition.records_discovered as i64,
                    partition.pages_fetched,
                    partition.last_error,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_partitions(&self, run_id: i64) -> StorageResult<Vec<Partition>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_key, predicate, cursor, status, records_discovered,
                    pages_fetched, last_error
             FROM crawl_partitions WHERE run_id = ?1 ORDER BY ordinal",
        )?;

        let partitions = stmt
            .query_map(params![run_id], |row| {
                Ok(Partition {
                    key: row.get(0)?,
                    predicate: row.get(1)?,
                    cursor: row.get(2)?,
                    status: PartitionStatus::from_db_string(&row.get::<_, String>(3)?)
                        .unwrap_or(PartitionStatus::Pending),
                    records_discovered: row.get::<_, i64>(4)?.max(0) as u64,
                    pages_fetched: row.get(5)?,
                    last_error: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(partitions)
    }

    fn commit_partition(
        &mut self,
        run_id: i64,
        partition: &Partition,
        added: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE crawl_partitions
             SET cursor = ?1, status = ?2, records_discovered = ?3, pages_fetched = ?4,
                 last_error = ?5, updated_at = ?6
             WHERE run_id = ?7 AND partition_key = ?8",
            params![
                partition.cursor,
                partition.status.to_db_string(),
                partition.records_discovered as i64,
                partition.pages_fetched,
                partition.last_error,
                now,
                run_id,
                partition.key,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::PartitionNotFound {
                run_id,
                key: partition.key.clone(),
            });
        }

        if added > 0 {
            tx.execute(
                "UPDATE crawl_runs SET discovered_count = discovered_count + ?1 WHERE id = ?2",
                params![added as i64, run_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn count_partitions_by_status(
        &self,
        run_id: i64,
    ) -> StorageResult<HashMap<PartitionStatus, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM crawl_partitions WHERE run_id = ?1 GROUP BY status",
        )?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = PartitionStatus::from_db_string(&status) {
                counts.insert(status, count.max(0) as u64);
            }
        }

        Ok(counts)
    }

    // ===== Repositories =====

    fn upsert_repositories(
        &mut self,
        records: &[RepositoryRecord],
    ) -> StorageResult<UpsertCounts> {
        if records.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let now = Utc::now().to_rfc3339();
        // Immediate: the row count cannot move under us between the two reads
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let before: i64 = tx.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_REPOSITORY_SQL)?;
            for r in records {
                stmt.execute(params![
                    r.github_id,
                    r.name,
                    r.owner_login,
                    r.full_name,
                    r.description,
                    r.stargazers_count,
                    r.forks_count,
                    r.open_issues_count,
                    r.language,
                    r.created_at,
                    r.updated_at,
                    r.pushed_at,
                    r.disk_usage_kb,
                    r.archived,
                    r.disabled,
                    r.license_key,
                    now,
                ])?;
            }
        }
        let after: i64 = tx.query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        tx.commit()?;

        let inserted = (after - before).max(0) as usize;
        Ok(UpsertCounts {
            inserted,
            updated: records.len().saturating_sub(inserted),
        })
    }

    fn get_repository(&self, github_id: &str) -> StorageResult<Option<RepositoryRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM repositories WHERE github_id = ?1",
                    REPOSITORY_COLUMNS
                ),
                params![github_id],
                repository_from_row,
            )
            .optional()?;

        Ok(record)
    }

    fn list_repositories_by_stars(
        &self,
        limit: Option<usize>,
    ) -> StorageResult<Vec<RepositoryRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM repositories
             ORDER BY stargazers_count DESC, full_name ASC LIMIT ?1",
            REPOSITORY_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![limit], repository_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ===== Statistics =====

    fn count_repositories(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn top_languages(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT language, COUNT(*) AS n FROM repositories
             WHERE language IS NOT NULL
             GROUP BY language ORDER BY n DESC, language ASC LIMIT ?1",
        )?;

        let languages = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(languages)
    }
}
