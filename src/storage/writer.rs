//! Batched upsert writer
//!
//! Pages arrive from concurrent workers; each is split into batches that are
//! written one transaction at a time on the blocking thread pool. A failed
//! batch is retried with the same backoff policy the request executor uses.

use crate::crawler::backoff::{BackoffPolicy, RetryDecision};
use crate::crawler::clock::Clock;
use crate::crawler::RepositoryRecord;
use crate::storage::{Storage, StorageError, StorageResult, UpsertCounts};
use std::sync::{Arc, Mutex};

/// Destination for one batch of repository records
///
/// Implementations are called from the blocking thread pool and must commit
/// the whole batch or nothing.
pub trait RepositorySink: Send + Sync {
    fn write_batch(&self, batch: &[RepositoryRecord]) -> StorageResult<UpsertCounts>;
}

impl<S: Storage + Send> RepositorySink for Mutex<S> {
    fn write_batch(&self, batch: &[RepositoryRecord]) -> StorageResult<UpsertCounts> {
        let mut storage = self.lock().unwrap_or_else(|e| e.into_inner());
        storage.upsert_repositories(batch)
    }
}

/// Conflict-safe, retrying writer shared by all workers
#[derive(Clone)]
pub struct UpsertWriter {
    sink: Arc<dyn RepositorySink>,
    batch_size: usize,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl UpsertWriter {
    pub fn new(
        sink: Arc<dyn RepositorySink>,
        batch_size: usize,
        backoff: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            backoff,
            clock,
        }
    }

    /// Upserts every record, batch by batch
    ///
    /// # Returns
    ///
    /// * `Ok(UpsertCounts)` - Records inserted and overwritten
    /// * `Err(StorageError::WriteFailed)` - A batch kept failing past the retry ceiling
    pub async fn write(&self, records: Vec<RepositoryRecord>) -> StorageResult<UpsertCounts> {
        let mut written = UpsertCounts::default();
        for batch in records.chunks(self.batch_size) {
            written += self.write_batch(batch.to_vec()).await?;
        }
        Ok(written)
    }

    async fn write_batch(&self, batch: Vec<RepositoryRecord>) -> StorageResult<UpsertCounts> {
        let batch = Arc::new(batch);
        let mut failures = 0u32;

        loop {
            let sink = Arc::clone(&self.sink);
            let records = Arc::clone(&batch);
            let result = tokio::task::spawn_blocking(move || sink.write_batch(&records))
                .await
                .map_err(|e| StorageError::Database(format!("writer task failed: {}", e)))
                .and_then(|r| r);

            let error = match result {
                Ok(count) => return Ok(count),
                Err(e) => e,
            };

            failures += 1;
            match self.backoff.decide(failures) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        "Batch of {} records failed (attempt {}), retrying in {:?}: {}",
                        batch.len(),
                        failures,
                        delay,
                        error
                    );
                    self.clock.sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::error!(
                        "Batch of {} records failed {} times: {}",
                        batch.len(),
                        failures,
                        error
                    );
                    return Err(StorageError::WriteFailed {
                        attempts: failures,
                        last: error.to_string(),
                    });
                }
            }
        }
    }
}
