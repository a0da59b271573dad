//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that coordinates:
//! - Building the partition plan and creating or resuming a crawl run
//! - Running a bounded worker pool over unfinished partitions
//! - Forwarding every page to the upsert writer and committing progress
//! - Enforcing the target count and handling stop requests
//! - Producing the final crawl report

use crate::config::Config;
use crate::crawler::backoff::BackoffPolicy;
use crate::crawler::budget::RateBudget;
use crate::crawler::clock::{Clock, SystemClock};
use crate::crawler::executor::RequestExecutor;
use crate::crawler::fetcher::HttpTransport;
use crate::crawler::paginator::CursorPaginator;
use crate::discovery::{build_partitions, plan_fingerprint};
use crate::state::{CrawlPhase, Partition, PartitionStatus, RunStatus};
use crate::storage::{open_storage, SqliteStorage, Storage, StorageError, UpsertWriter};
use crate::{HarvestError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Summary of one invocation of a crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: i64,
    pub phase: CrawlPhase,

    /// Status persisted for the run
    pub status: RunStatus,

    /// Records committed across the whole logical crawl
    pub discovered: u64,

    /// Records written during this invocation
    pub written: u64,

    /// Of `written`, rows that did not exist before
    pub inserted: u64,

    pub partitions_done: usize,
    pub partitions_failed: usize,
    pub partitions_pending: usize,
    pub target_reached: bool,

    /// Crawl-wide failure that aborted the run
    pub fatal: Option<String>,
}

impl CrawlReport {
    /// Returns true unless the crawl aborted, or partitions failed short of the target
    pub fn exit_success(&self) -> bool {
        self.fatal.is_none() && (self.target_reached || self.partitions_failed == 0)
    }
}

/// State shared by every worker task
struct WorkerContext {
    run_id: i64,
    storage: Arc<Mutex<SqliteStorage>>,
    executor: Arc<RequestExecutor>,
    writer: UpsertWriter,
    page_size: u32,
    max_pages: u32,
    target: u64,
    discovered: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    inserted: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<String>>>,
}

impl WorkerContext {
    /// Persists a partition and adds its new records to the run total
    async fn commit(&self, partition: Partition, added: u64) -> std::result::Result<(), StorageError> {
        let storage = Arc::clone(&self.storage);
        let run_id = self.run_id;
        tokio::task::spawn_blocking(move || {
            let mut storage = storage.lock().unwrap_or_else(|e| e.into_inner());
            storage.commit_partition(run_id, &partition, added)
        })
        .await
        .map_err(|e| StorageError::Database(format!("commit task failed: {}", e)))?
    }

    /// Records a crawl-wide failure and asks every worker to stop
    fn abort(&self, reason: String) {
        tracing::error!("Aborting crawl: {}", reason);
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    executor: Arc<RequestExecutor>,
    writer: UpsertWriter,
    run_id: i64,
    partitions: Vec<Partition>,
    discovered: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    phase: CrawlPhase,
}

impl Coordinator {
    /// Creates a coordinator, resuming the latest run when possible
    ///
    /// The latest run is resumed when it is not completed, `fresh` is false,
    /// and its partition plan matches the one built from `config`. Otherwise a
    /// new run is created with every partition pending.
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `storage` - Opened store
    /// * `executor` - Request executor shared by every worker
    /// * `fresh` - Ignore any resumable run and start a new one
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(HarvestError)` - Failed to build the plan or access storage
    pub fn new(
        config: Config,
        mut storage: SqliteStorage,
        executor: Arc<RequestExecutor>,
        fresh: bool,
    ) -> Result<Self> {
        let plan = build_partitions(&config.discovery)?;
        let fingerprint = plan_fingerprint(&plan);
        let target = config.crawl.target_count;

        let mut previous_cycle = Vec::new();
        let resumable = match storage.get_latest_run()? {
            Some(run) if fresh => {
                tracing::info!("Fresh crawl requested; not resuming run {}", run.id);
                None
            }
            Some(run) if !run.status.is_resumable() => {
                tracing::info!("Run {} completed; starting a new crawl cycle", run.id);
                if run.plan_fingerprint == fingerprint {
                    previous_cycle = storage.load_partitions(run.id)?;
                }
                None
            }
            Some(run) if run.plan_fingerprint != fingerprint => {
                tracing::warn!(
                    "Run {} used a different partition plan; starting a new run",
                    run.id
                );
                None
            }
            other => other,
        };

        let (run_id, partitions, discovered) = match resumable {
            Some(run) => {
                let mut partitions = storage.load_partitions(run.id)?;
                if partitions.is_empty() {
                    storage.insert_partitions(run.id, &plan)?;
                    partitions = plan;
                }
                for partition in partitions.iter_mut() {
                    if partition.status == PartitionStatus::Failed {
                        partition.status = PartitionStatus::Pending;
                    }
                }
                storage.update_run_status(run.id, RunStatus::Running)?;

                let done = partitions.iter().filter(|p| p.is_done()).count();
                tracing::info!(
                    "Resuming {} run {}: {} of {} partitions done, {} records so far",
                    run.status,
                    run.id,
                    done,
                    partitions.len(),
                    run.discovered_count
                );
                (run.id, partitions, run.discovered_count)
            }
            None => {
                let (partitions, carried) = next_cycle(plan, &previous_cycle);
                let run_id = storage.create_run(target, &fingerprint)?;
                storage.insert_partitions(run_id, &partitions)?;
                tracing::info!(
                    "Starting run {} with {} partitions ({} carried over unfinished), target {}",
                    run_id,
                    partitions.len(),
                    carried,
                    target
                );
                (run_id, partitions, 0)
            }
        };

        let storage = Arc::new(Mutex::new(storage));
        let writer = UpsertWriter::new(
            storage.clone(),
            config.storage.batch_size,
            BackoffPolicy::from(&config.retry),
            Arc::clone(executor.clock()),
        );

        Ok(Self {
            config: Arc::new(config),
            storage,
            executor,
            writer,
            run_id,
            partitions,
            discovered: Arc::new(AtomicU64::new(discovered)),
            stop: Arc::new(AtomicBool::new(false)),
            phase: CrawlPhase::Initializing,
        })
    }

    /// Creates a coordinator talking to the configured endpoint in real time
    pub fn from_config(config: Config, fresh: bool) -> Result<Self> {
        let storage = open_storage(Path::new(&config.storage.database_path))?;
        let transport = HttpTransport::new(&config.api)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let executor = RequestExecutor::new(
            Arc::new(transport),
            RateBudget::new(config.crawl.rate_limit_reserve),
            BackoffPolicy::from(&config.retry),
            clock,
            Duration::from_secs(config.crawl.rate_limit_fallback_secs),
        );

        Self::new(config, storage, Arc::new(executor), fresh)
    }

    /// Flag that stops the crawl gracefully once set
    ///
    /// In-flight pages are still written and committed; no new page is requested.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Runs the crawl until every partition is done, the target is reached,
    /// a stop is requested, or a crawl-wide failure occurs
    pub async fn run(&mut self) -> Result<CrawlReport> {
        self.phase = CrawlPhase::Running;
        let start_time = Instant::now();
        let target = self.config.crawl.target_count;
        let parallelism = self.config.crawl.parallelism.max(1) as usize;

        if self.discovered.load(Ordering::SeqCst) >= target {
            tracing::info!("Target of {} records already reached", target);
            self.stop.store(true, Ordering::SeqCst);
        }

        let written = Arc::new(AtomicU64::new(0));
        let inserted = Arc::new(AtomicU64::new(0));
        let fatal = Arc::new(Mutex::new(None));
        let context = Arc::new(WorkerContext {
            run_id: self.run_id,
            storage: Arc::clone(&self.storage),
            executor: Arc::clone(&self.executor),
            writer: self.writer.clone(),
            page_size: self.config.api.page_size,
            max_pages: self.config.crawl.max_pages_per_partition,
            target,
            discovered: Arc::clone(&self.discovered),
            written: Arc::clone(&written),
            inserted: Arc::clone(&inserted),
            stop: Arc::clone(&self.stop),
            fatal: Arc::clone(&fatal),
        });

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut workers = JoinSet::new();
        let pending: Vec<Partition> = self
            .partitions
            .iter()
            .filter(|p| !p.is_done())
            .cloned()
            .collect();

        tracing::info!(
            "Crawling {} partitions with {} workers",
            pending.len(),
            parallelism
        );

        for partition in pending {
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| HarvestError::Worker(e.to_string()))?;
                Ok::<_, HarvestError>(crawl_partition(&context, partition).await)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(partition)) => self.replace_partition(partition),
                Ok(Err(e)) => context.abort(e.to_string()),
                Err(e) => context.abort(format!("worker task failed: {}", e)),
            }
        }

        let discovered = self.discovered.load(Ordering::SeqCst);
        let target_reached = discovered >= target;
        let fatal = fatal.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let all_done = self.partitions.iter().all(Partition::is_done);

        let status = if fatal.is_some() {
            RunStatus::Aborted
        } else if target_reached || all_done {
            RunStatus::Completed
        } else {
            RunStatus::Interrupted
        };
        self.phase = if status == RunStatus::Aborted {
            CrawlPhase::Aborted
        } else if status == RunStatus::Completed {
            CrawlPhase::Completed
        } else {
            CrawlPhase::Running
        };

        {
            let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
            storage.finish_run(self.run_id, status)?;
        }

        let report = CrawlReport {
            run_id: self.run_id,
            phase: self.phase,
            status,
            discovered,
            written: written.load(Ordering::SeqCst),
            inserted: inserted.load(Ordering::SeqCst),
            partitions_done: self.count(PartitionStatus::Done),
            partitions_failed: self.count(PartitionStatus::Failed),
            partitions_pending: self.count(PartitionStatus::Pending),
            target_reached,
            fatal,
        };

        tracing::info!(
            "Run {} {}: {} records discovered, {} written this run ({} new), {}/{} partitions done, {} failed, in {:?}",
            report.run_id,
            report.status,
            report.discovered,
            report.written,
            report.inserted,
            report.partitions_done,
            self.partitions.len(),
            report.partitions_failed,
            start_time.elapsed()
        );

        Ok(report)
    }

    fn replace_partition(&mut self, partition: Partition) {
        if let Some(slot) = self.partitions.iter_mut().find(|p| p.key == partition.key) {
            *slot = partition;
        }
    }

    fn count(&self, status: PartitionStatus) -> usize {
        self.partitions.iter().filter(|p| p.status == status).count()
    }
}

/// Lays out the partitions of a new crawl cycle
///
/// Partitions the previous cycle did not finish (typically because the
/// target stopped it) keep their cursor and are crawled first; the rest start
/// over from the beginning, in plan order.
///
/// # Returns
///
/// The ordered partitions and how many were carried over
fn next_cycle(plan: Vec<Partition>, previous: &[Partition]) -> (Vec<Partition>, usize) {
    let mut carried = Vec::new();
    let mut restarted = Vec::new();

    for fresh in plan {
        match previous.iter().find(|p| p.key == fresh.key && !p.is_done()) {
            Some(unfinished) => {
                let mut partition = unfinished.clone();
                partition.status = PartitionStatus::Pending;
                partition.last_error = None;
                carried.push(partition);
            }
            None => restarted.push(fresh),
        }
    }

    let count = carried.len();
    carried.extend(restarted);
    (carried, count)
}

/// Walks one partition until it is exhausted, stopped, or fails
///
/// # Returns
///
/// The partition as last committed
async fn crawl_partition(ctx: &WorkerContext, partition: Partition) -> Partition {
    tracing::debug!("Worker starting partition {}", partition.key);
    let mut pager = CursorPaginator::new(
        Arc::clone(&ctx.executor),
        partition,
        ctx.page_size,
        ctx.max_pages,
        Arc::clone(&ctx.stop),
    );

    loop {
        let checkpoint = pager.partition().clone();

        let page = match pager.next_page().await {
            None => {
                let last = pager.into_partition();
                if last != checkpoint {
                    // The page cap ended the partition without a page
                    if let Err(e) = ctx.commit(last.clone(), 0).await {
                        ctx.abort(format!("failed to commit progress: {}", e));
                        return checkpoint;
                    }
                }
                return last;
            }
            Some(Ok(page)) => page,
            Some(Err(e)) if e.is_global() => {
                ctx.abort(e.to_string());
                return checkpoint;
            }
            Some(Err(e)) => {
                tracing::error!("Partition {} failed: {}", checkpoint.key, e);
                let mut failed = checkpoint;
                failed.mark_failed(e.to_string());
                if let Err(e) = ctx.commit(failed.clone(), 0).await {
                    ctx.abort(format!("failed to commit progress: {}", e));
                }
                return failed;
            }
        };

        let count = page.records.len() as u64;
        match ctx.writer.write(page.records).await {
            Ok(counts) => {
                ctx.written.fetch_add(counts.total() as u64, Ordering::SeqCst);
                ctx.inserted.fetch_add(counts.inserted as u64, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!("Partition {} failed to store a page: {}", checkpoint.key, e);
                let mut failed = checkpoint;
                failed.mark_failed(e.to_string());
                if let Err(e) = ctx.commit(failed.clone(), 0).await {
                    ctx.abort(format!("failed to commit progress: {}", e));
                }
                return failed;
            }
        }

        if let Err(e) = ctx.commit(pager.partition().clone(), count).await {
            ctx.abort(format!("failed to commit progress: {}", e));
            return checkpoint;
        }

        let total = ctx.discovered.fetch_add(count, Ordering::SeqCst) + count;
        if total >= ctx.target && !ctx.stop.swap(true, Ordering::SeqCst) {
            tracing::info!("Target of {} records reached; stopping", ctx.target);
        }
    }
}
