//! Cursor pagination over one partition
//!
//! A paginator owns a partition's position. Every pull sends exactly one
//! logical request at the current cursor; the cursor only moves after a
//! successful page, so a failed pull can be retried or resumed from the same
//! place. Constructing a paginator from a partition that already has a cursor
//! resumes it.

use super::executor::RequestExecutor;
use super::fetcher::GraphqlRequest;
use super::parser::Page;
use crate::state::Partition;
use crate::ApiResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct CursorPaginator {
    executor: Arc<RequestExecutor>,
    partition: Partition,
    page_size: u32,
    max_pages: u32,
    stop: Arc<AtomicBool>,
}

impl CursorPaginator {
    /// Creates a paginator positioned at the partition's stored cursor
    ///
    /// # Arguments
    ///
    /// * `executor` - Shared request executor
    /// * `partition` - Partition to walk; its cursor is where the walk starts
    /// * `page_size` - Records requested per page
    /// * `max_pages` - Pages after which the search API stops serving results
    /// * `stop` - Crawl-wide stop signal; no page is requested once it is set
    pub fn new(
        executor: Arc<RequestExecutor>,
        partition: Partition,
        page_size: u32,
        max_pages: u32,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor,
            partition,
            page_size,
            max_pages,
            stop,
        }
    }

    /// Fetches the next page
    ///
    /// # Returns
    ///
    /// * `None` - The partition is exhausted, capped, or the crawl is stopping
    /// * `Some(Ok(page))` - The next page; the partition has been advanced past it
    /// * `Some(Err(e))` - The request failed; the partition is unchanged
    pub async fn next_page(&mut self) -> Option<ApiResult<Page>> {
        if self.partition.is_done() || self.stop.load(Ordering::SeqCst) {
            return None;
        }

        if self.partition.pages_fetched >= self.max_pages {
            tracing::warn!(
                "Partition {} reached the {}-page cap; results beyond it are unreachable, consider narrower partitions",
                self.partition.key,
                self.max_pages
            );
            self.partition.mark_done();
            return None;
        }

        let request = GraphqlRequest::search(
            &self.partition.predicate,
            self.partition.cursor.as_deref(),
            self.page_size,
        );

        match self.executor.execute(&request).await {
            Ok(page) => {
                if let (0, Some(total)) = (self.partition.pages_fetched, page.total_count) {
                    if let Some(lost) = unreachable_results(total, self.page_size, self.max_pages) {
                        tracing::warn!(
                            "Partition {} matches {} repositories; {} lie beyond the page cap, consider narrower partitions",
                            self.partition.key,
                            total,
                            lost
                        );
                    }
                }
                self.partition.records_discovered += page.records.len() as u64;
                self.partition
                    .advance(page.end_cursor.clone(), page.has_next_page);
                tracing::debug!(
                    "Partition {}: page {} with {} records (more: {})",
                    self.partition.key,
                    self.partition.pages_fetched,
                    page.records.len(),
                    page.has_next_page
                );
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn into_partition(self) -> Partition {
        self.partition
    }
}

/// The search API never serves more than this many results per query
pub const SEARCH_RESULT_CAP: u64 = 1_000;

/// Results a predicate matches that the page cap will never reach
pub fn unreachable_results(total_count: u64, page_size: u32, max_pages: u32) -> Option<u64> {
    let reachable = (u64::from(page_size) * u64::from(max_pages)).min(SEARCH_RESULT_CAP);
    total_count.checked_sub(reachable).filter(|&lost| lost > 0)
}
