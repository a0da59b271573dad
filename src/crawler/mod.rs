//! Crawler module for paginated repository discovery
//!
//! This module contains the core crawling logic, including:
//! - Rate budget tracking and exponential backoff
//! - GraphQL transport and response decoding
//! - Retrying request execution and cursor pagination
//! - Overall crawl coordination

pub mod backoff;
pub mod budget;
pub mod clock;
mod coordinator;
pub mod executor;
pub mod fetcher;
pub mod paginator;
pub mod parser;

pub use backoff::{BackoffPolicy, RetryDecision};
pub use budget::{BudgetSnapshot, Permit, RateBudget};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, CrawlReport};
pub use executor::{AttemptOutcome, RequestExecutor};
pub use fetcher::{build_http_client, GraphqlRequest, HttpTransport, RawResponse, Transport};
pub use paginator::CursorPaginator;
pub use parser::{decode_search, Page, RepositoryRecord};

use crate::config::Config;

/// Runs one crawl cycle against the configured endpoint
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the store and build the partition plan
/// 2. Resume the latest unfinished run, or start a new one
/// 3. Crawl partitions concurrently until done, stopped, or the target is reached
/// 4. Persist the final run status
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `fresh` - Start a new run even if a resumable one exists
///
/// # Returns
///
/// * `Ok(CrawlReport)` - The crawl ended; the report says how
/// * `Err(HarvestError)` - Startup or storage failed
pub async fn crawl(config: Config, fresh: bool) -> crate::Result<CrawlReport> {
    let mut coordinator = Coordinator::from_config(config, fresh)?;
    coordinator.run().await
}
