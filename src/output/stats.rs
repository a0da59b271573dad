//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! repository and crawl statistics from the storage layer.

use crate::state::{PartitionStatus, RunStatus};
use crate::storage::Storage;
use crate::HarvestError;
use std::collections::HashMap;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of repositories stored
    pub total_repositories: u64,

    /// Most common primary languages
    pub top_languages: Vec<(String, u64)>,

    /// Latest crawl run, if any
    pub latest_run: Option<RunSummary>,
}

/// Progress of the latest crawl run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: i64,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub target_count: u64,
    pub discovered_count: u64,

    /// Count of partitions by status
    pub partitions: HashMap<PartitionStatus, u64>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `language_limit` - How many languages to include
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    language_limit: usize,
) -> Result<HarvestStatistics, HarvestError> {
    let total_repositories = storage.count_repositories()?;
    let top_languages = storage.top_languages(language_limit)?;

    let latest_run = match storage.get_latest_run()? {
        Some(run) => Some(RunSummary {
            partitions: storage.count_partitions_by_status(run.id)?,
            id: run.id,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            target_count: run.target_count,
            discovered_count: run.discovered_count,
        }),
        None => None,
    };

    Ok(HarvestStatistics {
        total_repositories,
        top_languages,
        latest_run,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Repositories stored: {}", stats.total_repositories);
    println!();

    if !stats.top_languages.is_empty() {
        println!("Top Languages:");
        for (language, count) in &stats.top_languages {
            let percentage = if stats.total_repositories > 0 {
                (*count as f64 / stats.total_repositories as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", language, count, percentage);
        }
        println!();
    }

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run #{} ({}):", run.id, run.status);
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Discovered: {} / {} target",
                run.discovered_count, run.target_count
            );

            let total: u64 = run.partitions.values().sum();
            println!("  Partitions ({}):", total);
            for status in [
                PartitionStatus::Done,
                PartitionStatus::Pending,
                PartitionStatus::Failed,
            ] {
                let count = run.partitions.get(&status).copied().unwrap_or(0);
                println!("    {}: {}", status, count);
            }
        }
        None => println!("No crawl runs recorded yet."),
    }
}
