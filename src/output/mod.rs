//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - Printing the end-of-run summary
//! - Exporting stored repositories as CSV or JSON
//! - Reporting harvest statistics

mod export;
pub mod stats;

pub use export::{export_repositories, ExportFormat};
pub use stats::{load_statistics, print_statistics, HarvestStatistics, RunSummary};

use crate::crawler::CrawlReport;
use crate::state::Partition;

/// One-line summary of a finished crawl invocation
pub fn summary_line(report: &CrawlReport) -> String {
    let mut line = format!(
        "Run {} {}: {} discovered, {} written this run ({} new, {} updated), partitions {} done / {} pending / {} failed",
        report.run_id,
        report.status,
        report.discovered,
        report.written,
        report.inserted,
        report.written.saturating_sub(report.inserted),
        report.partitions_done,
        report.partitions_pending,
        report.partitions_failed
    );
    if report.target_reached {
        line.push_str(", target reached");
    }
    if let Some(fatal) = &report.fatal {
        line.push_str(&format!(", aborted: {}", fatal));
    }
    line
}

/// Prints a partition plan, one partition per line
pub fn print_plan(partitions: &[Partition]) {
    println!("Partition plan ({} partitions):", partitions.len());
    for partition in partitions {
        println!("  {:<40} {}", partition.key, partition.predicate);
    }
}
