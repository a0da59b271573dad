//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `Partition`: one disjoint slice of the discovery space with its resumable cursor
//! - `PartitionStatus`: pending, done, or failed
//! - `RunStatus`: persisted status of a logical crawl
//! - `CrawlPhase`: in-process lifecycle of the orchestrator

mod partition;
mod run;

// Re-export main types
pub use partition::{Partition, PartitionStatus};
pub use run::{CrawlPhase, RunStatus};
