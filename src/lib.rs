//! repo-harvest: an incremental repository metadata harvester
//!
//! This crate crawls a GraphQL repository search API in disjoint partitions,
//! respecting the API's rate budget, and upserts every page of results into a
//! SQLite store. Crawl progress is persisted after every committed page so an
//! interrupted run resumes where it left off.

pub mod config;
pub mod crawler;
pub mod discovery;
pub mod output;
pub mod state;
pub mod storage;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Main error type for repo-harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid discovery settings: {0}")]
    InvalidDiscovery(String),
}

/// How a failed API call propagates through the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected throttling; always waited out and retried
    RateLimited,
    /// Network or server hiccup; retried with bounded backoff
    Transient,
    /// Only the current partition is affected; it is abandoned and recorded
    FatalPartition,
    /// No partition can make progress; the crawl aborts
    FatalGlobal,
}

/// Failures of a single remote API call
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Rate limited (resets at {resets_at:?}, retry after {retry_after:?})")]
    RateLimited {
        resets_at: Option<DateTime<Utc>>,
        retry_after: Option<Duration>,
    },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Query rejected: {0}")]
    Query(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Request could not be built: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Classifies this error for propagation
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Transient(_) => FailureKind::Transient,
            Self::RetriesExhausted { .. } | Self::Query(_) => FailureKind::FatalPartition,
            Self::Unauthorized(_) | Self::InvalidRequest(_) => FailureKind::FatalGlobal,
        }
    }

    /// Returns true if this failure must abort the whole crawl
    pub fn is_global(&self) -> bool {
        self.kind() == FailureKind::FatalGlobal
    }
}

/// Result type alias for repo-harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for single API calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{crawl, Coordinator, CrawlReport, RepositoryRecord};
pub use state::{Partition, PartitionStatus, RunStatus};
