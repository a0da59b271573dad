use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Main configuration structure for repo-harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub discovery: DiscoveryConfig,
}

/// Remote GraphQL API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// GraphQL endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Literal access token (takes precedence over `token-env`)
    #[serde(default)]
    pub token: Option<String>,

    /// Name of the environment variable holding the access token
    #[serde(rename = "token-env", default = "default_token_env")]
    pub token_env: String,

    /// Records requested per page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl ApiConfig {
    /// Resolves the access token from the config or the environment
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Crawl control settings
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Stop once this many records have been committed in the logical crawl
    #[serde(rename = "target-count", default = "default_target_count")]
    pub target_count: u64,

    /// Number of partitions crawled concurrently
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,

    /// Page cap per partition (the search API stops returning results past it)
    #[serde(rename = "max-pages-per-partition", default = "default_max_pages")]
    pub max_pages_per_partition: u32,

    /// Calls kept in reserve before waiting for the budget to reset
    #[serde(rename = "rate-limit-reserve", default)]
    pub rate_limit_reserve: u32,

    /// Wait used when throttled without any reset information (seconds)
    #[serde(rename = "rate-limit-fallback-secs", default = "default_fallback_secs")]
    pub rate_limit_fallback_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            parallelism: default_parallelism(),
            max_pages_per_partition: default_max_pages(),
            rate_limit_reserve: 0,
            rate_limit_fallback_secs: default_fallback_secs(),
        }
    }
}

/// Backoff settings shared by the request executor and the upsert writer
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single backoff delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries allowed after the first transient failure
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Whether random jitter is added to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            jitter: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Records per upsert transaction
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,
}

/// Which axis (or axes) the discovery space is split along
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Stars,
    Created,
    CreatedStars,
}

/// Discovery space and partitioning strategy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    pub strategy: Strategy,

    /// Search qualifiers prepended to every partition predicate
    #[serde(rename = "base-query", default)]
    pub base_query: String,

    /// Ascending lower bounds of the star intervals; the last one is open-ended
    #[serde(rename = "star-bounds", default = "default_star_bounds")]
    pub star_bounds: Vec<u64>,

    /// First creation date covered (inclusive)
    #[serde(rename = "created-from", default)]
    pub created_from: Option<NaiveDate>,

    /// End of the covered creation dates (exclusive)
    #[serde(rename = "created-to", default)]
    pub created_to: Option<NaiveDate>,

    /// Width of each creation-date window
    #[serde(rename = "window-days", default = "default_window_days")]
    pub window_days: u32,
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("repo-harvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_target_count() -> u64 {
    100_000
}

fn default_parallelism() -> u32 {
    4
}

fn default_max_pages() -> u32 {
    10
}

fn default_fallback_secs() -> u64 {
    60
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_star_bounds() -> Vec<u64> {
    vec![0, 1, 11, 51, 201, 1001, 5001]
}

fn default_window_days() -> u32 {
    30
}
