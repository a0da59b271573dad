//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the repo-harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested repository metadata, one row per repository
CREATE TABLE IF NOT EXISTS repositories (
    github_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_login TEXT NOT NULL,
    full_name TEXT NOT NULL,
    description TEXT,
    stargazers_count INTEGER NOT NULL DEFAULT 0,
    forks_count INTEGER NOT NULL DEFAULT 0,
    open_issues_count INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    created_at TEXT,
    updated_at TEXT,
    pushed_at TEXT,
    disk_usage_kb INTEGER,
    archived INTEGER NOT NULL DEFAULT 0,
    disabled INTEGER NOT NULL DEFAULT 0,
    license_key TEXT,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_repositories_stars ON repositories(stargazers_count DESC);
CREATE INDEX IF NOT EXISTS idx_repositories_language ON repositories(language);
CREATE INDEX IF NOT EXISTS idx_repositories_full_name ON repositories(full_name);

-- One row per logical crawl
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    target_count INTEGER NOT NULL,
    discovered_count INTEGER NOT NULL DEFAULT 0,
    plan_fingerprint TEXT NOT NULL
);

-- Resumable position of every partition of a crawl
CREATE TABLE IF NOT EXISTS crawl_partitions (
    run_id INTEGER NOT NULL REFERENCES crawl_runs(id),
    partition_key TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    predicate TEXT NOT NULL,
    cursor TEXT,
    status TEXT NOT NULL,
    records_discovered INTEGER NOT NULL DEFAULT 0,
    pages_fetched INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, partition_key)
);

CREATE INDEX IF NOT EXISTS idx_crawl_partitions_status ON crawl_partitions(run_id, status);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
