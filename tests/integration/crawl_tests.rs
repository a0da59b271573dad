//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GraphQL endpoint and drive
//! full crawl cycles end-to-end against an on-disk SQLite store. Time is
//! simulated with `ManualClock`, so backoff and rate-limit waits are instant.

use chrono::{TimeZone, Utc};
use repo_harvest::config::{parse_config, Config};
use repo_harvest::crawler::{
    BackoffPolicy, Clock, Coordinator, HttpTransport, ManualClock, RateBudget, RequestExecutor,
};
use repo_harvest::storage::{SqliteStorage, Storage};
use repo_harvest::{PartitionStatus, RunStatus};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const START: i64 = 1_700_000_000;

/// Two star partitions: `stars:0..9` and `stars:>=10`
fn create_test_config(endpoint: &str, db_path: &Path, target: u64, parallelism: u32) -> Config {
    parse_config(&format!(
        r#"
[api]
endpoint = "{endpoint}"
token = "test-token"
page-size = 5

[crawl]
target-count = {target}
parallelism = {parallelism}
max-pages-per-partition = 10

[retry]
base-delay-ms = 10
max-delay-ms = 100
max-retries = 2
jitter = false

[storage]
database-path = "{db}"
batch-size = 3

[discovery]
strategy = "stars"
star-bounds = [0, 10]
"#,
        endpoint = endpoint,
        target = target,
        parallelism = parallelism,
        db = db_path.display(),
    ))
    .expect("test config should be valid")
}

/// Builds a coordinator whose executor runs on simulated time
fn create_coordinator(config: Config, fresh: bool) -> (Coordinator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(START, 0).unwrap()));
    let transport = HttpTransport::new(&config.api).expect("client should build");
    let executor = RequestExecutor::new(
        Arc::new(transport),
        RateBudget::new(0),
        BackoffPolicy::from(&config.retry).with_jitter(false),
        clock.clone() as Arc<dyn Clock>,
        Duration::from_secs(60),
    );
    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))
        .expect("store should open");

    let coordinator = Coordinator::new(config, storage, Arc::new(executor), fresh)
        .expect("coordinator should start");
    (coordinator, clock)
}

fn repo(id: &str, stars: i64) -> Value {
    json!({
        "id": id,
        "name": id,
        "owner": { "login": "octo" },
        "nameWithOwner": format!("octo/{}", id),
        "description": null,
        "stargazerCount": stars,
        "forkCount": 1,
        "issues": { "totalCount": 2 },
        "primaryLanguage": { "name": "Rust" },
        "createdAt": "2020-01-01T00:00:00Z",
        "updatedAt": "2023-01-01T00:00:00Z",
        "pushedAt": "2023-01-01T00:00:00Z",
        "diskUsage": 64,
        "isArchived": false,
        "isDisabled": false,
        "licenseInfo": { "key": "mit" }
    })
}

fn search_page(prefix: &str, page: usize, stars: i64, end_cursor: Option<&str>) -> Value {
    let edges: Vec<Value> = (0..5)
        .map(|i| json!({ "node": repo(&format!("{}-{}-{}", prefix, page, i), stars) }))
        .collect();

    json!({
        "data": {
            "search": {
                "repositoryCount": 100,
                "pageInfo": {
                    "hasNextPage": end_cursor.is_some(),
                    "endCursor": end_cursor
                },
                "edges": edges
            },
            "rateLimit": { "cost": 1, "remaining": 4999, "resetAt": "2023-11-14T23:13:20Z" }
        }
    })
}

/// Mounts a page response for one predicate/cursor pair
async fn mount_page(
    server: &MockServer,
    predicate: &str,
    cursor: Option<&str>,
    body: Value,
    expected_calls: Option<u64>,
) {
    let mock = Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "variables": { "query": predicate, "cursor": cursor }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));

    match expected_calls {
        Some(n) => mock.expect(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

/// Partition `stars:0..9` has two pages, `stars:>=10` has two pages
async fn mount_full_space(server: &MockServer, stars: i64) {
    mount_page(server, "stars:0..9", None, search_page("low", 1, stars, Some("low-c1")), None).await;
    mount_page(server, "stars:0..9", Some("low-c1"), search_page("low", 2, stars, None), None).await;
    mount_page(server, "stars:>=10", None, search_page("high", 1, stars, Some("high-c1")), None).await;
    mount_page(server, "stars:>=10", Some("high-c1"), search_page("high", 2, stars, None), None).await;
}

#[tokio::test]
async fn test_full_crawl_all_partitions() {
    let mock_server = MockServer::start().await;
    mount_full_space(&mock_server, 5).await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&mock_server.uri(), &db_path, 1_000, 2);

    let (mut coordinator, _clock) = create_coordinator(config, false);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.discovered, 20);
    assert_eq!(report.written, 20);
    assert_eq!(report.partitions_done, 2);
    assert_eq!(report.partitions_failed, 0);
    assert!(!report.target_reached);
    assert!(report.exit_success());
    drop(coordinator);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 20);

    let record = storage.get_repository("high-2-4").unwrap().unwrap();
    assert_eq!(record.full_name, "octo/high-2-4");
    assert_eq!(record.open_issues_count, 2);
    assert_eq!(record.license_key.as_deref(), Some("mit"));

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.discovered_count, 20);
    assert!(run.finished_at.is_some());

    let partitions = storage.load_partitions(run.id).unwrap();
    assert!(partitions.iter().all(|p| p.status == PartitionStatus::Done));
    assert!(partitions.iter().all(|p| p.pages_fetched == 2));
}

#[tokio::test]
async fn test_crawl_stops_at_target() {
    let mock_server = MockServer::start().await;
    for prefix in ["low", "high"] {
        let predicate = if prefix == "low" { "stars:0..9" } else { "stars:>=10" };
        let c1 = format!("{}-c1", prefix);
        let c2 = format!("{}-c2", prefix);
        mount_page(&mock_server, predicate, None, search_page(prefix, 1, 5, Some(&c1)), None).await;
        mount_page(&mock_server, predicate, Some(&c1), search_page(prefix, 2, 5, Some(&c2)), None).await;
        mount_page(&mock_server, predicate, Some(&c2), search_page(prefix, 3, 5, None), None).await;
    }

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&mock_server.uri(), &db_path, 8, 1);

    let (mut coordinator, _clock) = create_coordinator(config, false);
    let report = coordinator.run().await.unwrap();

    // The page that crossed the target is kept whole
    assert_eq!(report.discovered, 10);
    assert!(report.target_reached);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.partitions_done, 0);
    assert_eq!(report.partitions_pending, 2);
    assert!(report.exit_success());

    // One partition stopped mid-way, the other never started
    let mut cursors: Vec<Option<String>> = coordinator
        .partitions()
        .iter()
        .map(|p| p.cursor.clone())
        .collect();
    cursors.sort();
    assert!(cursors[0].is_none());
    assert!(cursors[1].as_deref().map_or(false, |c| c.ends_with("-c2")));
    drop(coordinator);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 10);
}

#[tokio::test]
async fn test_unauthorized_aborts_crawl() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"message":"Bad credentials"}"#))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&mock_server.uri(), &db_path, 1_000, 2);

    let (mut coordinator, clock) = create_coordinator(config, false);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.fatal.is_some());
    assert!(!report.exit_success());
    assert_eq!(report.discovered, 0);
    // Authentication failures are never retried
    assert!(clock.sleeps().is_empty());
    drop(coordinator);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 0);
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Aborted);
    assert!(run.status.is_resumable());
}

#[tokio::test]
async fn test_rate_limited_request_waits_for_reset() {
    let mock_server = MockServer::start().await;
    let reset = START + 120;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .set_body_string(r#"{"message":"API rate limit exceeded"}"#),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_full_space(&mock_server, 5).await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&mock_server.uri(), &db_path, 1_000, 1);

    let (mut coordinator, clock) = create_coordinator(config, false);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.discovered, 20);
    assert_eq!(report.partitions_failed, 0);
    assert!(clock.sleeps().contains(&Duration::from_secs(120)));
    assert!(clock.now() >= Utc.timestamp_opt(reset, 0).unwrap());
}

#[tokio::test]
async fn test_resume_after_failed_partition_matches_uninterrupted_crawl() {
    let temp_dir = TempDir::new().unwrap();

    // First invocation: the second page of stars:0..9 keeps failing
    let db_path = temp_dir.path().join("resumed.db");
    {
        let flaky_server = MockServer::start().await;
        mount_page(&flaky_server, "stars:0..9", None, search_page("low", 1, 5, Some("low-c1")), Some(1)).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": { "query": "stars:0..9", "cursor": "low-c1" }
            })))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&flaky_server)
            .await;
        mount_page(&flaky_server, "stars:>=10", None, search_page("high", 1, 5, Some("high-c1")), Some(1)).await;
        mount_page(&flaky_server, "stars:>=10", Some("high-c1"), search_page("high", 2, 5, None), Some(1)).await;

        let config = create_test_config(&flaky_server.uri(), &db_path, 1_000, 2);
        let (mut coordinator, clock) = create_coordinator(config, false);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.status, RunStatus::Interrupted);
        assert_eq!(report.partitions_failed, 1);
        assert_eq!(report.partitions_done, 1);
        assert_eq!(report.discovered, 15);
        assert!(!report.exit_success());
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );

        let failed = coordinator
            .partitions()
            .iter()
            .find(|p| p.status == PartitionStatus::Failed)
            .unwrap();
        assert_eq!(failed.cursor.as_deref(), Some("low-c1"));
        assert!(failed.last_error.is_some());
    }

    // Second invocation resumes from the committed cursor only
    {
        let healthy_server = MockServer::start().await;
        mount_page(&healthy_server, "stars:0..9", None, search_page("low", 1, 5, Some("low-c1")), Some(0)).await;
        mount_page(&healthy_server, "stars:0..9", Some("low-c1"), search_page("low", 2, 5, None), Some(1)).await;
        mount_page(&healthy_server, "stars:>=10", None, search_page("high", 1, 5, Some("high-c1")), Some(0)).await;

        let config = create_test_config(&healthy_server.uri(), &db_path, 1_000, 2);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        let first_run = {
            let storage = SqliteStorage::new(&db_path).unwrap();
            storage.get_latest_run().unwrap().unwrap().id
        };
        assert_eq!(coordinator.run_id(), first_run);

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.discovered, 20);
        assert_eq!(report.written, 5);
        assert!(report.exit_success());
    }

    // Reference: the same space crawled without interruption
    let reference_path = temp_dir.path().join("reference.db");
    {
        let server = MockServer::start().await;
        mount_full_space(&server, 5).await;
        let config = create_test_config(&server.uri(), &reference_path, 1_000, 2);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        coordinator.run().await.unwrap();
    }

    let resumed = SqliteStorage::new(&db_path).unwrap();
    let reference = SqliteStorage::new(&reference_path).unwrap();
    assert_eq!(
        resumed.list_repositories_by_stars(None).unwrap().len(),
        reference.list_repositories_by_stars(None).unwrap().len()
    );

    let mut resumed_records = resumed.list_repositories_by_stars(None).unwrap();
    let mut reference_records = reference.list_repositories_by_stars(None).unwrap();
    resumed_records.sort_by(|a, b| a.github_id.cmp(&b.github_id));
    reference_records.sort_by(|a, b| a.github_id.cmp(&b.github_id));
    assert_eq!(resumed_records, reference_records);
}

#[tokio::test]
async fn test_recrawl_overwrites_with_latest_observation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");

    {
        let server = MockServer::start().await;
        mount_full_space(&server, 5).await;
        let config = create_test_config(&server.uri(), &db_path, 1_000, 2);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        assert_eq!(coordinator.run().await.unwrap().status, RunStatus::Completed);
    }

    // A completed run is not resumed; the next invocation is a new cycle
    {
        let server = MockServer::start().await;
        mount_full_space(&server, 42).await;
        let config = create_test_config(&server.uri(), &db_path, 1_000, 2);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.run_id, 2);
        assert_eq!(report.discovered, 20);
    }

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 20);
    let record = storage.get_repository("low-1-0").unwrap().unwrap();
    assert_eq!(record.stargazers_count, 42);
}

#[tokio::test]
async fn test_fresh_flag_ignores_interrupted_run() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");

    {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let config = create_test_config(&server.uri(), &db_path, 1_000, 1);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        assert_eq!(coordinator.run().await.unwrap().status, RunStatus::Aborted);
    }

    let server = MockServer::start().await;
    mount_full_space(&server, 5).await;
    let config = create_test_config(&server.uri(), &db_path, 1_000, 2);
    let (mut coordinator, _clock) = create_coordinator(config, true);
    assert_eq!(coordinator.run_id(), 2);

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.discovered, 20);
}

/// Three pages per partition, ids `<prefix>-<page>-<n>`, cursors `<prefix>-c<page>`
async fn mount_three_page_space(server: &MockServer, page_delay: Duration) {
    for (prefix, predicate) in [("low", "stars:0..9"), ("high", "stars:>=10")] {
        let c1 = format!("{}-c1", prefix);
        let c2 = format!("{}-c2", prefix);
        for (cursor, page, next) in [
            (None, 1, Some(c1.as_str())),
            (Some(c1.as_str()), 2, Some(c2.as_str())),
            (Some(c2.as_str()), 3, None),
        ] {
            Mock::given(method("POST"))
                .and(body_partial_json(json!({
                    "variables": { "query": predicate, "cursor": cursor }
                })))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(search_page(prefix, page, 5, next))
                        .set_delay(page_delay),
                )
                .mount(server)
                .await;
        }
    }
}

#[tokio::test]
async fn test_target_limited_cycles_reach_every_partition() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");

    {
        let server = MockServer::start().await;
        mount_three_page_space(&server, Duration::ZERO).await;
        let config = create_test_config(&server.uri(), &db_path, 8, 1);
        let (mut coordinator, _clock) = create_coordinator(config, false);
        let report = coordinator.run().await.unwrap();
        assert!(report.target_reached);
        assert_eq!(report.status, RunStatus::Completed);
    }

    // The second cycle continues the unfinished partition from its cursor,
    // then moves on to the partition the first cycle never reached
    let server = MockServer::start().await;
    mount_page(&server, "stars:0..9", None, search_page("low", 1, 5, Some("low-c1")), Some(0)).await;
    mount_page(&server, "stars:0..9", Some("low-c1"), search_page("low", 2, 5, Some("low-c2")), Some(0)).await;
    mount_page(&server, "stars:0..9", Some("low-c2"), search_page("low", 3, 5, None), Some(1)).await;
    mount_page(&server, "stars:>=10", None, search_page("high", 1, 5, Some("high-c1")), Some(1)).await;
    mount_page(&server, "stars:>=10", Some("high-c1"), search_page("high", 2, 5, Some("high-c2")), None).await;

    let config = create_test_config(&server.uri(), &db_path, 8, 1);
    let (mut coordinator, _clock) = create_coordinator(config, false);
    assert_eq!(coordinator.run_id(), 2);
    assert_eq!(coordinator.partitions()[0].cursor.as_deref(), Some("low-c2"));

    let report = coordinator.run().await.unwrap();
    assert!(report.target_reached);
    assert_eq!(report.discovered, 10);
    assert_eq!(report.inserted, 10);
    drop(coordinator);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 20);
    assert!(storage.get_repository("low-3-0").unwrap().is_some());
    assert!(storage.get_repository("high-1-0").unwrap().is_some());

    let partitions = storage.load_partitions(2).unwrap();
    let low = partitions.iter().find(|p| p.predicate == "stars:0..9").unwrap();
    assert_eq!(low.status, PartitionStatus::Done);
    assert_eq!(low.pages_fetched, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_workers_commit_in_flight_pages_at_target() {
    let server = MockServer::start().await;
    // Slow responses keep both first pages in flight together
    mount_three_page_space(&server, Duration::from_millis(300)).await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("harvest.db");
    let config = create_test_config(&server.uri(), &db_path, 4, 2);

    let (mut coordinator, _clock) = create_coordinator(config, false);
    let run_id = coordinator.run_id();
    let report = coordinator.run().await.unwrap();
    drop(coordinator);

    // The first committed page reaches the target; the other worker's page
    // was already in flight and is committed too
    assert!(report.target_reached);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.discovered, 10);
    assert_eq!(report.partitions_pending, 2);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_repositories().unwrap(), 10);

    let run = storage.get_run(run_id).unwrap();
    assert_eq!(run.discovered_count, 10);
    assert_eq!(run.status, RunStatus::Completed);

    let partitions = storage.load_partitions(run_id).unwrap();
    assert_eq!(partitions.len(), 2);
    for partition in &partitions {
        assert_eq!(partition.status, PartitionStatus::Pending);
        assert_eq!(partition.pages_fetched, 1);
        assert_eq!(partition.records_discovered, 5);
        assert!(partition.cursor.as_deref().map_or(false, |c| c.ends_with("-c1")));
    }
}
