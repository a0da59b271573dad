//! repo-harvest main entry point
//!
//! This is the command-line interface for the repo-harvest repository crawler.

use anyhow::Context;
use clap::Parser;
use repo_harvest::config::{load_config_with_hash, validate, Config};
use repo_harvest::crawler::Coordinator;
use repo_harvest::discovery::build_partitions;
use repo_harvest::output::{
    export_repositories, load_statistics, print_plan, print_statistics, summary_line, ExportFormat,
};
use repo_harvest::storage::open_storage;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// repo-harvest: an incremental repository metadata harvester
///
/// Crawls a GraphQL repository search API in disjoint partitions within the
/// API's rate budget, upserting every page into SQLite. Interrupted crawls
/// resume from the last committed page.
#[derive(Parser, Debug)]
#[command(name = "repo-harvest")]
#[command(version)]
#[command(about = "An incremental repository metadata harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a new crawl run, ignoring any resumable one
    #[arg(long)]
    fresh: bool,

    /// Validate config and print the partition plan without crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export"])]
    stats: bool,

    /// Export stored repositories (csv or json) and exit
    #[arg(long, value_name = "FORMAT", requires = "output")]
    export: Option<ExportFormat>,

    /// Destination file for --export
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Override crawl.target-count
    #[arg(long)]
    target: Option<u64>,

    /// Override crawl.parallelism
    #[arg(long)]
    parallelism: Option<u32>,

    /// Override storage.database-path
    #[arg(long, value_name = "PATH")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if cli.dry_run {
        return match handle_dry_run(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Dry run failed: {:#}", e);
                ExitCode::from(2)
            }
        };
    }

    let result = if cli.stats {
        handle_stats(&config)
    } else if let (Some(format), Some(output)) = (cli.export, cli.output.as_deref()) {
        handle_export(&config, format, output)
    } else {
        return handle_crawl(config, cli.fresh).await;
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "repo_harvest=info,warn",
            1 => "repo_harvest=debug,info",
            2 => "repo_harvest=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the configuration and applies command-line overrides
fn load(cli: &Cli) -> anyhow::Result<Config> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if let Some(target) = cli.target {
        config.crawl.target_count = target;
    }
    if let Some(parallelism) = cli.parallelism {
        config.crawl.parallelism = parallelism;
    }
    if let Some(database) = &cli.database {
        config.storage.database_path = database.clone();
    }
    validate(&config).context("command-line overrides")?;

    Ok(config)
}

/// Handles the --dry-run mode: validates config and prints the partition plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== repo-harvest Dry Run ===\n");

    println!("API:");
    println!("  Endpoint: {}", config.api.endpoint);
    println!(
        "  Token: {}",
        if config.api.resolve_token().is_some() {
            "configured"
        } else {
            "missing (requests will be unauthenticated)"
        }
    );
    println!("  Page size: {}", config.api.page_size);

    println!("\nCrawl:");
    println!("  Target: {}", config.crawl.target_count);
    println!("  Parallelism: {}", config.crawl.parallelism);
    println!(
        "  Max pages per partition: {}",
        config.crawl.max_pages_per_partition
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Batch size: {}\n", config.storage.batch_size);

    let partitions = build_partitions(&config.discovery)?;
    print_plan(&partitions);

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage, 10)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: writes stored repositories to a file
fn handle_export(config: &Config, format: ExportFormat, output: &Path) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;

    let file = std::fs::File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    let count = export_repositories(&storage, format, &mut writer)?;
    std::io::Write::flush(&mut writer)?;

    println!("✓ Exported {} repositories to {}", count, output.display());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool) -> ExitCode {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume an unfinished run)");
    }

    let mut coordinator = match Coordinator::from_config(config, fresh) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!("Failed to start crawl: {}", e);
            return ExitCode::from(2);
        }
    };

    setup_shutdown_handler(coordinator.stop_handle());

    match coordinator.run().await {
        Ok(report) => {
            println!("{}", summary_line(&report));
            if report.exit_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Ctrl+C stops the crawl gracefully; a second Ctrl+C exits immediately
fn setup_shutdown_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            return;
        }

        tracing::warn!("Shutdown requested, finishing in-flight pages (Ctrl+C again to force quit)");
        stop.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Force quit!");
            std::process::exit(130);
        }
    });
}
