//! Onion-Ripple main entry point
//!
//! This is the command-line interface for the Onion-Ripple link-graph crawler.

use anyhow::Context;
use clap::Parser;
use onion_ripple::config::{load_config_with_hash, load_seed_cells, Config};
use onion_ripple::crawler::crawl;
use onion_ripple::state::PER_HOST_CAP;
use onion_ripple::url::extract_links;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Onion-Ripple: a link-graph crawler for onion services
///
/// Onion-Ripple fetches onion pages through an anonymizing proxy under
/// global and per-host concurrency limits, follows the onion links it finds,
/// and records the resulting page graph in SQLite.
#[derive(Parser, Debug)]
#[command(name = "onion-ripple")]
#[command(version = "1.0.0")]
#[command(about = "A link-graph crawler for onion services", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the seed targets without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("onion_ripple=info,warn"),
            1 => EnvFilter::new("onion_ripple=debug,info"),
            _ => EnvFilter::new("onion_ripple=trace,debug"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Onion-Ripple Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Global slots: {}", config.crawler.max_slots);
    println!("  Per-host cap: {}", PER_HOST_CAP);
    println!(
        "  Pool size: {}..{}",
        config.crawler.min_pool_size, config.crawler.max_pool_size
    );
    println!("  Fetch TTL: {}ms", config.crawler.fetch_ttl_ms);
    println!("  Pull batch: {}", config.crawler.pull_batch_size);
    println!("  Revisit after: {}s", config.crawler.revisit_after_secs);
    match config.crawler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }

    println!("\nNetwork:");
    if let Some(control_url) = &config.network.control_url {
        println!("  Control daemon: {}", control_url);
        println!("  Instances: {}", config.network.instances);
        match config.network.socks_port {
            Some(port) => println!("  SOCKS port: {}", port),
            None => println!("  SOCKS port: any free port"),
        }
    } else if let Some(proxy_url) = &config.network.proxy_url {
        println!("  Proxy: {}", proxy_url);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Store bodies: {}", config.output.store_content);

    let cells = load_seed_cells(config)?;
    let targets: Vec<_> = cells.iter().flat_map(|cell| extract_links(cell)).collect();

    println!("\nSeed Targets ({}):", targets.len());
    for link in &targets {
        let scheme = if link.secure { "https" } else { "http" };
        println!("  - {}://{}{}", scheme, link.fqdn(), link.path);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} seed targets from {} cells",
        targets.len(),
        cells.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use onion_ripple::output::{load_statistics, print_statistics};
    use onion_ripple::storage::SqliteStorage;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Global slots: {}, per-host cap: {}, fetch TTL: {}ms",
        config.crawler.max_slots,
        PER_HOST_CAP,
        config.crawler.fetch_ttl_ms
    );

    let summary = crawl(config, config_hash).await.context("Crawl failed")?;
    tracing::info!(
        "Crawl completed successfully: {} seeded, {} fetched, {} successful, {} new edges",
        summary.seeded,
        summary.fetched,
        summary.successful,
        summary.edges_added
    );
    Ok(())
}
