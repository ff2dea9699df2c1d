//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{FrontierItem, FrontierStore, RunRecord, StorageResult};
use chrono::{TimeZone, Utc};

/// Number of most-linked pages listed in the report
pub const TOP_INBOUND_LIMIT: usize = 10;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,

    /// Unique hosts discovered
    pub hosts: u64,

    /// Frontier items discovered
    pub frontier_items: u64,

    /// Items fetched at least once
    pub attempted: u64,

    /// Items fetched successfully at least once
    pub successful: u64,

    /// Items currently claimed by a run
    pub in_progress: u64,

    /// Distinct page-to-page links
    pub edges: u64,

    /// Stored page bodies
    pub contents: u64,

    /// Pages with the most distinct linking hosts
    pub top_inbound: Vec<FrontierItem>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn FrontierStore) -> StorageResult<CrawlStatistics> {
    Ok(CrawlStatistics {
        latest_run: storage.get_latest_run()?,
        hosts: storage.count_hosts()?,
        frontier_items: storage.count_frontier_items()?,
        attempted: storage.count_attempted()?,
        successful: storage.count_successful()?,
        in_progress: storage.count_in_progress()?,
        edges: storage.count_edges()?,
        contents: storage.count_contents()?,
        top_inbound: storage.top_inbound(TOP_INBOUND_LIMIT)?,
    })
}

fn format_millis(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  Id: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", format_millis(run.started_at));
        if let Some(finished) = run.finished_at {
            println!("  Finished: {}", format_millis(finished));
            println!(
                "  Duration: {}s",
                (finished - run.started_at).max(0) / 1000
            );
        }
        println!();
    }

    println!("Overview:");
    println!("  Hosts: {}", stats.hosts);
    println!("  Frontier items: {}", stats.frontier_items);
    println!(
        "  Attempted: {} ({:.1}%)",
        stats.attempted,
        percentage(stats.attempted, stats.frontier_items)
    );
    println!("  In progress: {}", stats.in_progress);
    println!("  Edges: {}", stats.edges);
    println!("  Stored bodies: {}", stats.contents);
    println!();

    if !stats.top_inbound.is_empty() {
        println!("Most Linked Pages (distinct linking hosts):");
        for item in &stats.top_inbound {
            println!("  {:>5}  {}{}", item.inbound_links, item.host, item.path);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} attempted pages fetched successfully)",
        percentage(stats.successful, stats.attempted),
        stats.successful,
        stats.attempted
    );
}
