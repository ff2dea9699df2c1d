//! Crawler module for onion page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Fetch jobs and results
//! - HTTP fetching through the anonymizing proxy
//! - Admission control (global slots, per-host caps, deferral, idle detection)
//! - Link-graph building
//! - Overall crawl orchestration

mod admission;
mod fetcher;
mod job;
mod links;
mod orchestrator;

pub use admission::{
    wait_for, AdmissionController, AdmissionSettings, CrawlEvent, RunOutcome, Waited,
};
pub use fetcher::{build_http_client, carries_embedded_media, fetch, is_text_media};
pub use job::{
    FetchJob, FetchResult, EMBEDDED_MEDIA_BODY, SYNTHETIC_FAILURE_STATUS, UNSUPPORTED_MEDIA_BODY,
};
pub use links::{extract, persist_links, LinkStats};
pub use orchestrator::{CrawlSummary, Orchestrator};

use crate::config::{load_seed_cells, Config};
use crate::network::Network;
use crate::storage::{
    now_millis, open_storage, FrontierStore, RetryPolicy, RunStatus, StoreHandle,
};
use crate::Result;
use std::path::Path;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the store and release items an interrupted run left in progress
/// 2. Record a new crawl run
/// 3. Bring up the anonymizing network and build the HTTP client
/// 4. Seed the frontier
/// 5. Crawl until the admission controller reports idle
/// 6. Close the network and mark the run finished
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, stored with the run
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Crawl reached idle
/// * `Err(RippleError)` - Crawl failed
pub async fn crawl(config: Config, config_hash: &str) -> Result<CrawlSummary> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let store = StoreHandle::new(storage, RetryPolicy::from_config(&config.storage));

    if let Some(previous) = store.with("load latest run", |s| s.get_latest_run()).await? {
        if previous.status == RunStatus::Running {
            tracing::warn!("Run {} was interrupted; marking it failed", previous.id);
            store
                .with("close interrupted run", |s| {
                    s.finish_run(previous.id, RunStatus::Failed, now_millis())
                })
                .await?;
        }
    }

    let released = store
        .with("reset in-progress flags", |s| s.reset_in_progress())
        .await?;
    if released > 0 {
        tracing::info!("Released {} frontier items left in progress", released);
    }

    let started_at = now_millis();
    let run_id = store
        .with("create run", |s| s.create_run(config_hash, started_at))
        .await?;
    tracing::info!("Starting crawl run {}", run_id);

    let network = Network::from_config(&config.network)?;
    let outcome = run_crawl(&config, &network, store.clone(), started_at).await;

    if let Err(e) = network.close().await {
        tracing::warn!("Failed to close network instances: {}", e);
    }

    let status = match &outcome {
        Ok(_) => RunStatus::Completed,
        Err(e) => {
            tracing::error!("Crawl run {} failed: {}", run_id, e);
            RunStatus::Failed
        }
    };
    if let Err(e) = store
        .with("finish run", |s| s.finish_run(run_id, status, now_millis()))
        .await
    {
        tracing::error!("Failed to record the end of run {}: {}", run_id, e);
    }

    outcome
}

async fn run_crawl(
    config: &Config,
    network: &Network,
    store: StoreHandle,
    started_at: i64,
) -> Result<CrawlSummary> {
    let proxy_url = network.open(&config.network).await?;
    let client = build_http_client(&proxy_url)?;
    let seeds = load_seed_cells(config)?;

    let mut orchestrator = Orchestrator::new(config, store, client, started_at);
    orchestrator.seed(&seeds).await?;
    orchestrator.run().await?;
    Ok(orchestrator.summary())
}
