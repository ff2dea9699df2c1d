//! Crawl orchestration
//!
//! The [`Orchestrator`] sits between the frontier store and the admission
//! controller. It seeds the frontier, answers the controller's events by
//! persisting results and pulling more work, and decides when the frontier
//! has run dry.
//!
//! Phases only move forward: `Seeding -> Running -> Draining -> Terminated`.

use crate::config::Config;
use crate::crawler::admission::{AdmissionController, AdmissionSettings, CrawlEvent, RunOutcome};
use crate::crawler::job::{FetchJob, FetchResult};
use crate::crawler::links;
use crate::state::CrawlPhase;
use crate::storage::{
    now_millis, ContentRecord, FrontierIds, FrontierStore, NewFrontierItem, StoreHandle,
};
use crate::url::extract_links;
use crate::{Result, RippleError};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Counters kept over one run, reported at the end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub seeded: usize,
    pub fetched: u64,
    pub successful: u64,
    pub links_discovered: u64,
    pub edges_added: u64,
}

/// Drives one crawl run
pub struct Orchestrator {
    store: StoreHandle,
    admission: AdmissionController,
    events: mpsc::UnboundedReceiver<CrawlEvent>,
    phase: CrawlPhase,
    /// Items scraped after this instant (ms) are not pulled again this run
    watermark: i64,
    /// Frontier items claimed so far this run; only ever grows
    cursor: u64,
    pull_batch_size: usize,
    max_pool_size: usize,
    max_depth: Option<u32>,
    store_content: bool,
    summary: CrawlSummary,
}

impl Orchestrator {
    /// Creates an orchestrator for a run that started at `run_started_at`
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `store` - Handle to the frontier store
    /// * `client` - HTTP client routed through the anonymizing proxy
    /// * `run_started_at` - Run start (ms since epoch); anchors the watermark
    pub fn new(config: &Config, store: StoreHandle, client: Client, run_started_at: i64) -> Self {
        let (admission, events) =
            AdmissionController::new(AdmissionSettings::from(&config.crawler), client);
        let revisit_ms = i64::try_from(config.crawler.revisit_after_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);

        Self {
            store,
            admission,
            events,
            phase: CrawlPhase::Seeding,
            watermark: run_started_at.saturating_sub(revisit_ms),
            cursor: 0,
            pull_batch_size: config.crawler.pull_batch_size,
            max_pool_size: config.crawler.max_pool_size,
            max_depth: config.crawler.max_depth,
            store_content: config.output.store_content,
            summary: CrawlSummary::default(),
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Total frontier items claimed this run
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn summary(&self) -> CrawlSummary {
        self.summary
    }

    /// The admission controller driven by this orchestrator
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    fn transition(&mut self, next: CrawlPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(RippleError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Seeds the frontier from free-form text cells, then starts running
    ///
    /// Every onion URI found in a cell is upserted with `last_scraped = 0`,
    /// one at a time, so first-time host creation never races.
    ///
    /// # Returns
    ///
    /// The number of seed targets written
    pub async fn seed(&mut self, cells: &[String]) -> Result<usize> {
        if self.phase != CrawlPhase::Seeding {
            return Err(RippleError::InvalidTransition {
                from: self.phase,
                to: CrawlPhase::Running,
            });
        }

        let mut seeded = 0;
        for cell in cells {
            for link in extract_links(cell) {
                let item = NewFrontierItem::new(link.fqdn(), link.path.as_str(), 0, link.secure)?;
                self.upsert_frontier_item(&item, 0, false).await?;
                tracing::debug!(host = %item.host, path = %item.path, "Seeded");
                seeded += 1;
            }
        }

        if seeded == 0 {
            tracing::warn!("No onion URIs found in {} seed cells", cells.len());
        } else {
            tracing::info!("Seeded {} targets from {} cells", seeded, cells.len());
        }

        self.summary.seeded = seeded;
        self.transition(CrawlPhase::Running)?;
        Ok(seeded)
    }

    /// Finds or creates the frontier item and records one attempt on it
    ///
    /// `last_scraped` is always written; `last_successful` only moves when
    /// `successful` is true. Also clears the item's in-progress flag.
    pub async fn upsert_frontier_item(
        &self,
        item: &NewFrontierItem,
        last_scraped: i64,
        successful: bool,
    ) -> Result<FrontierIds> {
        self.store
            .with("upsert frontier item", |s| {
                s.upsert_frontier_item(item, last_scraped, successful)
            })
            .await
    }

    /// Claims up to `limit` items at or below the watermark and hands them to
    /// the admission controller
    ///
    /// # Returns
    ///
    /// Whether any items were found
    pub async fn pull(&mut self, limit: usize) -> Result<bool> {
        if limit == 0 {
            return Ok(false);
        }

        let now = now_millis();
        let watermark = self.watermark;
        let items = self
            .store
            .with("claim frontier", |s| s.claim_frontier(watermark, limit, now))
            .await?;

        let jobs: Vec<FetchJob> = items
            .iter()
            .map(|item| FetchJob::from_item(item, now))
            .collect();
        let found = !jobs.is_empty();

        self.cursor += jobs.len() as u64;
        tracing::trace!(
            limit,
            claimed = jobs.len(),
            cursor = self.cursor,
            "Pulled frontier batch"
        );
        self.admission.add_jobs(jobs);
        Ok(found)
    }

    /// Reacts to one admission event
    pub async fn handle_event(&mut self, event: CrawlEvent) -> Result<()> {
        match event {
            CrawlEvent::FetchComplete { result, job } => {
                self.persist_result(&result, &job).await?;
                if !self.phase.pulls_work() {
                    return Ok(());
                }

                let limit = self.pull_limit();
                let found = self.pull(limit).await?;
                if !found && limit == self.default_pull_limit() && self.is_quiescent() {
                    self.begin_draining()?;
                }
            }
            CrawlEvent::PoolLow { headroom } => {
                if !self.phase.pulls_work() {
                    return Ok(());
                }

                let found = self.pull(headroom).await?;
                if !found && self.is_quiescent() {
                    self.begin_draining()?;
                }
            }
        }
        Ok(())
    }

    /// The batch a pull asks for when the pool is empty
    fn default_pull_limit(&self) -> usize {
        self.pull_batch_size.min(self.max_pool_size)
    }

    /// The default batch, reduced when the pool is close to its maximum
    fn pull_limit(&self) -> usize {
        let headroom = self
            .max_pool_size
            .saturating_sub(self.admission.pool_len());
        self.pull_batch_size.min(headroom)
    }

    /// Nothing in flight, queued, or waiting to be persisted
    fn is_quiescent(&self) -> bool {
        self.admission.is_idle() && self.events.is_empty()
    }

    fn begin_draining(&mut self) -> Result<()> {
        self.transition(CrawlPhase::Draining)?;
        tracing::info!(claimed = self.cursor, "Frontier exhausted, draining");
        self.admission.drain();
        Ok(())
    }

    /// Records a fetch outcome and, for usable bodies, its content and links
    async fn persist_result(&mut self, result: &FetchResult, job: &FetchJob) -> Result<()> {
        let successful = result.is_success();
        let item = job.to_frontier_item()?;
        let ids = self
            .upsert_frontier_item(&item, result.end_time, successful)
            .await?;

        self.summary.fetched += 1;
        if successful {
            self.summary.successful += 1;
            tracing::debug!(
                host = %job.host,
                path = %job.path,
                status = result.status_code,
                elapsed_ms = result.end_time - result.start_time,
                "Fetched"
            );
        } else {
            tracing::debug!(
                host = %job.host,
                path = %job.path,
                status = result.status_code,
                error = result.error.as_deref().unwrap_or(""),
                "Fetch failed"
            );
        }

        let Some(body) = result.usable_body() else {
            return Ok(());
        };

        if self.store_content {
            let content = ContentRecord {
                frontier_item_id: ids.frontier_item_id,
                status_code: result.status_code,
                mime_type: result.mime_type.clone(),
                body: body.to_string(),
                fetched_at: result.end_time,
            };
            self.store
                .with("store content", |s| s.create_content(&content))
                .await?;
        }

        let discovered = links::extract(body);
        let stats = links::persist_links(
            &self.store,
            &discovered,
            ids.frontier_item_id,
            job.depth,
            self.max_depth,
        )
        .await?;

        self.summary.links_discovered += stats.discovered as u64;
        self.summary.edges_added += stats.new_edges as u64;
        Ok(())
    }

    /// Runs the crawl until the admission controller reports idle
    ///
    /// Seeds must already be written with [`seed`](Self::seed). Results that
    /// arrive after the controller went idle are still persisted.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        if self.phase != CrawlPhase::Running {
            return Err(RippleError::InvalidTransition {
                from: self.phase,
                to: CrawlPhase::Running,
            });
        }

        let admission = self.admission.clone();
        let mut coordinator: JoinHandle<Result<RunOutcome>> =
            tokio::spawn(async move { admission.run().await });

        let outcome = self.event_loop(&mut coordinator).await;
        if outcome.is_err() {
            coordinator.abort();
        }
        outcome
    }

    /// Moves to Terminated, passing through Draining when the controller
    /// went idle before a drain was started
    fn terminate(&mut self) -> Result<()> {
        if self.phase == CrawlPhase::Running {
            self.transition(CrawlPhase::Draining)?;
        }
        self.transition(CrawlPhase::Terminated)
    }

    async fn event_loop(
        &mut self,
        coordinator: &mut JoinHandle<Result<RunOutcome>>,
    ) -> Result<RunOutcome> {
        loop {
            tokio::select! {
                joined = &mut *coordinator => {
                    let outcome = joined.map_err(|e| {
                        RippleError::Invariant(format!("admission task failed: {}", e))
                    })??;

                    self.terminate()?;
                    while let Ok(event) = self.events.try_recv() {
                        self.handle_event(event).await?;
                    }

                    tracing::info!(
                        fetched = self.summary.fetched,
                        successful = self.summary.successful,
                        edges = self.summary.edges_added,
                        "Crawl finished"
                    );
                    return Ok(outcome);
                }
                Some(event) = self.events.recv() => {
                    self.handle_event(event).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlerConfig, NetworkConfig, OutputConfig, StorageConfig};
    use crate::crawler::build_http_client;
    use crate::storage::{RetryPolicy, SqliteStorage};

    fn config() -> Config {
        Config {
            seeds: Vec::new(),
            seed_file: None,
            crawler: CrawlerConfig {
                revisit_after_secs: 60,
                ..CrawlerConfig::default()
            },
            network: NetworkConfig {
                proxy_url: Some("http://127.0.0.1:9".to_string()),
                control_url: None,
                instances: 1,
                socks_port: None,
            },
            output: OutputConfig {
                database_path: ":memory:".to_string(),
                store_content: true,
            },
            storage: StorageConfig::default(),
        }
    }

    fn orchestrator(run_started_at: i64) -> (Orchestrator, StoreHandle) {
        let store = StoreHandle::new(
            SqliteStorage::open_in_memory().unwrap(),
            RetryPolicy::default(),
        );
        let client = build_http_client("http://127.0.0.1:9").unwrap();
        (
            Orchestrator::new(&config(), store.clone(), client, run_started_at),
            store,
        )
    }

    #[tokio::test]
    async fn test_watermark_subtracts_revisit_window() {
        let (orchestrator, _) = orchestrator(100_000);
        assert_eq!(orchestrator.watermark(), 40_000);
    }

    #[tokio::test]
    async fn test_seeding_normalizes_and_is_idempotent() {
        let (mut orchestrator, store) = orchestrator(now_millis());
        let cells = vec![
            "http://AbCdEfGhAbCdEfGh.onion/".to_string(),
            "again: abcdefghabcdefgh.onion".to_string(),
        ];

        assert_eq!(orchestrator.seed(&cells).await.unwrap(), 2);
        assert_eq!(orchestrator.phase(), CrawlPhase::Running);

        let (count, item) = store
            .with("inspect", |s| {
                Ok((
                    s.count_frontier_items()?,
                    s.find_frontier_item("abcdefghabcdefgh.onion", "/")?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        let item = item.unwrap();
        assert_eq!(item.last_scraped, 0);
        assert_eq!(item.depth, 0);
    }

    #[tokio::test]
    async fn test_seeding_twice_is_rejected() {
        let (mut orchestrator, _) = orchestrator(now_millis());
        orchestrator.seed(&[]).await.unwrap();
        assert!(matches!(
            orchestrator.seed(&[]).await,
            Err(RippleError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_pull_advances_cursor_and_fills_pool() {
        let (mut orchestrator, _) = orchestrator(now_millis());
        let cells = vec!["abcdefghabcdefgh.onion/1 abcdefghabcdefgh.onion/2 abcdefghabcdefgh.onion/3".to_string()];
        orchestrator.seed(&cells).await.unwrap();

        assert!(orchestrator.pull(2).await.unwrap());
        assert_eq!(orchestrator.cursor(), 2);
        assert_eq!(orchestrator.admission().pool_len(), 2);

        assert!(orchestrator.pull(2).await.unwrap());
        assert_eq!(orchestrator.cursor(), 3);

        assert!(!orchestrator.pull(2).await.unwrap());
        assert_eq!(orchestrator.cursor(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_last_successful() {
        let (mut orchestrator, store) = orchestrator(now_millis());
        orchestrator
            .seed(&["abcdefghabcdefgh.onion".to_string()])
            .await
            .unwrap();
        orchestrator.pull(1).await.unwrap();

        let job = FetchJob {
            host: "abcdefghabcdefgh.onion".to_string(),
            path: "/".to_string(),
            secure: false,
            depth: 0,
            frontier_item_id: 1,
            scheduled_time: 0,
        };
        let result = FetchResult {
            host: job.host.clone(),
            path: job.path.clone(),
            body: None,
            status_code: 503,
            mime_type: None,
            start_time: 10,
            end_time: 20,
            error: None,
        };
        orchestrator.persist_result(&result, &job).await.unwrap();

        let item = store
            .with("inspect", |s| s.find_frontier_item("abcdefghabcdefgh.onion", "/"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.last_scraped, 20);
        assert_eq!(item.last_successful, 0);
        assert!(!item.in_progress);
    }

    #[tokio::test]
    async fn test_successful_body_stores_content_and_links() {
        let (mut orchestrator, store) = orchestrator(now_millis());
        orchestrator
            .seed(&["abcdefghabcdefgh.onion".to_string()])
            .await
            .unwrap();

        let job = FetchJob {
            host: "abcdefghabcdefgh.onion".to_string(),
            path: "/".to_string(),
            secure: false,
            depth: 0,
            frontier_item_id: 1,
            scheduled_time: 0,
        };
        let result = FetchResult {
            host: job.host.clone(),
            path: job.path.clone(),
            body: Some("<a href=\"http://bcdefghabcdefgha.onion/x\">x</a>".to_string()),
            status_code: 200,
            mime_type: Some("text/html".to_string()),
            start_time: 10,
            end_time: 20,
            error: None,
        };
        orchestrator.persist_result(&result, &job).await.unwrap();

        let (contents, edges, items) = store
            .with("inspect", |s| {
                Ok((s.count_contents()?, s.count_edges()?, s.count_frontier_items()?))
            })
            .await
            .unwrap();
        assert_eq!(contents, 1);
        assert_eq!(edges, 1);
        assert_eq!(items, 2);
        assert_eq!(orchestrator.summary().successful, 1);
    }
    #[tokio::test]
    async fn test_idle_exit_passes_through_draining() {
        let (mut orchestrator, _) = orchestrator(now_millis());
        orchestrator.seed(&[]).await.unwrap();
        assert_eq!(orchestrator.phase(), CrawlPhase::Running);

        orchestrator.terminate().unwrap();
        assert_eq!(orchestrator.phase(), CrawlPhase::Terminated);
        assert!(orchestrator.terminate().is_err());
    }

    #[tokio::test]
    async fn test_batch_larger_than_pool_still_drains() {
        let mut config = config();
        config.crawler.pull_batch_size = 32;
        config.crawler.max_pool_size = 16;
        let store = StoreHandle::new(
            SqliteStorage::open_in_memory().unwrap(),
            RetryPolicy::default(),
        );
        let client = build_http_client("http://127.0.0.1:9").unwrap();
        let mut orchestrator = Orchestrator::new(&config, store, client, now_millis());
        orchestrator.seed(&[]).await.unwrap();

        let job = FetchJob {
            host: "abcdefghabcdefgh.onion".to_string(),
            path: "/".to_string(),
            secure: false,
            depth: 0,
            frontier_item_id: 1,
            scheduled_time: 0,
        };
        let now = now_millis();
        let result = FetchResult::failure(&job, now, now, "connection refused");
        orchestrator
            .handle_event(CrawlEvent::FetchComplete { result, job })
            .await
            .unwrap();

        assert_eq!(orchestrator.phase(), CrawlPhase::Draining);
    }
}
