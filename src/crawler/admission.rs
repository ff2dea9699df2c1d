//! Admission control for fetch jobs
//!
//! The [`AdmissionController`] owns the in-memory work pool, the per-host
//! in-flight counters and deferred queues, and the global slot ledger. One
//! coordination loop ([`AdmissionController::run`]) decides what starts next;
//! fetch tasks only ever touch their own job and the release step.
//!
//! # Coordination loop
//!
//! 1. Ask the orchestrator for more work when the pool runs low
//! 2. Take a deferred job whose host has capacity, else pop the pool, else
//!    wait for work (bounded by 4×TTL, followed by an idle check)
//! 3. Defer the job if its host already has [`PER_HOST_CAP`] fetches running
//! 4. Take a global slot, waiting up to 2×TTL for one; on timeout the job
//!    goes back into the pool
//! 5. Spawn the fetch task without awaiting it

use crate::config::CrawlerConfig;
use crate::crawler::fetcher;
use crate::crawler::job::{FetchJob, FetchResult};
use crate::state::{HostTable, SlotLedger, PER_HOST_CAP};
use crate::storage::now_millis;
use crate::{Result, RippleError};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

/// Events sent from the admission controller to the orchestrator
#[derive(Debug)]
pub enum CrawlEvent {
    /// A fetch finished; its slot and host counter are already released
    FetchComplete { result: FetchResult, job: FetchJob },

    /// The pool dropped below its minimum; up to `headroom` jobs are wanted
    PoolLow { headroom: usize },
}

/// How [`AdmissionController::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing in flight, pooled or deferred
    Idle,
}

/// Outcome of one bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waited {
    Ready,
    TimedOut,
}

/// Waits for `signal` for at most `bound`
pub async fn wait_for(signal: &Notify, bound: Duration) -> Waited {
    match timeout(bound, signal.notified()).await {
        Ok(()) => Waited::Ready,
        Err(_) => Waited::TimedOut,
    }
}

/// Limits the admission controller works under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    pub max_slots: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub fetch_ttl: Duration,
}

impl From<&CrawlerConfig> for AdmissionSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_slots: config.max_slots,
            min_pool_size: config.min_pool_size,
            max_pool_size: config.max_pool_size,
            fetch_ttl: config.fetch_ttl(),
        }
    }
}

/// Everything guarded by the admission lock
#[derive(Debug)]
struct Shared {
    /// Used as a stack: most recently added job is served first
    pool: Vec<FetchJob>,
    hosts: HostTable,
    slots: SlotLedger,
    /// A pool-low request is outstanding
    pool_low_pending: bool,
    /// The orchestrator stopped pulling; check idle eagerly
    draining: bool,
    /// First invariant violation seen by a fetch task
    fatal: Option<String>,
}

impl Shared {
    fn is_idle(&self) -> bool {
        self.slots.is_full()
            && self.slots.in_flight() == 0
            && self.pool.is_empty()
            && self.hosts.deferred_len() == 0
    }

    fn next_job(&mut self) -> Option<FetchJob> {
        self.hosts.take_ready().or_else(|| self.pool.pop())
    }
}

type FetchFuture = Pin<Box<dyn Future<Output = FetchResult> + Send>>;

/// Performs one fetch attempt for a launched job
type FetchFn = fn(Client, FetchJob, Duration) -> FetchFuture;

fn http_fetch(client: Client, job: FetchJob, ttl: Duration) -> FetchFuture {
    Box::pin(async move { fetcher::fetch(&client, &job, ttl).await })
}

struct Inner {
    settings: AdmissionSettings,
    client: Client,
    fetch: FetchFn,
    state: Mutex<Shared>,
    job_available: Notify,
    slot_freed: Notify,
    events: mpsc::UnboundedSender<CrawlEvent>,
}

impl Inner {
    /// Locks the state for a coordinator step; a poisoned lock is fatal
    fn state(&self) -> Result<MutexGuard<'_, Shared>> {
        self.state.lock().map_err(|_| {
            RippleError::Invariant("admission state lock poisoned".to_string())
        })
    }

    /// Locks the state for callers that cannot fail
    ///
    /// A poisoned lock stays poisoned, so the coordinator still stops with
    /// an invariant error on its next step.
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gives back the host counter and the slot held by a finished fetch,
    /// then reports its result
    ///
    /// The result is queued before the lock is released, so anyone who sees
    /// the slot back under the lock can also see the result in the channel.
    fn complete(&self, job: FetchJob, result: FetchResult) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            if let Err(e) = state.hosts.finish(&job.host) {
                state.fatal.get_or_insert(e);
            }
            if let Err(e) = state.slots.release() {
                state.fatal.get_or_insert(e);
            }
            self.slot_freed.notify_one();

            if self
                .events
                .send(CrawlEvent::FetchComplete { result, job })
                .is_err()
            {
                tracing::debug!("Event receiver gone, dropping fetch result");
            }
        }

        // A deferred job may be ready now, or the crawl may be idle
        self.job_available.notify_one();
    }
}

/// What the coordinator found when it looked for work
enum Next {
    Job(FetchJob),
    Idle,
    Empty,
}

/// Result of trying to start one job
enum Admission {
    Started(FetchJob),
    Deferred,
    NoSlot(FetchJob),
}

/// Bounds global and per-host fetch concurrency and runs the fetches
///
/// Cloning is cheap and every clone drives the same controller.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// Creates a controller and the receiving end of its event channel
    pub fn new(
        settings: AdmissionSettings,
        client: Client,
    ) -> (Self, mpsc::UnboundedReceiver<CrawlEvent>) {
        Self::with_fetcher(settings, client, http_fetch)
    }

    fn with_fetcher(
        settings: AdmissionSettings,
        client: Client,
        fetch: FetchFn,
    ) -> (Self, mpsc::UnboundedReceiver<CrawlEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            settings,
            client,
            fetch,
            state: Mutex::new(Shared {
                pool: Vec::new(),
                hosts: HostTable::new(),
                slots: SlotLedger::new(settings.max_slots),
                pool_low_pending: false,
                draining: false,
                fatal: None,
            }),
            job_available: Notify::new(),
            slot_freed: Notify::new(),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Adds jobs to the pool and wakes the coordinator; never blocks on I/O
    ///
    /// Also answers any outstanding pool-low request, even when `jobs` is empty.
    pub fn add_jobs(&self, jobs: Vec<FetchJob>) {
        let added = jobs.len();
        {
            let mut state = self.inner.lock();
            state.pool_low_pending = false;
            state.pool.extend(jobs);
        }
        if added > 0 {
            self.inner.job_available.notify_one();
        }
    }

    /// Tells the coordinator no more work will be added
    pub fn drain(&self) {
        self.inner.lock().draining = true;
        self.inner.job_available.notify_one();
    }

    /// Runs the coordination loop until the crawl is idle
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome::Idle)` - Nothing in flight, pooled or deferred
    /// * `Err(RippleError::Invariant)` - The slot ledger or a host counter broke
    pub async fn run(&self) -> Result<RunOutcome> {
        let ttl = self.inner.settings.fetch_ttl;
        tracing::info!(
            max_slots = self.inner.settings.max_slots,
            per_host_cap = PER_HOST_CAP,
            ttl_ms = ttl.as_millis() as u64,
            "Admission controller started"
        );

        loop {
            self.check_fatal()?;
            self.signal_pool_low()?;

            let next = {
                let mut state = self.inner.state()?;
                match state.next_job() {
                    Some(job) => Next::Job(job),
                    None if state.draining && state.is_idle() => Next::Idle,
                    None => Next::Empty,
                }
            };

            let job = match next {
                Next::Job(job) => job,
                Next::Idle => return Ok(self.finish()),
                Next::Empty => {
                    match wait_for(&self.inner.job_available, ttl * 4).await {
                        Waited::Ready => continue,
                        Waited::TimedOut => {
                            if self.is_idle() {
                                return Ok(self.finish());
                            }
                            tracing::debug!(
                                in_flight = self.in_flight(),
                                "No new work yet, fetches still running"
                            );
                            continue;
                        }
                    }
                }
            };

            self.schedule(job).await?;
        }
    }

    /// Defers, starts, or requeues one job
    async fn schedule(&self, mut job: FetchJob) -> Result<()> {
        let ttl = self.inner.settings.fetch_ttl;
        loop {
            match self.admit(job)? {
                Admission::Deferred => return Ok(()),
                Admission::Started(started) => {
                    self.launch(started);
                    return Ok(());
                }
                Admission::NoSlot(waiting) => {
                    match wait_for(&self.inner.slot_freed, ttl * 2).await {
                        Waited::Ready => job = waiting,
                        Waited::TimedOut => {
                            tracing::debug!(host = %waiting.host, "No slot freed in time, requeueing");
                            self.inner.state()?.pool.push(waiting);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn admit(&self, job: FetchJob) -> Result<Admission> {
        let mut guard = self.inner.state()?;
        let state = &mut *guard;

        if !state.hosts.has_capacity(&job.host) {
            tracing::trace!(host = %job.host, path = %job.path, "Host at capacity, deferring");
            state.hosts.defer(job);
            return Ok(Admission::Deferred);
        }

        if !state.slots.try_acquire() {
            return Ok(Admission::NoSlot(job));
        }

        state.hosts.start(&job.host).map_err(RippleError::Invariant)?;
        state.slots.check().map_err(RippleError::Invariant)?;
        Ok(Admission::Started(job))
    }

    /// Spawns the fetch task; the slot and host counter are already held
    fn launch(&self, job: FetchJob) {
        let inner = Arc::clone(&self.inner);
        tracing::trace!(host = %job.host, path = %job.path, "Starting fetch");

        tokio::spawn(async move {
            let start_time = now_millis();
            let attempt = tokio::spawn((inner.fetch)(
                inner.client.clone(),
                job.clone(),
                inner.settings.fetch_ttl,
            ));

            let result = match attempt.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(host = %job.host, path = %job.path, "Fetch task failed: {}", e);
                    let error = format!("fetch task failed: {}", e);
                    FetchResult::failure(&job, start_time, now_millis(), error)
                }
            };

            inner.complete(job, result);
        });
    }

    fn signal_pool_low(&self) -> Result<()> {
        let headroom = {
            let mut state = self.inner.state()?;
            let len = state.pool.len();
            if state.draining || state.pool_low_pending || len >= self.inner.settings.min_pool_size {
                return Ok(());
            }
            state.pool_low_pending = true;
            self.inner.settings.max_pool_size.saturating_sub(len)
        };

        if self.inner.events.send(CrawlEvent::PoolLow { headroom }).is_err() {
            tracing::debug!("Event receiver gone, pool-low request dropped");
        }
        Ok(())
    }

    fn check_fatal(&self) -> Result<()> {
        let mut state = self.inner.state()?;
        if let Some(message) = state.fatal.take() {
            return Err(RippleError::Invariant(message));
        }
        state.slots.check().map_err(RippleError::Invariant)
    }

    fn finish(&self) -> RunOutcome {
        tracing::info!("Crawl is idle: nothing in flight, pooled or deferred");
        RunOutcome::Idle
    }

    /// True when nothing is in flight, pooled or deferred
    pub fn is_idle(&self) -> bool {
        self.inner.lock().is_idle()
    }

    /// Fetches currently running
    pub fn in_flight(&self) -> usize {
        self.inner.lock().slots.in_flight()
    }

    /// Free global slots
    pub fn available_slots(&self) -> usize {
        self.inner.lock().slots.available()
    }

    /// Fetches currently running against `host`
    pub fn host_in_flight(&self, host: &str) -> usize {
        self.inner.lock().hosts.in_flight(host)
    }

    /// Jobs waiting in the pool
    pub fn pool_len(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Jobs parked behind a host at capacity
    pub fn deferred_len(&self) -> usize {
        self.inner.lock().hosts.deferred_len()
    }
}
