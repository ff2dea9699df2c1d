use crate::crawler::FetchJob;
use std::collections::{HashMap, VecDeque};

/// Maximum number of concurrent fetches against one host
pub const PER_HOST_CAP: usize = 4;

/// Tracks the admission state of a single host
///
/// A host holds its in-flight count and the jobs that arrived while it was
/// at its cap.
#[derive(Debug, Default)]
pub struct HostState {
    /// Fetches currently running against this host
    pub in_flight: usize,

    /// Jobs waiting for this host to drop below its cap
    pub deferred: VecDeque<FetchJob>,
}

impl HostState {
    /// Returns true if another fetch may start against this host
    pub fn has_capacity(&self) -> bool {
        self.in_flight < PER_HOST_CAP
    }

    /// Returns true if this entry carries no information
    fn is_vacant(&self) -> bool {
        self.in_flight == 0 && self.deferred.is_empty()
    }
}

/// Per-host admission bookkeeping for the whole crawl
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: HashMap<String, HostState>,
    deferred_total: usize,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `host` is below its cap
    pub fn has_capacity(&self, host: &str) -> bool {
        self.hosts.get(host).map_or(true, HostState::has_capacity)
    }

    /// Counts a fetch against `host`
    ///
    /// Callers check [`has_capacity`](Self::has_capacity) first; starting a
    /// fetch on a full host is a coordinator bug and is reported as `Err`.
    pub fn start(&mut self, host: &str) -> Result<(), String> {
        let state = self.hosts.entry(host.to_string()).or_default();
        if !state.has_capacity() {
            return Err(format!(
                "host {} already has {} fetches in flight",
                host, state.in_flight
            ));
        }
        state.in_flight += 1;
        Ok(())
    }

    /// Releases a fetch previously counted with [`start`](Self::start)
    pub fn finish(&mut self, host: &str) -> Result<(), String> {
        let state = self
            .hosts
            .get_mut(host)
            .filter(|state| state.in_flight > 0)
            .ok_or_else(|| format!("host {} finished a fetch it never started", host))?;
        state.in_flight -= 1;

        if state.is_vacant() {
            self.hosts.remove(host);
        }
        Ok(())
    }

    /// Parks a job until its host has capacity again
    pub fn defer(&mut self, job: FetchJob) {
        self.deferred_total += 1;
        self.hosts
            .entry(job.host.clone())
            .or_default()
            .deferred
            .push_back(job);
    }

    /// Takes the oldest deferred job of any host that is below its cap
    pub fn take_ready(&mut self) -> Option<FetchJob> {
        if self.deferred_total == 0 {
            return None;
        }

        let job = self
            .hosts
            .values_mut()
            .find(|state| state.has_capacity() && !state.deferred.is_empty())
            .and_then(|state| state.deferred.pop_front())?;

        self.deferred_total -= 1;
        Some(job)
    }

    /// Number of jobs parked across all hosts
    pub fn deferred_len(&self) -> usize {
        self.deferred_total
    }

    /// In-flight count for one host
    pub fn in_flight(&self, host: &str) -> usize {
        self.hosts.get(host).map_or(0, |state| state.in_flight)
    }
}

/// The global slot ledger
///
/// `available + in_flight == max` holds after every successful operation;
/// an operation that would break it fails instead of clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLedger {
    max: usize,
    available: usize,
    in_flight: usize,
}

impl SlotLedger {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            available: max,
            in_flight: 0,
        }
    }

    /// Takes a slot if one is free
    pub fn try_acquire(&mut self) -> bool {
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        self.in_flight += 1;
        true
    }

    /// Returns a slot
    pub fn release(&mut self) -> Result<(), String> {
        if self.in_flight == 0 || self.available >= self.max {
            return Err(format!(
                "slot released with available={} in_flight={} max={}",
                self.available, self.in_flight, self.max
            ));
        }
        self.available += 1;
        self.in_flight -= 1;
        Ok(())
    }

    /// Verifies the ledger invariant
    pub fn check(&self) -> Result<(), String> {
        if self.available + self.in_flight != self.max || self.available > self.max {
            return Err(format!(
                "slot ledger broken: available={} in_flight={} max={}",
                self.available, self.in_flight, self.max
            ));
        }
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_full(&self) -> bool {
        self.available == self.max
    }
}
