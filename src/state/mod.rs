//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: the orchestrator's linear phase machine
//! - `HostTable`: per-host in-flight counts and deferred jobs
//! - `SlotLedger`: the global fetch slot accounting

mod crawl_phase;
mod host_state;

// Re-export main types
pub use crawl_phase::CrawlPhase;
pub use host_state::{HostState, HostTable, SlotLedger, PER_HOST_CAP};
