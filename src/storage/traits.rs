//! Storage traits and error types
//!
//! This module defines the trait interface for the frontier store and
//! associated error types.

use crate::storage::{
    ContentRecord, Edge, FrontierIds, FrontierItem, HostRecord, NewFrontierItem, RunRecord,
    RunStatus,
};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Frontier item not found: {0}")]
    FrontierItemNotFound(i64),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier store implementations
///
/// Every method is one transaction; callers never see partially applied
/// bulk operations.
pub trait FrontierStore {
    // ===== Run Management =====

    /// Creates a new crawl run starting at `started_at`
    fn create_run(&mut self, config_hash: &str, started_at: i64) -> StorageResult<i64>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Closes a run with a final status
    fn finish_run(&mut self, run_id: i64, status: RunStatus, finished_at: i64)
        -> StorageResult<()>;

    // ===== Hosts =====

    /// Finds a host by its unique name, creating it on first sight
    fn find_or_create_host(&mut self, name: &str) -> StorageResult<i64>;

    /// Gets a host by name
    fn get_host(&self, name: &str) -> StorageResult<Option<HostRecord>>;

    // ===== Frontier =====

    /// Finds or creates the frontier item for `(item.host, item.path)`
    ///
    /// New rows take `last_scraped` as given. Existing rows always get
    /// `last_scraped` overwritten and their in-progress flag cleared;
    /// `last_successful` moves only when `successful` is true.
    fn upsert_frontier_item(
        &mut self,
        item: &NewFrontierItem,
        last_scraped: i64,
        successful: bool,
    ) -> StorageResult<FrontierIds>;

    /// Finds or creates many discovered items, returning their ids in order
    ///
    /// Existing rows keep their timestamps; their depth drops to the
    /// smallest depth seen.
    fn upsert_discovered(&mut self, items: &[NewFrontierItem]) -> StorageResult<Vec<i64>>;

    /// Selects up to `limit` items with `last_scraped <= watermark` that are
    /// not in progress and marks them in progress as of `now`
    fn claim_frontier(
        &mut self,
        watermark: i64,
        limit: usize,
        now: i64,
    ) -> StorageResult<Vec<FrontierItem>>;

    /// Ranged read of items with `last_scraped <= watermark`, no claiming
    fn query_frontier(
        &self,
        watermark: i64,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<FrontierItem>>;

    /// Gets a frontier item by id
    fn get_frontier_item(&self, id: i64) -> StorageResult<FrontierItem>;

    /// Gets a frontier item by host name and path
    fn find_frontier_item(&self, host: &str, path: &str) -> StorageResult<Option<FrontierItem>>;

    /// Clears in-progress flags left behind by an interrupted run
    fn reset_in_progress(&mut self) -> StorageResult<usize>;

    // ===== Edges =====

    /// Inserts edges, ignoring pairs that already exist; returns how many
    /// were new
    fn insert_edges(&mut self, edges: &[Edge]) -> StorageResult<usize>;

    /// Recomputes the distinct-source-host count of each destination and
    /// overwrites the stored value
    fn recompute_inbound(&mut self, destinations: &[i64]) -> StorageResult<()>;

    // ===== Content =====

    /// Stores a fetched body
    fn create_content(&mut self, content: &ContentRecord) -> StorageResult<i64>;

    // ===== Statistics =====

    fn count_hosts(&self) -> StorageResult<u64>;

    fn count_frontier_items(&self) -> StorageResult<u64>;

    /// Items fetched at least once
    fn count_attempted(&self) -> StorageResult<u64>;

    /// Items fetched successfully at least once
    fn count_successful(&self) -> StorageResult<u64>;

    fn count_in_progress(&self) -> StorageResult<u64>;

    fn count_edges(&self) -> StorageResult<u64>;

    fn count_contents(&self) -> StorageResult<u64>;

    /// Items with the highest inbound-link counts
    fn top_inbound(&self, limit: usize) -> StorageResult<Vec<FrontierItem>>;
}
