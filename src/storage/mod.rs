//! Storage module for persisting the crawl graph
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Host and frontier item persistence with scheduling metadata
//! - Claim-based frontier pulls
//! - Edge tracking and the inbound-link aggregate
//! - Run tracking and crash recovery

mod handle;
mod retry;
mod schema;
mod sqlite;
mod traits;

pub use handle::StoreHandle;
pub use retry::{with_retry, RetryPolicy};
pub use sqlite::SqliteStorage;
pub use traits::{FrontierStore, StorageError, StorageResult};

use crate::{RippleError, UrlError, UrlResult};
use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, RippleError> {
    SqliteStorage::new(path)
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A frontier item to be created (or found) by host and path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFrontierItem {
    pub host: String,
    pub path: String,
    pub depth: u32,
    pub secure: bool,
}

impl NewFrontierItem {
    /// Builds a validated frontier item
    ///
    /// The host must be non-empty and the path absolute.
    pub fn new(
        host: impl Into<String>,
        path: impl Into<String>,
        depth: u32,
        secure: bool,
    ) -> UrlResult<Self> {
        let host = host.into();
        let path = path.into();

        if host.trim().is_empty() {
            return Err(UrlError::MissingHost);
        }
        if !path.starts_with('/') {
            return Err(UrlError::RelativePath(path));
        }

        Ok(Self {
            host,
            path,
            depth,
            secure,
        })
    }
}

/// Identifiers returned by a frontier upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierIds {
    pub host_id: i64,
    pub frontier_item_id: i64,
}

/// A host row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub id: i64,
    pub name: String,
    pub discovered_at: i64,
}

/// A complete frontier item row
///
/// Timestamps are milliseconds since the Unix epoch; `0` means never.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierItem {
    pub id: i64,
    pub host_id: i64,
    pub host: String,
    pub path: String,
    pub depth: u32,
    pub secure: bool,
    pub last_started: i64,
    pub last_scraped: i64,
    pub last_successful: i64,
    pub in_progress: bool,
    pub tie_break: i64,
    pub inbound_links: u32,
    pub discovered_at: i64,
}

/// A directed link between two frontier items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source_id: i64,
    pub destination_id: i64,
    pub created_at: i64,
}

impl Edge {
    /// Builds an edge; a page linking to itself is rejected
    pub fn new(source_id: i64, destination_id: i64, created_at: i64) -> UrlResult<Self> {
        if source_id == destination_id {
            return Err(UrlError::SelfEdge(source_id));
        }
        Ok(Self {
            source_id,
            destination_id,
            created_at,
        })
    }
}

/// A stored page body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub frontier_item_id: i64,
    pub status_code: u16,
    pub mime_type: Option<String>,
    pub body: String,
    pub fetched_at: i64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    /// Milliseconds since the Unix epoch
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
