//! Onion-Ripple: a link-graph crawler for onion services
//!
//! This crate discovers pages on an anonymized network, fetches them through a
//! SOCKS proxy under global and per-host concurrency limits, and persists the
//! resulting page graph together with its scheduling metadata.

pub mod config;
pub mod crawler;
pub mod network;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Onion-Ripple operations
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Store still failing after {attempts} attempts: {source}")]
    StoreExhausted {
        attempts: u32,
        source: storage::StorageError,
    },

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlPhase,
        to: state::CrawlPhase,
    },

    #[error("Coordinator invariant violated: {0}")]
    Invariant(String),

    #[error("Network control error: {0}")]
    Network(String),

    #[error("No usable local port: {0}")]
    NoLocalPort(std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL and record validation errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Missing host")]
    MissingHost,

    #[error("Path must start with '/': {0}")]
    RelativePath(String),

    #[error("Self-referential edge on frontier item {0}")]
    SelfEdge(i64),
}

/// Result type alias for Onion-Ripple operations
pub type Result<T> = std::result::Result<T, RippleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::CrawlPhase;
pub use url::{extract_links, DiscoveredLink};
