use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Onion-Ripple
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Seed text cells; every onion URI found inside them is seeded
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Optional file with one seed text cell per line
    #[serde(default)]
    pub seed_file: Option<String>,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    pub network: NetworkConfig,

    pub output: OutputConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Concurrency and scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Global number of fetch slots
    pub max_slots: usize,

    /// Pool size below which more work is requested
    pub min_pool_size: usize,

    /// Pool size the orchestrator fills up to
    pub max_pool_size: usize,

    /// Bound on a single fetch attempt (milliseconds)
    pub fetch_ttl_ms: u64,

    /// Default number of frontier items pulled after each completed fetch
    pub pull_batch_size: usize,

    /// Items scraped more recently than this many seconds before the run
    /// started are not pulled again
    pub revisit_after_secs: u64,

    /// Links discovered deeper than this are not added to the frontier
    pub max_depth: Option<u32>,
}

impl CrawlerConfig {
    pub fn fetch_ttl(&self) -> Duration {
        Duration::from_millis(self.fetch_ttl_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_slots: 64,
            min_pool_size: 64,
            max_pool_size: 256,
            fetch_ttl_ms: 60_100,
            pull_batch_size: 16,
            revisit_after_secs: 0,
            max_depth: None,
        }
    }
}

/// Anonymizing network configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Proxy URL of an already running SOCKS endpoint (e.g. `socks5h://127.0.0.1:9050`)
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// JSON-RPC endpoint of the network control daemon
    #[serde(default)]
    pub control_url: Option<String>,

    /// Number of network instances requested from the control daemon
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Local port for the SOCKS server created through the control daemon
    #[serde(default)]
    pub socks_port: Option<u16>,
}

fn default_instances() -> u32 {
    1
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Whether fetched bodies are persisted as content rows
    #[serde(default = "default_store_content")]
    pub store_content: bool,
}

fn default_store_content() -> bool {
    true
}

/// Store access retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            retry_backoff_ms: 200,
        }
    }
}
