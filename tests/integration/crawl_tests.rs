//! End-to-end crawl tests
//!
//! A wiremock server plays the anonymizing proxy; the crawl itself runs
//! against a temporary SQLite database.

use onion_ripple::config::{
    load_config_with_hash, Config, CrawlerConfig, NetworkConfig, OutputConfig, StorageConfig,
};
use onion_ripple::crawler::crawl;
use onion_ripple::storage::{FrontierStore, RunStatus, SqliteStorage};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME: &str = "abcdefghabcdefgh.onion";
const OTHER: &str = "bcdefghabcdefgha.onion";

fn create_test_config(proxy_url: &str, seeds: Vec<String>, db_path: &str) -> Config {
    Config {
        seeds,
        seed_file: None,
        crawler: CrawlerConfig {
            max_slots: 4,
            min_pool_size: 2,
            max_pool_size: 16,
            fetch_ttl_ms: 2_000,
            pull_batch_size: 4,
            revisit_after_secs: 0,
            max_depth: None,
        },
        network: NetworkConfig {
            proxy_url: Some(proxy_url.to_string()),
            control_url: None,
            instances: 1,
            socks_port: None,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
            store_content: true,
        },
        storage: StorageConfig::default(),
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

/// Home links to a page on another service and to a broken page on itself;
/// the other page links back home.
async fn mount_small_graph(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><body>
            <a href="http://{}/page">Elsewhere</a>
            <a href="http://{}/about">About</a>
            </body></html>"#,
            OTHER, HOME
        )))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html(format!(
            r#"<html><body>Back to <a href="http://{}/">home</a></body></html>"#,
            HOME
        )))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(503))
        .mount(mock_server)
        .await;
}

async fn run_crawl(config: Config) -> onion_ripple::crawler::CrawlSummary {
    tokio::time::timeout(Duration::from_secs(30), crawl(config, "test-hash"))
        .await
        .expect("Crawl never went idle")
        .expect("Crawl failed")
}

#[tokio::test]
async fn test_full_crawl_builds_link_graph() {
    let mock_server = MockServer::start().await;
    mount_small_graph(&mock_server).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let config = create_test_config(
        &mock_server.uri(),
        vec![format!("start here: http://{}/", HOME)],
        db_path.to_str().expect("UTF-8 path"),
    );

    let summary = run_crawl(config).await;
    assert_eq!(summary.seeded, 1);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.edges_added, 3);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_hosts().unwrap(), 2);
    assert_eq!(storage.count_frontier_items().unwrap(), 3);
    assert_eq!(storage.count_attempted().unwrap(), 3);
    assert_eq!(storage.count_successful().unwrap(), 2);
    assert_eq!(storage.count_in_progress().unwrap(), 0);
    assert_eq!(storage.count_edges().unwrap(), 3);
    assert_eq!(storage.count_contents().unwrap(), 2);

    let home = storage
        .find_frontier_item(HOME, "/")
        .unwrap()
        .expect("Home page stored");
    assert_eq!(home.depth, 0);
    assert_eq!(home.inbound_links, 1);
    assert!(home.last_successful > 0);

    let about = storage
        .find_frontier_item(HOME, "/about")
        .unwrap()
        .expect("About page stored");
    assert_eq!(about.depth, 1);
    assert!(about.last_scraped > 0);
    assert_eq!(about.last_successful, 0);

    let run = storage
        .get_latest_run()
        .unwrap()
        .expect("Run recorded");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_recrawl_is_idempotent() {
    let mock_server = MockServer::start().await;
    mount_small_graph(&mock_server).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let db = db_path.to_str().expect("UTF-8 path");
    let seeds = vec![format!("http://{}/", HOME)];

    run_crawl(create_test_config(&mock_server.uri(), seeds.clone(), db)).await;
    let second = run_crawl(create_test_config(&mock_server.uri(), seeds, db)).await;
    assert_eq!(second.edges_added, 0);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_hosts().unwrap(), 2);
    assert_eq!(storage.count_frontier_items().unwrap(), 3);
    assert_eq!(storage.count_edges().unwrap(), 3);
    assert_eq!(storage.count_in_progress().unwrap(), 0);
}

#[tokio::test]
async fn test_crawl_without_seeds_goes_idle() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let config = create_test_config(
        "http://127.0.0.1:9",
        vec!["no onion addresses in here".to_string()],
        db_path.to_str().expect("UTF-8 path"),
    );

    let summary = run_crawl(config).await;
    assert_eq!(summary.seeded, 0);
    assert_eq!(summary.fetched, 0);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_frontier_items().unwrap(), 0);
    let run = storage.get_latest_run().unwrap().expect("Run recorded");
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_max_depth_limits_discovery() {
    let mock_server = MockServer::start().await;
    mount_small_graph(&mock_server).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let mut config = create_test_config(
        &mock_server.uri(),
        vec![format!("http://{}/", HOME)],
        db_path.to_str().expect("UTF-8 path"),
    );
    config.crawler.max_depth = Some(0);

    let summary = run_crawl(config).await;
    assert_eq!(summary.fetched, 1);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_frontier_items().unwrap(), 1);
    assert_eq!(storage.count_edges().unwrap(), 0);
}

#[tokio::test]
async fn test_crawl_from_config_file() {
    let mock_server = MockServer::start().await;
    mount_small_graph(&mock_server).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("crawl.db");
    let seed_path = dir.path().join("seeds.txt");
    std::fs::write(&seed_path, format!("\n{}\n\n", HOME)).expect("Failed to write seeds");

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
seed-file = "{seeds}"

[crawler]
max-slots = 2
min-pool-size = 1
max-pool-size = 8
fetch-ttl-ms = 2000
pull-batch-size = 4

[network]
proxy-url = "{proxy}"

[output]
database-path = "{db}"
store-content = false
"#,
            seeds = seed_path.display(),
            proxy = mock_server.uri(),
            db = db_path.display()
        ),
    )
    .expect("Failed to write config");

    let (config, hash) = load_config_with_hash(Path::new(&config_path)).expect("Config loads");
    assert_eq!(hash.len(), 64);

    let summary = run_crawl_with_hash(config, &hash).await;
    assert_eq!(summary.seeded, 1);
    assert_eq!(summary.fetched, 3);

    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_contents().unwrap(), 0);
    assert_eq!(storage.count_edges().unwrap(), 3);
    let run = storage.get_latest_run().unwrap().expect("Run recorded");
    assert_eq!(run.config_hash, hash);
}

async fn run_crawl_with_hash(config: Config, hash: &str) -> onion_ripple::crawler::CrawlSummary {
    tokio::time::timeout(Duration::from_secs(30), crawl(config, hash))
        .await
        .expect("Crawl never went idle")
        .expect("Crawl failed")
}
