//! Integration tests for fetching and admission control
//!
//! A wiremock server stands in for the anonymizing proxy: the client sends
//! every onion request to it in absolute form and the mocks match on path.

use onion_ripple::crawler::{
    build_http_client, fetch, AdmissionController, AdmissionSettings, CrawlEvent, FetchJob,
    FetchResult, RunOutcome, SYNTHETIC_FAILURE_STATUS, UNSUPPORTED_MEDIA_BODY,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOST: &str = "abcdefghabcdefgh.onion";

fn job(host: &str, path: &str, id: i64) -> FetchJob {
    FetchJob {
        host: host.to_string(),
        path: path.to_string(),
        secure: false,
        depth: 0,
        frontier_item_id: id,
        scheduled_time: 0,
    }
}

fn settings(max_slots: usize, ttl: Duration) -> AdmissionSettings {
    AdmissionSettings {
        max_slots,
        min_pool_size: 1,
        max_pool_size: 32,
        fetch_ttl: ttl,
    }
}

/// Collects `count` completed fetches, ignoring pool-low requests
async fn collect_results(
    events: &mut UnboundedReceiver<CrawlEvent>,
    count: usize,
) -> Vec<FetchResult> {
    let mut results = Vec::new();
    while results.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("Timed out waiting for a fetch")
            .expect("Event channel closed");
        if let CrawlEvent::FetchComplete { result, .. } = event {
            results.push(result);
        }
    }
    results
}

#[tokio::test]
async fn test_fetch_html_page() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>Hello</body></html>", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let result = fetch(&client, &job(HOST, "/index.html", 1), Duration::from_secs(5)).await;

    assert_eq!(result.status_code, 200);
    assert_eq!(result.mime_type.as_deref(), Some("text/html"));
    assert_eq!(result.body.as_deref(), Some("<html><body>Hello</body></html>"));
    assert!(result.start_time <= result.end_time);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_fetch_service_unavailable_has_no_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_raw("busy", "text/html"))
        .mount(&mock_server)
        .await;

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let result = fetch(&client, &job(HOST, "/", 1), Duration::from_secs(5)).await;

    assert_eq!(result.status_code, 503);
    assert!(result.body.is_none());
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_fetch_image_is_unsupported_media() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"),
        )
        .mount(&mock_server)
        .await;

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let result = fetch(&client, &job(HOST, "/logo.png", 1), Duration::from_secs(5)).await;

    assert_eq!(result.status_code, 200);
    assert_eq!(result.body.as_deref(), Some(UNSUPPORTED_MEDIA_BODY));
    assert!(result.is_success());
    assert!(result.usable_body().is_none());
}

#[tokio::test]
async fn test_fetch_ttl_expiry_is_synthetic_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html></html>", "text/html")
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock_server)
        .await;

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let result = fetch(&client, &job(HOST, "/slow", 1), Duration::from_millis(200)).await;

    assert_eq!(result.status_code, SYNTHETIC_FAILURE_STATUS);
    assert!(result.body.is_none());
    assert!(result.error.is_some());
    assert!(result.end_time - result.start_time < 1500);
}

#[tokio::test]
async fn test_fetch_unreachable_proxy_is_synthetic_failure() {
    // Nothing listens on the discard port
    let client = build_http_client("http://127.0.0.1:9").expect("Failed to build client");
    let result = fetch(&client, &job(HOST, "/", 1), Duration::from_secs(5)).await;

    assert_eq!(result.status_code, SYNTHETIC_FAILURE_STATUS);
    assert!(result.body.is_none());
}

#[tokio::test]
async fn test_fifth_job_on_host_waits_for_a_completion() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html></html>", "text/html")
                .set_delay(Duration::from_millis(500)),
        )
        .expect(5)
        .mount(&mock_server)
        .await;

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let (controller, mut events) =
        AdmissionController::new(settings(16, Duration::from_secs(5)), client);

    controller.add_jobs((1..=5).map(|i| job(HOST, &format!("/{}", i), i)).collect());
    let runner = controller.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.host_in_flight(HOST), 4);
    assert_eq!(controller.deferred_len(), 1);
    assert_eq!(controller.in_flight(), 4);

    let results = collect_results(&mut events, 5).await;
    let last_started = results
        .iter()
        .max_by_key(|r| r.start_time)
        .expect("Five results");
    let first_finished = results
        .iter()
        .map(|r| r.end_time)
        .min()
        .expect("Five results");
    assert!(
        last_started.start_time >= first_finished,
        "fifth fetch started at {} before any fetch finished at {}",
        last_started.start_time,
        first_finished
    );

    controller.drain();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Coordinator did not stop")
        .expect("Coordinator panicked")
        .expect("Coordinator failed");
    assert_eq!(outcome, RunOutcome::Idle);
    assert_eq!(controller.host_in_flight(HOST), 0);
}

#[tokio::test]
async fn test_global_slots_bound_concurrency() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html></html>", "text/html")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&mock_server)
        .await;

    let hosts = [
        "abcdefghabcdefgh.onion",
        "bcdefghabcdefgha.onion",
        "cdefghabcdefghab.onion",
        "defghabcdefghabc.onion",
        "efghabcdefghabcd.onion",
        "fghabcdefghabcde.onion",
    ];

    let client = build_http_client(&mock_server.uri()).expect("Failed to build client");
    let (controller, mut events) =
        AdmissionController::new(settings(2, Duration::from_secs(5)), client);
    controller.add_jobs(
        hosts
            .iter()
            .enumerate()
            .map(|(i, host)| job(host, "/", i as i64 + 1))
            .collect(),
    );

    let runner = controller.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let watcher = controller.clone();
    let watch = tokio::spawn(async move {
        for _ in 0..20 {
            assert!(watcher.in_flight() <= 2);
            assert!(watcher.available_slots() <= 2);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });

    let results = collect_results(&mut events, hosts.len()).await;
    assert!(results.iter().all(|r| r.status_code == 200));
    watch.await.expect("Slot invariant violated");

    controller.drain();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Coordinator did not stop")
        .expect("Coordinator panicked")
        .expect("Coordinator failed");
    assert_eq!(outcome, RunOutcome::Idle);
    assert_eq!(controller.available_slots(), 2);
}

#[tokio::test]
async fn test_idle_without_work() {
    let client = build_http_client("http://127.0.0.1:9").expect("Failed to build client");
    let (controller, mut events) =
        AdmissionController::new(settings(4, Duration::from_millis(100)), client);

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .expect("Coordinator never went idle")
        .expect("Coordinator failed");
    assert_eq!(outcome, RunOutcome::Idle);

    // The empty pool was reported once before going idle
    assert!(matches!(
        events.try_recv(),
        Ok(CrawlEvent::PoolLow { .. })
    ));
}

#[tokio::test]
async fn test_timed_out_fetch_releases_slot_and_host() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let proxy_url = format!("http://{}", listener.local_addr().expect("Local address"));
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = build_http_client(&proxy_url).expect("Failed to build client");
    let (controller, mut events) =
        AdmissionController::new(settings(2, Duration::from_millis(150)), client);
    controller.add_jobs(vec![job(HOST, "/silent", 1)]);

    let runner = controller.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let results = collect_results(&mut events, 1).await;
    assert_eq!(results[0].status_code, SYNTHETIC_FAILURE_STATUS);
    assert!(results[0].body.is_none());
    assert_eq!(controller.available_slots(), 2);
    assert_eq!(controller.host_in_flight(HOST), 0);
    assert_eq!(controller.in_flight(), 0);

    controller.drain();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Coordinator did not stop")
        .expect("Coordinator panicked")
        .expect("Coordinator failed");
    assert_eq!(outcome, RunOutcome::Idle);
}
