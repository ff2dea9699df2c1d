//! Integration tests for the network control daemon client

use onion_ripple::config::NetworkConfig;
use onion_ripple::network::Network;
use onion_ripple::RippleError;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn control_config(endpoint: String, socks_port: Option<u16>) -> NetworkConfig {
    NetworkConfig {
        proxy_url: None,
        control_url: Some(endpoint),
        instances: 3,
        socks_port,
    }
}

async fn rpc_calls(mock_server: &MockServer) -> Vec<Value> {
    mock_server
        .received_requests()
        .await
        .expect("Request recording enabled")
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("JSON-RPC body"))
        .collect()
}

#[tokio::test]
async fn test_control_daemon_lifecycle() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": true
        })))
        .mount(&mock_server)
        .await;

    let config = control_config(format!("{}/rpc", mock_server.uri()), Some(9150));
    let network = Network::from_config(&config).expect("Network selected");

    let proxy_url = network.open(&config).await.expect("Network opened");
    assert_eq!(proxy_url, "socks5h://127.0.0.1:9150");
    network.close().await.expect("Network closed");

    let calls = rpc_calls(&mock_server).await;
    let methods: Vec<&str> = calls
        .iter()
        .map(|call| call["method"].as_str().expect("method name"))
        .collect();
    assert_eq!(
        methods,
        vec!["createPool", "createInstances", "createSocksServer", "closeInstances"]
    );

    assert!(calls.iter().all(|call| call["jsonrpc"] == "2.0"));
    assert_eq!(calls[1]["params"]["count"], 3);
    assert_eq!(calls[2]["params"]["port"], 9150);

    // Every call carries its own id
    let mut ids: Vec<u64> = calls
        .iter()
        .map(|call| call["id"].as_u64().expect("numeric id"))
        .collect();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_control_daemon_picks_free_port() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": null
        })))
        .mount(&mock_server)
        .await;

    let config = control_config(mock_server.uri(), None);
    let network = Network::from_config(&config).expect("Network selected");

    let proxy_url = network.open(&config).await.expect("Network opened");
    let port: u16 = proxy_url
        .strip_prefix("socks5h://127.0.0.1:")
        .expect("local SOCKS proxy")
        .parse()
        .expect("numeric port");
    assert!(port > 0);

    let calls = rpc_calls(&mock_server).await;
    assert_eq!(calls[2]["params"]["port"], port);
}

#[tokio::test]
async fn test_control_daemon_error_reply() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "no instances available" }
        })))
        .mount(&mock_server)
        .await;

    let config = control_config(mock_server.uri(), Some(9150));
    let network = Network::from_config(&config).expect("Network selected");

    match network.open(&config).await {
        Err(RippleError::Network(message)) => {
            assert!(message.contains("createPool"));
            assert!(message.contains("no instances available"));
        }
        other => panic!("Expected a network error, got {:?}", other),
    }

    // The failed call stopped the lifecycle before any instances were requested
    assert_eq!(rpc_calls(&mock_server).await.len(), 1);
}

#[tokio::test]
async fn test_control_daemon_http_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = control_config(mock_server.uri(), Some(9150));
    let network = Network::from_config(&config).expect("Network selected");
    assert!(matches!(
        network.open(&config).await,
        Err(RippleError::Network(_))
    ));
}
