//! Anonymizing-network collaborator
//!
//! The crawler only needs a proxy URL to send its requests through. This
//! module gets one, either from an already running SOCKS endpoint
//! ([`StaticProxy`]) or by asking a control daemon over JSON-RPC to start
//! network instances and a local SOCKS server ([`ControlRpc`]).
//!
//! Lifecycle calls run once at startup ([`Network::open`]) and once when the
//! crawl goes idle ([`Network::close`]).

use crate::config::NetworkConfig;
use crate::{Result, RippleError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Control-plane operations of an anonymizing network
#[allow(async_fn_in_trait)]
pub trait AnonymizingNetwork {
    async fn create_pool(&self) -> Result<()>;

    async fn create_instances(&self, count: u32) -> Result<()>;

    async fn close_instances(&self) -> Result<()>;

    /// Starts a SOCKS server on local `port` and returns its proxy URL
    async fn create_socks_server(&self, port: u16) -> Result<String>;
}

/// An externally managed SOCKS endpoint; lifecycle calls do nothing
#[derive(Debug, Clone)]
pub struct StaticProxy {
    proxy_url: String,
}

impl StaticProxy {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
        }
    }
}

impl AnonymizingNetwork for StaticProxy {
    async fn create_pool(&self) -> Result<()> {
        Ok(())
    }

    async fn create_instances(&self, _count: u32) -> Result<()> {
        Ok(())
    }

    async fn close_instances(&self) -> Result<()> {
        Ok(())
    }

    async fn create_socks_server(&self, _port: u16) -> Result<String> {
        Ok(self.proxy_url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client for the network control daemon
#[derive(Debug)]
pub struct ControlRpc {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl ControlRpc {
    /// Creates a client for the daemon listening at `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, id, "Control RPC call");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RippleError::Network(format!("{} unreachable: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RippleError::Network(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| RippleError::Network(format!("{} sent a malformed reply: {}", method, e)))?;

        if let Some(fault) = reply.error {
            return Err(RippleError::Network(format!(
                "{} failed: {} (code {})",
                method, fault.message, fault.code
            )));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

impl AnonymizingNetwork for ControlRpc {
    async fn create_pool(&self) -> Result<()> {
        self.call("createPool", json!({})).await.map(|_| ())
    }

    async fn create_instances(&self, count: u32) -> Result<()> {
        self.call("createInstances", json!({ "count": count }))
            .await
            .map(|_| ())
    }

    async fn close_instances(&self) -> Result<()> {
        self.call("closeInstances", json!({})).await.map(|_| ())
    }

    async fn create_socks_server(&self, port: u16) -> Result<String> {
        self.call("createSocksServer", json!({ "port": port })).await?;
        Ok(format!("socks5h://127.0.0.1:{}", port))
    }
}

/// Asks the OS for a free local TCP port
pub fn free_local_port() -> Result<u16> {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .map_err(RippleError::NoLocalPort)
}

/// The network collaborator selected by configuration
#[derive(Debug)]
pub enum Network {
    Static(StaticProxy),
    Control(ControlRpc),
}

impl Network {
    /// Picks the control daemon when `control-url` is set, else the static proxy
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        if let Some(endpoint) = &config.control_url {
            return Ok(Self::Control(ControlRpc::new(endpoint.as_str())?));
        }
        match &config.proxy_url {
            Some(url) => Ok(Self::Static(StaticProxy::new(url.as_str()))),
            None => Err(RippleError::Network(
                "neither proxy-url nor control-url is configured".to_string(),
            )),
        }
    }

    /// Brings the network up and returns the proxy URL fetches go through
    ///
    /// For the control daemon: create the pool, start `instances` network
    /// instances, then a SOCKS server on `socks-port` or a free local port.
    pub async fn open(&self, config: &NetworkConfig) -> Result<String> {
        match self {
            Self::Static(proxy) => proxy.create_socks_server(0).await,
            Self::Control(rpc) => {
                rpc.create_pool().await?;
                rpc.create_instances(config.instances).await?;
                let port = match config.socks_port {
                    Some(port) => port,
                    None => free_local_port()?,
                };
                let proxy_url = rpc.create_socks_server(port).await?;
                tracing::info!(instances = config.instances, %proxy_url, "Network instances ready");
                Ok(proxy_url)
            }
        }
    }

    /// Shuts down whatever [`open`](Self::open) started
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Static(proxy) => proxy.close_instances().await,
            Self::Control(rpc) => rpc.close_instances().await,
        }
    }
}
