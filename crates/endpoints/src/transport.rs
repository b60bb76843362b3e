//! JSON-RPC transport handle for one endpoint

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use oracle_core::{FeedError, FeedResult, NetworkId};

/// JSON-RPC call errors
#[derive(Debug, Error)]
pub enum RpcError {
    /// Error object returned by the node; rendered as `<code>: <message>`
    #[error("{code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Http(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for FeedError {
    fn from(err: RpcError) -> Self {
        FeedError::upstream(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug)]
struct TransportInner {
    network: NetworkId,
    url: String,
    client: reqwest::Client,
    connected_at: DateTime<Utc>,
    next_id: AtomicU64,
}

/// Cheap-to-clone handle to a network's selected endpoint
#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Build a handle; performs no network I/O
    pub fn connect(network: NetworkId, url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Upstream(format!("failed to build client for {}: {}", url, e)))?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                network,
                url,
                client,
                connected_at: Utc::now(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn network(&self) -> NetworkId {
        self.inner.network
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Whether two handles point at the same endpoint
    pub fn same_endpoint(&self, other: &Transport) -> bool {
        self.inner.network == other.inner.network && self.inner.url == other.inner.url
    }

    /// Whether two handles share one underlying client and connection pool
    pub fn shares_connection(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Issue a single JSON-RPC request and return its `result`
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .inner
            .client
            .post(&self.inner.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        parse_response(status.is_success(), status.as_u16(), &text)
    }
}

fn parse_response(success: bool, status: u16, text: &str) -> Result<Value, RpcError> {
    // Nodes often return JSON-RPC error bodies with non-2xx statuses
    match serde_json::from_str::<RpcResponse>(text) {
        Ok(RpcResponse { error: Some(err), .. }) => Err(RpcError::Rpc {
            code: err.code,
            message: err.message,
        }),
        Ok(RpcResponse { result: Some(result), .. }) if success => Ok(result),
        Ok(_) if !success => Err(RpcError::Http(format!("HTTP status {}", status))),
        Ok(_) => Err(RpcError::InvalidResponse("missing result".into())),
        Err(_) if !success => Err(RpcError::Http(format!("HTTP status {}", status))),
        Err(e) => Err(RpcError::InvalidResponse(e.to_string())),
    }
}
