//! Endpoint latency probing
//!
//! Each candidate gets one lightweight round trip. Probes for a network run
//! concurrently, every one bounded by its own timeout, and the batch only
//! returns once all of them have finished or timed out.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use oracle_core::{network_label, NetworkId};
use crate::transport::Transport;

/// A single round trip against an endpoint
#[async_trait]
pub trait Prober: Send + Sync {
    async fn round_trip(&self, network: NetworkId, url: &str) -> anyhow::Result<()>;
}

/// Probes with `web3_clientVersion` over HTTP JSON-RPC
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn round_trip(&self, network: NetworkId, url: &str) -> anyhow::Result<()> {
        let transport = Transport::connect(network, url, self.timeout)?;
        transport.request("web3_clientVersion", json!([])).await?;
        Ok(())
    }
}

/// Outcome of probing one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub network: NetworkId,
    pub url: String,
    /// `None` when the dial or call failed or timed out
    pub latency: Option<Duration>,
}

impl ProbeResult {
    pub fn failed(network: NetworkId, url: impl Into<String>) -> Self {
        Self {
            network,
            url: url.into(),
            latency: None,
        }
    }

    /// Usable as a selection candidate
    pub fn is_healthy(&self) -> bool {
        matches!(self.latency, Some(latency) if !latency.is_zero())
    }
}

/// Concurrent latency measurement over a network's candidates
#[derive(Clone)]
pub struct EndpointProbe {
    prober: Arc<dyn Prober>,
    timeout: Duration,
}

impl EndpointProbe {
    pub fn new(prober: Arc<dyn Prober>, timeout: Duration) -> Self {
        Self { prober, timeout }
    }

    pub fn http(timeout: Duration) -> Self {
        Self::new(Arc::new(HttpProber::new(timeout)), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Measure one endpoint
    pub async fn probe_one(&self, network: NetworkId, url: &str) -> ProbeResult {
        let start = Instant::now();

        match tokio::time::timeout(self.timeout, self.prober.round_trip(network, url)).await {
            Ok(Ok(())) => ProbeResult {
                network,
                url: url.to_string(),
                latency: Some(start.elapsed()),
            },
            Ok(Err(e)) => {
                debug!("Probe of {} on {} failed: {}", url, network_label(network), e);
                ProbeResult::failed(network, url)
            }
            Err(_) => {
                debug!(
                    "Probe of {} on {} timed out after {:?}",
                    url,
                    network_label(network),
                    self.timeout
                );
                ProbeResult::failed(network, url)
            }
        }
    }

    /// Measure every candidate concurrently; results keep the input order
    pub async fn probe_all(&self, network: NetworkId, urls: &[String]) -> Vec<ProbeResult> {
        join_all(urls.iter().map(|url| self.probe_one(network, url))).await
    }
}
