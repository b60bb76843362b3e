//! Best-endpoint selection and the live per-network transport table

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use oracle_core::{network_label, FeedError, FeedResult, NetworkConfig, NetworkId};
use crate::probe::{EndpointProbe, ProbeResult};
use crate::transport::Transport;

/// Selector configuration
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub probe_interval: Duration,
    /// Per-request timeout of published transports
    pub request_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Currently selected endpoint of a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub url: String,
    pub network_id: NetworkId,
    pub last_measured_latency: Duration,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ActiveEndpoint {
    record: EndpointRecord,
    transport: Transport,
}

fn fastest<'a>(results: impl Iterator<Item = &'a ProbeResult>) -> Option<&'a ProbeResult> {
    results
        .filter(|r| r.is_healthy())
        .fold(None, |best: Option<&ProbeResult>, candidate| match best {
            Some(current) if current.latency <= candidate.latency => Some(current),
            _ => Some(candidate),
        })
}

/// Pick the endpoint with the strictly smallest positive latency
pub fn select_best(results: &[ProbeResult]) -> Option<&ProbeResult> {
    fastest(results.iter())
}

/// Like [`select_best`], but prefers any healthy endpoint other than `avoid`
pub fn select_best_avoiding<'a>(results: &'a [ProbeResult], avoid: Option<&str>) -> Option<&'a ProbeResult> {
    let Some(avoid) = avoid else {
        return select_best(results);
    };

    fastest(results.iter().filter(|r| r.url != avoid)).or_else(|| select_best(results))
}

/// Maintains the best transport per network
pub struct EndpointSelector {
    candidates: HashMap<NetworkId, Vec<String>>,
    probe: EndpointProbe,
    config: SelectorConfig,
    table: DashMap<NetworkId, ActiveEndpoint>,
}

impl EndpointSelector {
    pub fn new(
        candidates: HashMap<NetworkId, Vec<String>>,
        probe: EndpointProbe,
        config: SelectorConfig,
    ) -> Self {
        Self {
            candidates,
            probe,
            config,
            table: DashMap::new(),
        }
    }

    pub fn from_networks(networks: &[NetworkConfig], probe: EndpointProbe, config: SelectorConfig) -> Self {
        let candidates = networks
            .iter()
            .map(|n| {
                let endpoints = n
                    .endpoints
                    .iter()
                    .filter(|e| !e.trim().is_empty())
                    .cloned()
                    .collect();
                (n.network_id, endpoints)
            })
            .collect();
        Self::new(candidates, probe, config)
    }

    /// Networks with configured candidates, ascending
    pub fn networks(&self) -> Vec<NetworkId> {
        let mut networks: Vec<_> = self.candidates.keys().copied().collect();
        networks.sort_unstable();
        networks
    }

    pub fn candidates(&self, network: NetworkId) -> &[String] {
        self.candidates.get(&network).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current transport for a network
    pub fn get_best_transport(&self, network: NetworkId) -> FeedResult<Transport> {
        self.table
            .get(&network)
            .map(|entry| entry.transport.clone())
            .ok_or(FeedError::NoTransport(network))
    }

    /// Snapshot of the selected endpoint
    pub fn endpoint(&self, network: NetworkId) -> Option<EndpointRecord> {
        self.table.get(&network).map(|entry| entry.record.clone())
    }

    /// Snapshot of all selected endpoints
    pub fn endpoints(&self) -> Vec<EndpointRecord> {
        let mut records: Vec<_> = self.table.iter().map(|e| e.value().record.clone()).collect();
        records.sort_by_key(|r| r.network_id);
        records
    }

    /// Make `url` the network's current endpoint. The existing transport is
    /// kept when the URL is unchanged so its connection pool survives.
    pub fn publish(&self, network: NetworkId, url: &str, latency: Duration) -> FeedResult<Transport> {
        let current = self
            .table
            .get(&network)
            .filter(|entry| entry.record.url == url)
            .map(|entry| entry.transport.clone());
        let transport = match current {
            Some(transport) => transport,
            None => Transport::connect(network, url, self.config.request_timeout)?,
        };
        let record = EndpointRecord {
            url: url.to_string(),
            network_id: network,
            last_measured_latency: latency,
            last_updated_at: Utc::now(),
        };

        self.table.insert(
            network,
            ActiveEndpoint {
                record,
                transport: transport.clone(),
            },
        );
        Ok(transport)
    }

    /// Probe and reselect a network. Returns `None` when nothing was healthy,
    /// in which case the current transport is left in place.
    pub async fn refresh(&self, network: NetworkId) -> FeedResult<Option<Transport>> {
        self.refresh_avoiding(network, None).await
    }

    /// Probe and reselect, preferring an endpoint other than `avoid`
    pub async fn refresh_avoiding(&self, network: NetworkId, avoid: Option<&str>) -> FeedResult<Option<Transport>> {
        let candidates = self.candidates(network);
        if candidates.is_empty() {
            return Err(FeedError::NoTransport(network));
        }

        let results = self.probe.probe_all(network, candidates).await;
        let healthy = results.iter().filter(|r| r.is_healthy()).count();
        debug!(
            "Probed {} endpoints on {}: {} healthy",
            results.len(),
            network_label(network),
            healthy
        );

        let Some(best) = select_best_avoiding(&results, avoid) else {
            warn!("No working RPC endpoints found for {}", network_label(network));
            return Ok(None);
        };
        // select_best only yields healthy results
        let latency = best.latency.unwrap_or_default();

        let previous = self.endpoint(network).map(|r| r.url);
        let transport = self.publish(network, &best.url, latency)?;

        if previous.as_deref() == Some(best.url.as_str()) {
            debug!(
                "Keeping endpoint {} for {} ({:?})",
                best.url,
                network_label(network),
                latency
            );
        } else {
            info!(
                "Best RPC endpoint for {}: {} with latency {:?}",
                network_label(network),
                best.url,
                latency
            );
        }

        Ok(Some(transport))
    }

    /// Reselect every network concurrently
    pub async fn refresh_all(&self) {
        let networks = self.networks();
        let outcomes = join_all(networks.iter().map(|n| self.refresh(*n))).await;

        for (network, outcome) in networks.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!("Endpoint refresh for {} failed: {}", network_label(*network), e);
            }
        }
    }

    /// Start one periodic probe loop per network
    pub fn spawn_probe_loops(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.networks()
            .into_iter()
            .map(|network| {
                let selector = Arc::clone(self);
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    // startup already ran a selection round; the first probe is one period out
                    let period = selector.config.probe_interval;
                    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                    info!(
                        "Starting endpoint monitoring for {} every {:?}",
                        network_label(network),
                        selector.config.probe_interval
                    );

                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if let Err(e) = selector.refresh(network).await {
                                    warn!("Endpoint refresh for {} failed: {}", network_label(network), e);
                                }
                            }
                            _ = shutdown.changed() => {
                                info!("Stopping endpoint monitoring for {}", network_label(network));
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
