//! Configuration types

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{FeedError, FeedResult, NetworkId};

/// Default cache cap: 10 MiB
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// On-chain aggregator feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub symbol: Option<String>,
    pub address: String,
}

/// A network, its candidate RPC endpoints and the feeds read from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_id: NetworkId,
    #[serde(default)]
    pub name: Option<String>,
    /// May be left empty when an extra-RPC list supplies the endpoints
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythFeedConfig {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Off-chain Hermes service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythConfig {
    #[serde(default = "default_pyth_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_pyth_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_pyth_http_retries")]
    pub http_retries: u32,
    #[serde(default)]
    pub feeds: Vec<PythFeedConfig>,
}

fn default_pyth_endpoint() -> String {
    "https://hermes.pyth.network".to_string()
}

fn default_pyth_timeout_ms() -> u64 {
    5_000
}

fn default_pyth_http_retries() -> u32 {
    3
}

/// Loop intervals, timeouts and retry tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub fetch_interval_secs: u64,
    pub max_concurrent_fetches: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub status_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            fetch_interval_secs: 30,
            max_concurrent_fetches: 10,
            max_retries: 1,
            retry_delay_ms: 2_000,
            status_interval_secs: 15,
        }
    }
}

impl MonitoringConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
        }
    }
}

/// One entry of an extra-RPC list: a bare URL or an object with a `url`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExtraRpcEntry {
    Url(String),
    Detailed { url: String },
    Other(IgnoredAny),
}

impl ExtraRpcEntry {
    pub fn url(&self) -> Option<&str> {
        match self {
            ExtraRpcEntry::Url(url) | ExtraRpcEntry::Detailed { url } => Some(url),
            ExtraRpcEntry::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtraRpcList {
    #[serde(default)]
    pub rpcs: Vec<ExtraRpcEntry>,
}

/// Additional candidate endpoints keyed by chain id, in the
/// `extraRpcs.json` layout: `{"1": {"rpcs": ["https://...", {"url": "..."}]}}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ExtraRpcs {
    pub chains: HashMap<String, ExtraRpcList>,
}

impl ExtraRpcs {
    pub fn from_json(text: &str) -> FeedResult<Self> {
        serde_json::from_str(text).map_err(|e| FeedError::Config(format!("invalid extra RPC list: {}", e)))
    }

    pub fn load(path: &Path) -> FeedResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            FeedError::Config(format!("failed to read extra RPC list {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Plain HTTP(S) endpoints listed for a network. Websocket and
    /// API-key-templated URLs are skipped.
    pub fn urls_for(&self, network_id: NetworkId) -> Vec<&str> {
        self.chains
            .iter()
            .filter(|(chain, _)| chain.trim().parse::<NetworkId>().ok() == Some(network_id))
            .flat_map(|(_, list)| list.rpcs.iter().filter_map(ExtraRpcEntry::url))
            .map(str::trim)
            .filter(|url| is_plain_http(url))
            .collect()
    }
}

fn is_plain_http(url: &str) -> bool {
    (url.starts_with("https://") || url.starts_with("http://")) && !url.contains("${")
}

fn endpoint_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    /// Optional `extraRpcs.json`-style file with more candidate endpoints
    #[serde(default)]
    pub extra_rpcs_path: Option<PathBuf>,
    #[serde(default)]
    pub pyth: Option<PythConfig>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn get_network_config(&self, network_id: NetworkId) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.network_id == network_id)
    }

    /// Append extra candidates to the configured networks, skipping URLs a
    /// network already lists. Networks that are not configured are ignored.
    /// Returns the number of endpoints added.
    pub fn merge_extra_rpcs(&mut self, extra: &ExtraRpcs) -> usize {
        let mut added = 0;
        for network in &mut self.networks {
            let mut known: HashSet<String> = network.endpoints.iter().map(|e| endpoint_key(e)).collect();
            for url in extra.urls_for(network.network_id) {
                if known.insert(endpoint_key(url)) {
                    network.endpoints.push(url.to_string());
                    added += 1;
                }
            }
        }
        added
    }

    /// Reject tunables the loops cannot run with
    pub fn validate(&self) -> FeedResult<()> {
        let m = &self.monitoring;
        let nonzero = [
            ("monitoring.probe_interval_secs", m.probe_interval_secs),
            ("monitoring.probe_timeout_secs", m.probe_timeout_secs),
            ("monitoring.fetch_interval_secs", m.fetch_interval_secs),
            ("monitoring.status_interval_secs", m.status_interval_secs),
            ("monitoring.max_concurrent_fetches", m.max_concurrent_fetches as u64),
            ("cache.max_size_bytes", self.cache.max_size_bytes as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(FeedError::Config(format!("{} must be greater than zero", name)));
            }
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.network_id) {
                return Err(FeedError::Config(format!(
                    "network {} configured more than once",
                    network.network_id
                )));
            }
            if network.endpoints.iter().all(|e| e.trim().is_empty()) {
                return Err(FeedError::Config(format!(
                    "network {} has no endpoints",
                    network.network_id
                )));
            }
            if let Some(feed) = network.feeds.iter().find(|f| f.address.trim().is_empty()) {
                return Err(FeedError::Config(format!(
                    "network {} has a feed ({}) without an address",
                    network.network_id,
                    feed.symbol.as_deref().unwrap_or("unnamed")
                )));
            }
        }

        if let Some(pyth) = &self.pyth {
            if pyth.endpoint.trim().is_empty() {
                return Err(FeedError::Config("pyth.endpoint is empty".into()));
            }
            if pyth.feeds.iter().any(|f| f.id.trim().is_empty()) {
                return Err(FeedError::Config("pyth feed without an id".into()));
            }
        }

        Ok(())
    }
}
