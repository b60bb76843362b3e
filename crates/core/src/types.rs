//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric network (chain) identifier
pub type NetworkId = u64;

/// Networks the relay knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownNetwork {
    /// Pseudo-network holding off-chain Pyth quotes
    Pyth,
    Ethereum,
    Arbitrum,
    Polygon,
    Bsc,
    Optimism,
    Fantom,
    Avalanche,
}

impl KnownNetwork {
    pub const ALL: [KnownNetwork; 8] = [
        KnownNetwork::Pyth,
        KnownNetwork::Ethereum,
        KnownNetwork::Arbitrum,
        KnownNetwork::Polygon,
        KnownNetwork::Bsc,
        KnownNetwork::Optimism,
        KnownNetwork::Fantom,
        KnownNetwork::Avalanche,
    ];

    pub fn network_id(&self) -> NetworkId {
        match self {
            KnownNetwork::Pyth => 0,
            KnownNetwork::Ethereum => 1,
            KnownNetwork::Arbitrum => 42161,
            KnownNetwork::Polygon => 137,
            KnownNetwork::Bsc => 56,
            KnownNetwork::Optimism => 10,
            KnownNetwork::Fantom => 250,
            KnownNetwork::Avalanche => 43114,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KnownNetwork::Pyth => "pyth",
            KnownNetwork::Ethereum => "ethereum",
            KnownNetwork::Arbitrum => "arbitrum",
            KnownNetwork::Polygon => "polygon",
            KnownNetwork::Bsc => "bsc",
            KnownNetwork::Optimism => "optimism",
            KnownNetwork::Fantom => "fantom",
            KnownNetwork::Avalanche => "avalanche",
        }
    }

    pub fn from_id(id: NetworkId) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.network_id() == id)
    }
}

impl fmt::Display for KnownNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Network id reserved for off-chain Pyth quotes
pub const PYTH_NETWORK_ID: NetworkId = 0;

/// Human-readable label for a network id, e.g. `arbitrum(42161)`
pub fn network_label(id: NetworkId) -> String {
    match KnownNetwork::from_id(id) {
        Some(network) => format!("{}({})", network.name(), id),
        None => format!("network({})", id),
    }
}

/// Upstream provider a price record came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// On-chain aggregator contracts
    Chainlink,
    /// Off-chain Hermes HTTP service
    Pyth,
    /// Anything registered by an embedding application
    Custom(String),
}

impl PriceSource {
    pub fn as_str(&self) -> &str {
        match self {
            PriceSource::Chainlink => "chainlink",
            PriceSource::Pyth => "pyth",
            PriceSource::Custom(name) => name,
        }
    }

    /// Namespace prefix used for cache keys, e.g. `chainlink:`.
    ///
    /// Custom sources live under `custom:<name>:` with `%` and `:` in the
    /// name percent-encoded, so no custom name can reach the namespace of a
    /// built-in source or of another custom source.
    pub fn prefix(&self) -> String {
        match self {
            PriceSource::Custom(name) => format!("custom:{}:", escape_namespace(name)),
            _ => format!("{}:", self.as_str()),
        }
    }
}

fn escape_namespace(name: &str) -> String {
    name.replace('%', "%25").replace(':', "%3A")
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "chainlink" => PriceSource::Chainlink,
            "pyth" => PriceSource::Pyth,
            _ => PriceSource::Custom(s.to_string()),
        })
    }
}

/// A tracked `(network, source, identifier)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub network: NetworkId,
    pub source: PriceSource,
    pub identifier: String,
}

impl FeedKey {
    pub fn new(network: NetworkId, source: PriceSource, identifier: impl Into<String>) -> Self {
        Self {
            network,
            source,
            identifier: identifier.into(),
        }
    }

    /// Identifier namespaced by source: `<source>:<identifier>`
    pub fn prefixed(&self) -> String {
        prefixed_identifier(&self.source, &self.identifier)
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.prefixed(), self.network)
    }
}

pub fn prefixed_identifier(source: &PriceSource, identifier: &str) -> String {
    let mut key = source.prefix();
    key.push_str(identifier);
    key
}
