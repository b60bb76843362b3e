//! Upstream price provider interfaces

use alloy_primitives::{I256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oracle_core::{ChainlinkPrice, FeedResult, NetworkId, PythPrice, PYTH_NETWORK_ID};
use oracle_endpoints::Transport;

/// Decimals assumed when an aggregator does not answer `decimals()`
pub const DEFAULT_DECIMALS: u8 = 8;

/// `latestRoundData()` of an aggregator contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: U256,
    pub answer: I256,
    pub started_at: U256,
    pub updated_at: U256,
    pub answered_in_round: U256,
    pub decimals: u8,
}

impl RoundData {
    pub fn into_price(self, network: NetworkId, feed_address: &str, observed_at: DateTime<Utc>) -> ChainlinkPrice {
        ChainlinkPrice {
            round_id: self.round_id,
            answer: self.answer,
            started_at: self.started_at,
            updated_at: self.updated_at,
            answered_in_round: self.answered_in_round,
            exponent: -i32::from(self.decimals),
            network_id: network,
            feed_address: feed_address.to_string(),
            timestamp: observed_at,
        }
    }
}

/// On-chain aggregator reader
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_round(&self, transport: &Transport, contract: &str) -> FeedResult<RoundData>;
}

/// One parsed off-chain quote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainQuote {
    pub identifier: String,
    pub magnitude: I256,
    pub scale: i32,
    pub confidence: U256,
    pub publish_time: i64,
    pub slot: i64,
    pub ema: Option<I256>,
    pub ema_confidence: Option<U256>,
}

impl OffchainQuote {
    pub fn into_price(self, symbol: Option<String>, observed_at: DateTime<Utc>) -> PythPrice {
        PythPrice {
            id: self.identifier,
            symbol,
            price: self.magnitude,
            confidence: self.confidence,
            exponent: self.scale,
            publish_time: self.publish_time,
            slot: self.slot,
            network_id: PYTH_NETWORK_ID,
            ema: self.ema,
            ema_confidence: self.ema_confidence,
            timestamp: observed_at,
        }
    }
}

/// Batched off-chain price service
#[async_trait]
pub trait OffchainPriceClient: Send + Sync {
    async fn fetch_latest(&self, ids: &[String]) -> FeedResult<Vec<OffchainQuote>>;
}
