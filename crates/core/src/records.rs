//! Price record types
//!
//! Every record kind exposes the same small accessor set through [`PriceInfo`];
//! source-specific fields live on the concrete structs.

use alloy_primitives::{I256, U256};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{NetworkId, PriceSource};

/// Common capability set of a cached price
pub trait PriceInfo: Any + Send + Sync + fmt::Debug {
    fn source(&self) -> PriceSource;
    fn network_id(&self) -> NetworkId;
    /// Feed address for on-chain records, price id for off-chain ones
    fn identifier(&self) -> &str;
    /// When the relay observed this value
    fn observed_at(&self) -> DateTime<Utc>;
    /// Raw integer magnitude
    fn magnitude(&self) -> I256;
    /// Decimal exponent: real value = magnitude * 10^scale
    fn scale(&self) -> i32;

    /// Self-reported memory footprint in bytes.
    ///
    /// Returning `Some` takes priority over any registered or built-in estimator.
    fn estimated_size(&self) -> Option<usize> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared, immutable cached record
pub type PriceRecord = Arc<dyn PriceInfo>;

/// Latest round read from an on-chain aggregator contract
#[derive(Debug, Clone, PartialEq)]
pub struct ChainlinkPrice {
    pub round_id: U256,
    pub answer: I256,
    pub started_at: U256,
    pub updated_at: U256,
    pub answered_in_round: U256,
    pub exponent: i32,
    pub network_id: NetworkId,
    pub feed_address: String,
    pub timestamp: DateTime<Utc>,
}

impl PriceInfo for ChainlinkPrice {
    fn source(&self) -> PriceSource {
        PriceSource::Chainlink
    }

    fn network_id(&self) -> NetworkId {
        self.network_id
    }

    fn identifier(&self) -> &str {
        &self.feed_address
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn magnitude(&self) -> I256 {
        self.answer
    }

    fn scale(&self) -> i32 {
        self.exponent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parsed quote from the off-chain Hermes service
#[derive(Debug, Clone, PartialEq)]
pub struct PythPrice {
    pub id: String,
    pub symbol: Option<String>,
    pub price: I256,
    pub confidence: U256,
    pub exponent: i32,
    pub publish_time: i64,
    pub slot: i64,
    pub network_id: NetworkId,
    pub ema: Option<I256>,
    pub ema_confidence: Option<U256>,
    pub timestamp: DateTime<Utc>,
}

impl PriceInfo for PythPrice {
    fn source(&self) -> PriceSource {
        PriceSource::Pyth
    }

    fn network_id(&self) -> NetworkId {
        self.network_id
    }

    fn identifier(&self) -> &str {
        &self.id
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn magnitude(&self) -> I256 {
        self.price
    }

    fn scale(&self) -> i32 {
        self.exponent
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a record to a concrete kind
pub fn downcast_record<T: PriceInfo>(record: &PriceRecord) -> Option<&T> {
    record.as_any().downcast_ref::<T>()
}
