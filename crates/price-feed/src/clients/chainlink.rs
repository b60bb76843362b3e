//! Aggregator contract reads over JSON-RPC `eth_call`

use alloy_primitives::{I256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::warn;

use oracle_core::{FeedError, FeedResult};
use oracle_endpoints::Transport;
use crate::feeds::{ChainClient, RoundData, DEFAULT_DECIMALS};

/// `latestRoundData()`
pub const LATEST_ROUND_DATA_SELECTOR: [u8; 4] = [0xfe, 0xaf, 0x96, 0x8c];
/// `decimals()`
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

const WORD: usize = 32;

/// Reads aggregator contracts with raw `eth_call`s.
///
/// Decimals are fetched once per contract; a failed read falls back to
/// [`DEFAULT_DECIMALS`] and is retried on the next fetch.
#[derive(Debug, Default)]
pub struct JsonRpcChainClient {
    decimals: DashMap<String, u8>,
}

impl JsonRpcChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn call(&self, transport: &Transport, contract: &str, selector: [u8; 4]) -> FeedResult<Vec<u8>> {
        let params = json!([
            {
                "to": contract,
                "data": format!("0x{}", hex::encode(selector)),
            },
            "latest"
        ]);

        let result = transport.request("eth_call", params).await?;
        decode_hex_result(&result)
    }

    async fn decimals(&self, transport: &Transport, contract: &str) -> u8 {
        let key = contract.to_ascii_lowercase();
        let cached = self.decimals.get(&key).map(|entry| *entry);
        if let Some(decimals) = cached {
            return decimals;
        }

        match self
            .call(transport, contract, DECIMALS_SELECTOR)
            .await
            .and_then(|data| decode_decimals(&data))
        {
            Ok(decimals) => {
                self.decimals.insert(key, decimals);
                decimals
            }
            Err(e) => {
                warn!(
                    "Failed to get decimals for feed {}, using default {}: {}",
                    contract, DEFAULT_DECIMALS, e
                );
                DEFAULT_DECIMALS
            }
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn latest_round(&self, transport: &Transport, contract: &str) -> FeedResult<RoundData> {
        let data = self.call(transport, contract, LATEST_ROUND_DATA_SELECTOR).await?;
        let decimals = self.decimals(transport, contract).await;
        decode_latest_round(&data, decimals)
    }
}

fn decode_hex_result(result: &Value) -> FeedResult<Vec<u8>> {
    let text = result
        .as_str()
        .ok_or_else(|| FeedError::Upstream(format!("eth_call returned non-string result: {}", result)))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| FeedError::Upstream(format!("invalid eth_call hex: {}", e)))
}

fn word(data: &[u8], index: usize) -> FeedResult<&[u8]> {
    data.get(index * WORD..(index + 1) * WORD).ok_or_else(|| {
        FeedError::Upstream(format!(
            "eth_call returned {} bytes, expected at least {}",
            data.len(),
            (index + 1) * WORD
        ))
    })
}

fn uint_word(data: &[u8], index: usize) -> FeedResult<U256> {
    word(data, index).map(U256::from_be_slice)
}

/// ABI-decode `(uint80, int256, uint256, uint256, uint80)`
pub fn decode_latest_round(data: &[u8], decimals: u8) -> FeedResult<RoundData> {
    Ok(RoundData {
        round_id: uint_word(data, 0)?,
        answer: I256::from_raw(uint_word(data, 1)?),
        started_at: uint_word(data, 2)?,
        updated_at: uint_word(data, 3)?,
        answered_in_round: uint_word(data, 4)?,
        decimals,
    })
}

/// ABI-decode a `uint8`
pub fn decode_decimals(data: &[u8]) -> FeedResult<u8> {
    let raw = word(data, 0)?;
    let (high, low) = raw.split_at(WORD - 1);
    if high.iter().any(|b| *b != 0) {
        return Err(FeedError::Upstream("decimals() out of range".into()));
    }
    Ok(low[0])
}
