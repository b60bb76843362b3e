//! Pyth Hermes REST client

use alloy_primitives::{I256, U256};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use oracle_core::{FeedError, FeedResult, PythConfig};
use crate::feeds::{OffchainPriceClient, OffchainQuote};

const LATEST_PRICE_PATH: &str = "/v2/updates/price/latest";
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct HermesResponse {
    #[serde(default)]
    parsed: Vec<HermesPriceFeed>,
}

#[derive(Debug, Deserialize)]
struct HermesPriceFeed {
    id: String,
    price: PriceVector,
    #[serde(default)]
    ema_price: Option<PriceVector>,
    #[serde(default)]
    metadata: Option<HermesMetadata>,
}

#[derive(Debug, Deserialize)]
struct PriceVector {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

#[derive(Debug, Deserialize)]
struct HermesMetadata {
    #[serde(default)]
    slot: Option<i64>,
}

/// Batched latest-price reads from a Hermes endpoint
#[derive(Debug, Clone)]
pub struct HermesClient {
    endpoint: String,
    client: reqwest::Client,
    http_retries: u32,
}

impl HermesClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, http_retries: u32) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("failed to build Hermes client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            http_retries,
        })
    }

    pub fn from_config(config: &PythConfig) -> FeedResult<Self> {
        Self::new(
            config.endpoint.as_str(),
            Duration::from_millis(config.timeout_ms),
            config.http_retries,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET with exponential backoff on transport errors and non-2xx statuses.
    /// Makes at most `1 + http_retries` requests.
    async fn get_latest(&self, ids: &[String]) -> anyhow::Result<String> {
        let url = format!("{}{}", self.endpoint, LATEST_PRICE_PATH);
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids[]", id.as_str())).collect();
        query.push(("parsed", "true"));

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            let outcome = self.client.get(&url).query(&query).send().await;

            let error = match outcome {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.context("failed to read Hermes response body");
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    anyhow::anyhow!("HTTP error! status: {}, body: {}", status.as_u16(), body)
                }
                Err(e) => anyhow::Error::new(e).context("HTTP request failed"),
            };

            if attempt >= self.http_retries {
                return Err(error);
            }
            attempt += 1;
            debug!(
                "Hermes request failed, retrying in {:?} (attempt {}/{}): {:#}",
                backoff, attempt, self.http_retries, error
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

#[async_trait]
impl OffchainPriceClient for HermesClient {
    async fn fetch_latest(&self, ids: &[String]) -> FeedResult<Vec<OffchainQuote>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .get_latest(ids)
            .await
            .map_err(|e| FeedError::upstream(format!("{:#}", e)))?;
        parse_latest(&body, ids)
    }
}

fn normalize_id(id: &str) -> String {
    id.trim_start_matches("0x").to_ascii_lowercase()
}

/// Parse a Hermes latest-price body. Quotes carry the identifier as it was
/// requested so they line up with tracked feeds.
pub fn parse_latest(body: &str, requested: &[String]) -> FeedResult<Vec<OffchainQuote>> {
    let response: HermesResponse = serde_json::from_str(body)
        .map_err(|e| FeedError::Upstream(format!("invalid Hermes response: {}", e)))?;

    let by_normalized: HashMap<String, &String> = requested.iter().map(|id| (normalize_id(id), id)).collect();

    let quotes = response
        .parsed
        .into_iter()
        .filter_map(|feed| {
            let identifier = by_normalized
                .get(&normalize_id(&feed.id))
                .map(|id| id.to_string())
                .unwrap_or_else(|| feed.id.clone());

            match parse_feed(identifier, feed) {
                Ok(quote) => Some(quote),
                Err(e) => {
                    warn!("Skipping malformed Hermes price feed: {:#}", e);
                    None
                }
            }
        })
        .collect();

    Ok(quotes)
}

fn parse_feed(identifier: String, feed: HermesPriceFeed) -> anyhow::Result<OffchainQuote> {
    let magnitude = parse_signed(&feed.price.price).with_context(|| format!("price of {}", feed.id))?;
    let confidence = parse_unsigned(&feed.price.conf).with_context(|| format!("conf of {}", feed.id))?;

    let (ema, ema_confidence) = match &feed.ema_price {
        Some(ema) => (Some(parse_signed(&ema.price)?), Some(parse_unsigned(&ema.conf)?)),
        None => (None, None),
    };

    Ok(OffchainQuote {
        identifier,
        magnitude,
        scale: feed.price.expo,
        confidence,
        publish_time: feed.price.publish_time,
        slot: feed.metadata.and_then(|m| m.slot).unwrap_or_default(),
        ema,
        ema_confidence,
    })
}

fn parse_signed(text: &str) -> anyhow::Result<I256> {
    if text.trim().is_empty() {
        bail!("empty integer");
    }
    text.parse::<I256>().map_err(|e| anyhow::anyhow!("invalid integer {:?}: {}", text, e))
}

fn parse_unsigned(text: &str) -> anyhow::Result<U256> {
    text.parse::<U256>()
        .map_err(|e| anyhow::anyhow!("invalid unsigned integer {:?}: {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"{
        "binary": {"encoding": "hex", "data": ["504e4155"]},
        "parsed": [
            {
                "id": "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
                "price": {"price": "350012345678", "conf": "1500000", "expo": -8, "publish_time": 1700000000},
                "ema_price": {"price": "349900000000", "conf": "1400000", "expo": -8, "publish_time": 1700000000},
                "metadata": {"slot": 123456, "proof_available_time": 1700000001, "prev_publish_time": 1699999999}
            },
            {
                "id": "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43",
                "price": {"price": "-12", "conf": "3", "expo": -2, "publish_time": 1700000005}
            }
        ]
    }"#;

    #[test]
    fn test_parse_latest() {
        let requested = vec![
            "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace".to_string(),
            "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43".to_string(),
        ];

        let quotes = parse_latest(BODY, &requested).unwrap();
        assert_eq!(quotes.len(), 2);

        let eth = &quotes[0];
        assert_eq!(eth.identifier, requested[0]);
        assert_eq!(eth.magnitude, I256::try_from(350_012_345_678i64).unwrap());
        assert_eq!(eth.scale, -8);
        assert_eq!(eth.confidence, U256::from(1_500_000u64));
        assert_eq!(eth.slot, 123_456);
        assert_eq!(eth.ema, Some(I256::try_from(349_900_000_000i64).unwrap()));

        let btc = &quotes[1];
        assert_eq!(btc.identifier, requested[1]);
        assert_eq!(btc.magnitude, I256::try_from(-12i64).unwrap());
        assert_eq!(btc.ema, None);
        assert_eq!(btc.slot, 0);
    }

    #[test]
    fn test_malformed_feed_is_skipped() {
        let body = r#"{"parsed": [
            {"id": "aa", "price": {"price": "not-a-number", "conf": "1", "expo": -8, "publish_time": 1}},
            {"id": "bb", "price": {"price": "5", "conf": "1", "expo": -8, "publish_time": 1}}
        ]}"#;

        let quotes = parse_latest(body, &["bb".to_string()]).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].identifier, "bb");
    }

    #[test]
    fn test_invalid_body() {
        assert!(matches!(parse_latest("<html>", &[]), Err(FeedError::Upstream(_))));
    }

    fn latest_price_route() -> wiremock::MockBuilder {
        Mock::given(method("GET"))
            .and(path(LATEST_PRICE_PATH))
            .and(query_param("parsed", "true"))
    }

    #[tokio::test]
    async fn test_failing_endpoint_is_retried_with_backoff() {
        let server = MockServer::start().await;
        latest_price_route()
            .respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
            .expect(4)
            .mount(&server)
            .await;

        let client = HermesClient::new(server.uri(), Duration::from_secs(1), 3).unwrap();
        let start = std::time::Instant::now();
        let err = client.fetch_latest(&["ff".to_string()]).await.unwrap_err();

        // 100ms + 200ms + 400ms between the four requests
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
        match err {
            FeedError::Upstream(message) => assert!(message.contains("status: 500")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let server = MockServer::start().await;
        latest_price_route()
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        latest_price_route()
            .and(query_param("ids[]", "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let client = HermesClient::new(server.uri(), Duration::from_secs(1), 3).unwrap();
        let requested = vec!["0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace".to_string()];
        let start = std::time::Instant::now();
        let quotes = client.fetch_latest(&requested).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert_eq!(quotes[0].identifier, requested[0]);
        assert_eq!(quotes[0].magnitude, I256::try_from(350_012_345_678i64).unwrap());
    }

    #[tokio::test]
    async fn test_zero_retries_makes_one_request() {
        let server = MockServer::start().await;
        latest_price_route()
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = HermesClient::new(server.uri(), Duration::from_secs(1), 0).unwrap();
        assert!(client.fetch_latest(&["ff".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_request_makes_no_call() {
        let client = HermesClient::new("http://127.0.0.1:1/", Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:1");
        assert!(client.fetch_latest(&[]).await.unwrap().is_empty());
    }
}
