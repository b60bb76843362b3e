//! Periodic price fetching into the cache
//!
//! Each cycle reads every tracked feed once. On-chain reads run concurrently
//! under a semaphore and go through the failover controller; off-chain feeds
//! are fetched in one batched call. A failing feed is logged and skipped.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use oracle_core::{network_label, FeedError, FeedKey, FeedResult, NetworkId, PriceRecord, PriceSource, PYTH_NETWORK_ID};
use oracle_endpoints::FailoverController;
use crate::feeds::{ChainClient, OffchainPriceClient};
use crate::state::PriceCache;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub fetch_interval: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30),
            max_concurrent_fetches: 10,
        }
    }
}

/// Outcome counts of one fetch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Feeds with no provider to fetch them
    pub skipped: usize,
}

pub struct FetchOrchestrator {
    cache: Arc<PriceCache>,
    failover: Arc<FailoverController>,
    chain_client: Arc<dyn ChainClient>,
    offchain_client: Option<Arc<dyn OffchainPriceClient>>,
    /// Off-chain id -> symbol
    symbols: HashMap<String, String>,
    limiter: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl FetchOrchestrator {
    pub fn new(
        cache: Arc<PriceCache>,
        failover: Arc<FailoverController>,
        chain_client: Arc<dyn ChainClient>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            failover,
            chain_client,
            offchain_client: None,
            symbols: HashMap::new(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            config,
        }
    }

    /// Attach the off-chain provider and the symbols of its feeds
    pub fn with_offchain(mut self, client: Arc<dyn OffchainPriceClient>, symbols: HashMap<String, String>) -> Self {
        self.offchain_client = Some(client);
        self.symbols = symbols;
        self
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Read one aggregator contract and store the result
    pub async fn fetch_feed(&self, network: NetworkId, address: &str) -> FeedResult<PriceRecord> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| FeedError::Upstream("fetch limiter closed".into()))?;

        let round = self
            .failover
            .call_with_failover(network, |transport| {
                let client = Arc::clone(&self.chain_client);
                let address = address.to_string();
                async move { client.latest_round(&transport, &address).await }
            })
            .await?;

        let record: PriceRecord = Arc::new(round.into_price(network, address, Utc::now()));
        self.cache.put(network, &PriceSource::Chainlink, address, Arc::clone(&record));
        debug!(
            "Stored chainlink:{} on {}: {} x 10^{}",
            address,
            network_label(network),
            record.magnitude(),
            record.scale()
        );
        Ok(record)
    }

    /// Fetch every off-chain id in one call; returns how many were stored
    pub async fn fetch_offchain(&self, ids: &[String]) -> FeedResult<usize> {
        let Some(client) = &self.offchain_client else {
            return Ok(0);
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| FeedError::Upstream("fetch limiter closed".into()))?;
        let quotes = client.fetch_latest(ids).await?;

        let observed_at = Utc::now();
        let mut stored = 0;
        for quote in quotes {
            if !ids.contains(&quote.identifier) {
                debug!("Ignoring untracked off-chain quote {}", quote.identifier);
                continue;
            }

            let identifier = quote.identifier.clone();
            let symbol = self.symbols.get(&identifier).cloned();
            let record: PriceRecord = Arc::new(quote.into_price(symbol, observed_at));
            self.cache.put(PYTH_NETWORK_ID, &PriceSource::Pyth, &identifier, record);
            stored += 1;
        }

        Ok(stored)
    }

    /// Fetch every tracked feed once
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let mut onchain: Vec<FeedKey> = Vec::new();
        let mut offchain_ids: Vec<String> = Vec::new();

        for feed in self.cache.feeds() {
            match feed.source {
                PriceSource::Chainlink => onchain.push(feed),
                PriceSource::Pyth if self.offchain_client.is_some() => offchain_ids.push(feed.identifier),
                _ => report.skipped += 1,
            }
        }

        let onchain_fetches = join_all(onchain.iter().map(|feed| async move {
            let result = self.fetch_feed(feed.network, &feed.identifier).await;
            (feed, result)
        }));
        let (onchain_results, offchain_result) = tokio::join!(onchain_fetches, self.fetch_offchain(&offchain_ids));

        for (feed, result) in onchain_results {
            match result {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(
                        "Error fetching price for feed {} on {}: {}",
                        feed.identifier,
                        network_label(feed.network),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        match offchain_result {
            Ok(stored) => {
                report.succeeded += stored;
                report.failed += offchain_ids.len().saturating_sub(stored);
            }
            Err(e) => {
                warn!("Error fetching {} off-chain prices: {}", offchain_ids.len(), e);
                report.failed += offchain_ids.len();
            }
        }

        info!(
            "Fetch cycle complete: {} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        report
    }

    /// Run fetch cycles until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.fetch_interval);
        info!("Starting price fetching every {:?}", self.config.fetch_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    info!("Stopping price fetching");
                    break;
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(shutdown).await })
    }
}
