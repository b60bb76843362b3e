//! Periodic cache and endpoint status logging

use alloy_primitives::I256;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use oracle_core::{network_label, FeedKey};
use oracle_endpoints::{EndpointRecord, EndpointSelector};
use crate::state::{CacheStats, PriceCache};

/// Latest value of one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub feed: FeedKey,
    pub symbol: Option<String>,
    pub magnitude: I256,
    pub scale: i32,
    pub observed_at: DateTime<Utc>,
}

/// Point-in-time view of the relay
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub stats: CacheStats,
    /// Only feeds that currently hold a value
    pub feeds: Vec<FeedStatus>,
    pub endpoints: Vec<EndpointRecord>,
}

impl CacheStatus {
    pub fn usage_percent(&self) -> f64 {
        if self.stats.max_size_bytes == 0 {
            return 100.0;
        }
        self.stats.size_bytes as f64 / self.stats.max_size_bytes as f64 * 100.0
    }
}

pub struct StatusReporter {
    cache: Arc<PriceCache>,
    selector: Option<Arc<EndpointSelector>>,
    symbols: HashMap<FeedKey, String>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(cache: Arc<PriceCache>, interval: Duration) -> Self {
        Self {
            cache,
            selector: None,
            symbols: HashMap::new(),
            interval,
        }
    }

    pub fn with_selector(mut self, selector: Arc<EndpointSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_symbols(mut self, symbols: HashMap<FeedKey, String>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn snapshot(&self) -> CacheStatus {
        let feeds = self
            .cache
            .feeds()
            .into_iter()
            .filter_map(|feed| {
                let record = self.cache.get(feed.network, &feed.source, &feed.identifier).ok()?;
                Some(FeedStatus {
                    symbol: self.symbols.get(&feed).cloned(),
                    magnitude: record.magnitude(),
                    scale: record.scale(),
                    observed_at: record.observed_at(),
                    feed,
                })
            })
            .collect();

        CacheStatus {
            stats: self.cache.stats(),
            feeds,
            endpoints: self.selector.as_ref().map(|s| s.endpoints()).unwrap_or_default(),
        }
    }

    /// Log one status report
    pub fn report(&self) {
        let status = self.snapshot();
        let stats = &status.stats;

        info!(
            "Price cache: {} / {} bytes ({:.1}%), {} feeds tracked, {} with data, {} evicted",
            stats.size_bytes,
            stats.max_size_bytes,
            status.usage_percent(),
            stats.feed_count,
            stats.record_count,
            stats.eviction_count
        );

        for feed in &status.feeds {
            info!(
                "  {} {} on {}: {} x 10^{} (observed {})",
                feed.feed.source,
                feed.symbol.as_deref().unwrap_or(&feed.feed.identifier),
                network_label(feed.feed.network),
                feed.magnitude,
                feed.scale,
                feed.observed_at.format("%H:%M:%S")
            );
        }

        let now = Utc::now();
        for endpoint in &status.endpoints {
            let age = (now - endpoint.last_updated_at).num_seconds();
            info!(
                "  RPC {} -> {} ({:?}, selected {}s ago)",
                network_label(endpoint.network_id),
                endpoint.url,
                endpoint.last_measured_latency,
                age
            );
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        // the first tick completes immediately; nothing to report yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.report(),
                _ = shutdown.changed() => break,
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move { reporter.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::chainlink_record;
    use oracle_core::PriceSource;

    #[test]
    fn test_snapshot_omits_feeds_without_data() {
        let cache = Arc::new(PriceCache::default());
        cache.add_feed(1, &PriceSource::Chainlink, "0xA");
        cache.add_feed(1, &PriceSource::Chainlink, "0xB");
        cache.put(1, &PriceSource::Chainlink, "0xA", chainlink_record(1, "0xA", 5_000_000_000));

        let mut symbols = HashMap::new();
        symbols.insert(FeedKey::new(1, PriceSource::Chainlink, "0xA"), "ETH/USD".to_string());
        let reporter = StatusReporter::new(Arc::clone(&cache), Duration::from_secs(15)).with_symbols(symbols);

        let status = reporter.snapshot();
        assert_eq!(status.feeds.len(), 1);
        assert_eq!(status.feeds[0].feed.identifier, "0xA");
        assert_eq!(status.feeds[0].symbol.as_deref(), Some("ETH/USD"));
        assert_eq!(status.feeds[0].scale, -8);
        assert_eq!(status.stats.feed_count, 2);
        assert_eq!(status.stats.record_count, 1);
        assert!(status.endpoints.is_empty());
        assert!(status.usage_percent() > 0.0 && status.usage_percent() < 1.0);

        reporter.report();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let reporter = Arc::new(StatusReporter::new(
            Arc::new(PriceCache::default()),
            Duration::from_secs(15),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = reporter.spawn(rx);

        tokio::time::sleep(Duration::from_secs(40)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
