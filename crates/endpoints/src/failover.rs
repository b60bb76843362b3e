//! Immediate endpoint failover
//!
//! When an upstream call fails with a recognised signature, the affected
//! network is re-probed out of cycle and the call is retried on the freshly
//! selected transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use oracle_core::{network_label, FeedError, FeedResult, NetworkId};
use crate::selector::EndpointSelector;
use crate::transport::Transport;

/// Failover configuration
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Pause between a switch and the retry
    pub retry_delay: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct FailoverController {
    selector: Arc<EndpointSelector>,
    config: FailoverConfig,
}

impl FailoverController {
    pub fn new(selector: Arc<EndpointSelector>, config: FailoverConfig) -> Self {
        Self { selector, config }
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Force an out-of-cycle probe and selection for `network`
    pub async fn switch_immediately(&self, network: NetworkId) -> FeedResult<Transport> {
        let current = self.selector.endpoint(network).map(|record| record.url);
        info!(
            "Triggering immediate RPC switch for {} (current: {})",
            network_label(network),
            current.as_deref().unwrap_or("none")
        );

        self.selector
            .refresh_avoiding(network, current.as_deref())
            .await?
            .ok_or(FeedError::NoTransport(network))
    }

    /// Run `op` against the network's transport, switching endpoints and
    /// retrying on failover signals. Makes at most `1 + max_retries` attempts.
    /// If a switch fails, the error that triggered it is returned.
    pub async fn call_with_failover<T, F, Fut>(&self, network: NetworkId, mut op: F) -> FeedResult<T>
    where
        F: FnMut(Transport) -> Fut,
        Fut: Future<Output = FeedResult<T>>,
    {
        let mut transport = self.selector.get_best_transport(network)?;
        let mut attempt: u32 = 1;

        loop {
            let err = match op(transport.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_failover_signal() || attempt > self.config.max_retries {
                return Err(err);
            }

            warn!(
                "Detected failover signal on {} via {} (attempt {}): {}",
                network_label(network),
                transport.url(),
                attempt,
                err
            );

            transport = match self.switch_immediately(network).await {
                Ok(next) => next,
                Err(switch_err) => {
                    warn!(
                        "Failed to switch RPC endpoint for {}: {}",
                        network_label(network),
                        switch_err
                    );
                    return Err(err);
                }
            };

            tokio::time::sleep(self.config.retry_delay).await;
            attempt += 1;
            info!(
                "Retrying on {} with endpoint {} (attempt {})",
                network_label(network),
                transport.url(),
                attempt
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests::ScriptedProber;
    use crate::probe::EndpointProbe;
    use crate::selector::SelectorConfig;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// URLs the operation was invoked with, in order
    #[derive(Default)]
    struct Attempts(Mutex<Vec<String>>);

    impl Attempts {
        fn record(&self, url: &str) -> usize {
            let mut urls = self.0.lock().unwrap();
            urls.push(url.to_string());
            urls.len()
        }

        fn urls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    async fn controller(entries: &[(&str, u64)], endpoints: &[&str], max_retries: u32) -> FailoverController {
        let mut candidates = HashMap::new();
        candidates.insert(42161, endpoints.iter().map(|s| s.to_string()).collect());
        let selector = Arc::new(EndpointSelector::new(
            candidates,
            EndpointProbe::new(Arc::new(ScriptedProber::new(entries)), Duration::from_secs(5)),
            SelectorConfig::default(),
        ));
        selector.refresh(42161).await.unwrap();

        FailoverController::new(
            selector,
            FailoverConfig {
                max_retries,
                retry_delay: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_switches_and_retries_on_signal() {
        let controller = controller(&[("http://a", 10), ("http://b", 30)], &["http://a", "http://b"], 1).await;
        let attempts = Attempts::default();

        let value = controller
            .call_with_failover(42161, |transport| {
                let n = attempts.record(transport.url());
                async move {
                    if n == 1 {
                        Err(FeedError::upstream("-32097: execution reverted"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts.urls(), vec!["http://a", "http://b"]);
        assert_eq!(controller.selector().get_best_transport(42161).unwrap().url(), "http://b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_by_max_retries() {
        let controller = controller(&[("http://a", 10), ("http://b", 30)], &["http://a", "http://b"], 2).await;
        let attempts = Attempts::default();

        let result: FeedResult<()> = controller
            .call_with_failover(42161, |transport| {
                attempts.record(transport.url());
                async { Err(FeedError::upstream("revert")) }
            })
            .await;

        assert!(result.unwrap_err().is_failover_signal());
        assert_eq!(attempts.urls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let controller = controller(&[("http://a", 10), ("http://b", 30)], &["http://a", "http://b"], 3).await;
        let attempts = Attempts::default();

        let result: FeedResult<()> = controller
            .call_with_failover(42161, |transport| {
                attempts.record(transport.url());
                async { Err(FeedError::upstream("connection refused")) }
            })
            .await;

        assert_eq!(result, Err(FeedError::Upstream("connection refused".into())));
        assert_eq!(attempts.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_switch_returns_original_error() {
        // the only endpoint was selected earlier but no longer answers probes
        let mut candidates = HashMap::new();
        candidates.insert(42161, vec!["http://a".to_string()]);
        let selector = Arc::new(EndpointSelector::new(
            candidates,
            EndpointProbe::new(Arc::new(ScriptedProber::new(&[])), Duration::from_secs(5)),
            SelectorConfig::default(),
        ));
        selector.publish(42161, "http://a", Duration::from_millis(10)).unwrap();
        let controller = FailoverController::new(selector, FailoverConfig::default());
        let attempts = Attempts::default();

        let original = FeedError::upstream("-32097: rate limited");
        let result: FeedResult<()> = controller
            .call_with_failover(42161, |transport| {
                attempts.record(transport.url());
                let err = original.clone();
                async move { Err(err) }
            })
            .await;

        assert_eq!(result, Err(original.clone()));
        assert_eq!(attempts.urls().len(), 1);
        assert_eq!(controller.selector().get_best_transport(42161).unwrap().url(), "http://a");
    }

    #[tokio::test]
    async fn test_no_transport_before_selection() {
        let selector = Arc::new(EndpointSelector::new(
            HashMap::new(),
            EndpointProbe::new(Arc::new(ScriptedProber::new(&[])), Duration::from_secs(1)),
            SelectorConfig::default(),
        ));
        let controller = FailoverController::new(selector, FailoverConfig::default());

        let result: FeedResult<()> = controller.call_with_failover(1, |_| async { Ok(()) }).await;
        assert_eq!(result, Err(FeedError::NoTransport(1)));
        assert!(controller.switch_immediately(1).await.is_err());
    }
}
