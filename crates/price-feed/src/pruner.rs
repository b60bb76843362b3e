//! Size-bound enforcement for the price cache

use std::fmt;
use tracing::{info, warn};

use oracle_core::{FeedKey, NetworkId};
use crate::estimator::SizeEstimatorRegistry;
use crate::state::CacheState;

/// A stored record the pruner may evict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub network: NetworkId,
    /// Prefixed identifier
    pub key: String,
    pub written_seq: u64,
    /// Accounted bytes freed by evicting this record
    pub size: usize,
}

/// Decides which records go first when the cache is over its cap
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Sort `candidates` so the first element is evicted first
    fn order(&self, candidates: &mut [EvictionCandidate]);
}

/// Evicts the records written longest ago, across all networks
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyUpdated;

impl EvictionPolicy for LeastRecentlyUpdated {
    fn name(&self) -> &'static str {
        "least-recently-updated"
    }

    fn order(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by_key(|c| c.written_seq);
    }
}

/// Result of one pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub evicted: Vec<FeedKey>,
    pub size_before: usize,
    pub size_after: usize,
}

#[derive(Debug)]
pub struct Pruner {
    max_size_bytes: usize,
    policy: Box<dyn EvictionPolicy>,
}

impl Pruner {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_policy(max_size_bytes, LeastRecentlyUpdated)
    }

    pub fn with_policy(max_size_bytes: usize, policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            max_size_bytes,
            policy: Box::new(policy),
        }
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn policy(&self) -> &dyn EvictionPolicy {
        self.policy.as_ref()
    }

    /// Evict records until the cache fits its cap. `protect` names the entry
    /// that must survive this pass. The caller holds the cache's write guard.
    pub(crate) fn prune(
        &self,
        state: &mut CacheState,
        estimator: &SizeEstimatorRegistry,
        protect: Option<(NetworkId, &str)>,
    ) -> PruneOutcome {
        let size_before = state.total_size(estimator);
        if size_before <= self.max_size_bytes {
            return PruneOutcome {
                evicted: Vec::new(),
                size_before,
                size_after: size_before,
            };
        }

        let mut candidates: Vec<EvictionCandidate> = state
            .networks
            .iter()
            .flat_map(|(network, slot)| {
                slot.entries.iter().map(move |(key, entry)| EvictionCandidate {
                    network: *network,
                    key: key.clone(),
                    written_seq: entry.written_seq,
                    size: CacheState::entry_size(key, &entry.record, estimator),
                })
            })
            .filter(|c| protect != Some((c.network, c.key.as_str())))
            .collect();
        self.policy.order(&mut candidates);

        let mut size = size_before;
        let mut evicted = Vec::new();
        for candidate in candidates {
            if size <= self.max_size_bytes {
                break;
            }
            let Some(slot) = state.networks.get_mut(&candidate.network) else {
                continue;
            };
            if slot.entries.remove(&candidate.key).is_some() {
                size = size.saturating_sub(candidate.size);
                if let Some(feed) = slot.feeds.get(&candidate.key) {
                    evicted.push(feed.clone());
                }
            }
        }

        if !evicted.is_empty() {
            info!(
                "Pruned {} records from price cache ({}): {} -> {} bytes, cap {}",
                evicted.len(),
                self.policy.name(),
                size_before,
                size,
                self.max_size_bytes
            );
        }
        if size > self.max_size_bytes {
            warn!(
                "Price cache still over limit after pruning: {} of {} bytes",
                size, self.max_size_bytes
            );
        }

        PruneOutcome {
            evicted,
            size_before,
            size_after: size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::chainlink_record;
    use crate::state::PriceCache;
    use oracle_core::PriceSource;
    use std::sync::Arc;

    /// Evicts the most recent writes first
    #[derive(Debug)]
    struct NewestFirst;

    impl EvictionPolicy for NewestFirst {
        fn name(&self) -> &'static str {
            "newest-first"
        }

        fn order(&self, candidates: &mut [EvictionCandidate]) {
            candidates.sort_by_key(|c| std::cmp::Reverse(c.written_seq));
        }
    }

    fn candidate(key: &str, written_seq: u64) -> EvictionCandidate {
        EvictionCandidate {
            network: 1,
            key: key.into(),
            written_seq,
            size: 10,
        }
    }

    #[test]
    fn test_lru_orders_by_write_sequence() {
        let mut candidates = vec![candidate("c", 9), candidate("a", 2), candidate("b", 5)];
        LeastRecentlyUpdated.order(&mut candidates);

        let keys: Vec<_> = candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_eviction_spans_networks() {
        let estimator = Arc::new(SizeEstimatorRegistry::new());
        let sizing = PriceCache::with_parts(Arc::clone(&estimator), Pruner::new(usize::MAX));
        sizing.put(1, &PriceSource::Chainlink, "0xA", chainlink_record(1, "0xA", 1));
        sizing.put(2, &PriceSource::Chainlink, "0xB", chainlink_record(2, "0xB", 1));
        let full = sizing.cache_size();

        // one byte short of holding both records
        let cache = PriceCache::with_parts(estimator, Pruner::new(full - 1));
        cache.put(1, &PriceSource::Chainlink, "0xA", chainlink_record(1, "0xA", 1));
        cache.put(2, &PriceSource::Chainlink, "0xB", chainlink_record(2, "0xB", 1));

        assert!(cache.get(1, &PriceSource::Chainlink, "0xA").is_err());
        assert!(cache.get(2, &PriceSource::Chainlink, "0xB").is_ok());
        assert_eq!(cache.tracked_feeds(1).len(), 1);
    }

    #[test]
    fn test_custom_policy() {
        let estimator = Arc::new(SizeEstimatorRegistry::new());
        let cache = PriceCache::with_parts(estimator, Pruner::with_policy(0, NewestFirst));
        assert_eq!(cache.max_size_bytes(), 0);

        cache.put(1, &PriceSource::Chainlink, "0xA", chainlink_record(1, "0xA", 1));
        cache.put(1, &PriceSource::Chainlink, "0xB", chainlink_record(1, "0xB", 1));
        cache.put(1, &PriceSource::Chainlink, "0xC", chainlink_record(1, "0xC", 1));

        // every pass can only evict what the previous write left behind
        assert!(cache.get(1, &PriceSource::Chainlink, "0xC").is_ok());
        assert_eq!(cache.stats().record_count, 1);
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.stats().record_count, 0);
    }
}
