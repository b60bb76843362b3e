//! Multi-source, size-bounded price cache
//!
//! Keeps the latest record per `(network, source, identifier)`. Identifiers
//! are namespaced by source internally so different providers never collide.
//! All state sits behind one lock; a write and the pruning it triggers happen
//! under the same guard.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use oracle_core::{
    network_label, prefixed_identifier, FeedError, FeedKey, FeedResult, NetworkId, PriceRecord, PriceSource,
    DEFAULT_MAX_CACHE_SIZE_BYTES,
};
use crate::estimator::SizeEstimatorRegistry;
use crate::pruner::Pruner;

/// Fixed overhead per network and per key
const NETWORK_OVERHEAD: usize = 8;
const KEY_OVERHEAD: usize = 8;

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub record: PriceRecord,
    /// Position in the global write order
    pub written_seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct NetworkSlot {
    /// Registered feeds by prefixed identifier
    pub feeds: BTreeMap<String, FeedKey>,
    /// Latest record by prefixed identifier
    pub entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub networks: HashMap<NetworkId, NetworkSlot>,
    next_seq: u64,
}

impl CacheState {
    fn slot_mut(&mut self, network: NetworkId) -> &mut NetworkSlot {
        self.networks.entry(network).or_default()
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Accounted size of one stored record
    pub fn entry_size(key: &str, record: &PriceRecord, estimator: &SizeEstimatorRegistry) -> usize {
        key.len() + KEY_OVERHEAD + estimator.estimate(record.as_ref())
    }

    /// Estimated footprint of the whole cache
    pub fn total_size(&self, estimator: &SizeEstimatorRegistry) -> usize {
        self.networks
            .values()
            .map(|slot| {
                let entries: usize = slot
                    .entries
                    .iter()
                    .map(|(key, entry)| Self::entry_size(key, &entry.record, estimator))
                    .sum();
                let feeds: usize = slot.feeds.keys().map(|key| key.len() + KEY_OVERHEAD).sum();
                NETWORK_OVERHEAD + entries + feeds
            })
            .sum()
    }
}

/// Price cache with lock-guarded state
#[derive(Debug)]
pub struct PriceCache {
    state: RwLock<CacheState>,
    estimator: Arc<SizeEstimatorRegistry>,
    pruner: Pruner,

    /// Stats
    update_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl PriceCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self::with_parts(Arc::new(SizeEstimatorRegistry::new()), Pruner::new(max_size_bytes))
    }

    pub fn with_parts(estimator: Arc<SizeEstimatorRegistry>, pruner: Pruner) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            estimator,
            pruner,
            update_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    pub fn estimator(&self) -> &Arc<SizeEstimatorRegistry> {
        &self.estimator
    }

    pub fn max_size_bytes(&self) -> usize {
        self.pruner.max_size_bytes()
    }

    /// Start tracking a feed; no-op if it is already tracked
    pub fn add_feed(&self, network: NetworkId, source: &PriceSource, identifier: &str) {
        let key = prefixed_identifier(source, identifier);
        let mut state = self.state.write();
        let slot = state.slot_mut(network);

        if !slot.feeds.contains_key(&key) {
            slot.feeds.insert(key, FeedKey::new(network, source.clone(), identifier));
            debug!("Tracking {}:{} on {}", source, identifier, network_label(network));
        }
    }

    /// Latest record of a feed
    pub fn get(&self, network: NetworkId, source: &PriceSource, identifier: &str) -> FeedResult<PriceRecord> {
        let key = prefixed_identifier(source, identifier);
        let state = self.state.read();

        state
            .networks
            .get(&network)
            .and_then(|slot| slot.entries.get(&key))
            .map(|entry| Arc::clone(&entry.record))
            .ok_or_else(|| FeedError::NotFound {
                network,
                price_source: source.clone(),
                identifier: identifier.to_string(),
            })
    }

    /// Every record of a network keyed by prefixed identifier
    pub fn get_all(&self, network: NetworkId) -> HashMap<String, PriceRecord> {
        let state = self.state.read();
        state
            .networks
            .get(&network)
            .map(|slot| {
                slot.entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), Arc::clone(&entry.record)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records of one source on a network keyed by bare identifier
    pub fn get_all_by_source(&self, network: NetworkId, source: &PriceSource) -> HashMap<String, PriceRecord> {
        let prefix = source.prefix();
        let state = self.state.read();

        let Some(slot) = state.networks.get(&network) else {
            return HashMap::new();
        };

        slot.entries
            .iter()
            .filter_map(|(key, entry)| {
                key.strip_prefix(prefix.as_str())
                    .map(|identifier| (identifier.to_string(), Arc::clone(&entry.record)))
            })
            .collect()
    }

    /// Store the latest record of a feed, registering the feed if needed,
    /// then prune if the cache grew past its cap
    pub fn put(&self, network: NetworkId, source: &PriceSource, identifier: &str, record: PriceRecord) {
        let key = prefixed_identifier(source, identifier);
        let mut state = self.state.write();
        let written_seq = state.next_seq();

        let slot = state.slot_mut(network);
        slot.feeds
            .entry(key.clone())
            .or_insert_with(|| FeedKey::new(network, source.clone(), identifier));
        slot.entries.insert(key.clone(), CacheEntry { record, written_seq });
        self.update_count.fetch_add(1, Ordering::Relaxed);

        let outcome = self.pruner.prune(&mut state, &self.estimator, Some((network, key.as_str())));
        if !outcome.evicted.is_empty() {
            self.eviction_count
                .fetch_add(outcome.evicted.len() as u64, Ordering::Relaxed);
        }
    }

    /// Every registered feed, ordered by network then prefixed identifier
    pub fn feeds(&self) -> Vec<FeedKey> {
        let state = self.state.read();
        let mut networks: Vec<_> = state.networks.keys().copied().collect();
        networks.sort_unstable();

        networks
            .into_iter()
            .filter_map(|network| state.networks.get(&network))
            .flat_map(|slot| slot.feeds.values().cloned())
            .collect()
    }

    /// Registered feeds of one network
    pub fn tracked_feeds(&self, network: NetworkId) -> Vec<FeedKey> {
        let state = self.state.read();
        state
            .networks
            .get(&network)
            .map(|slot| slot.feeds.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Estimated memory footprint in bytes
    pub fn cache_size(&self) -> usize {
        self.state.read().total_size(&self.estimator)
    }

    /// Run the pruner now; returns the number of evicted records
    pub fn prune(&self) -> usize {
        let mut state = self.state.write();
        let outcome = self.pruner.prune(&mut state, &self.estimator, None);
        drop(state);

        let evicted = outcome.evicted.len();
        self.eviction_count.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Stats
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            network_count: state.networks.len(),
            feed_count: state.networks.values().map(|s| s.feeds.len()).sum(),
            record_count: state.networks.values().map(|s| s.entries.len()).sum(),
            update_count: self.update_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            size_bytes: state.total_size(&self.estimator),
            max_size_bytes: self.max_size_bytes(),
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_SIZE_BYTES)
    }
}

/// Statistics about the price cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub network_count: usize,
    pub feed_count: usize,
    pub record_count: usize,
    pub update_count: u64,
    pub eviction_count: u64,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
}
