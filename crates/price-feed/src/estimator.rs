//! Per-kind memory footprint estimation for cached records
//!
//! A record's size is taken from the first source that knows it:
//! the record itself, a function registered for its concrete type,
//! a built-in formula, or a conservative constant.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use oracle_core::{ChainlinkPrice, PriceInfo, PythPrice};

/// Size assumed for kinds nobody knows how to measure
pub const FALLBACK_RECORD_SIZE: usize = 100;

/// Type-erased size function
pub type SizeFn = Arc<dyn Fn(&dyn PriceInfo) -> usize + Send + Sync>;

/// How a concrete record type gets measured
#[derive(Clone)]
enum Resolution {
    Registered(SizeFn),
    Chainlink,
    Pyth,
    Fallback,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Registered(_) => f.write_str("Registered"),
            Resolution::Chainlink => f.write_str("Chainlink"),
            Resolution::Pyth => f.write_str("Pyth"),
            Resolution::Fallback => f.write_str("Fallback"),
        }
    }
}

#[derive(Default)]
struct Registry {
    registered: HashMap<TypeId, SizeFn>,
    resolved: HashMap<TypeId, Resolution>,
}

/// Registry of size estimators keyed by concrete record type
#[derive(Default)]
pub struct SizeEstimatorRegistry {
    inner: RwLock<Registry>,
}

impl SizeEstimatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the estimator for records of type `T`
    pub fn register<T, F>(&self, estimator: F)
    where
        T: PriceInfo,
        F: Fn(&T) -> usize + Send + Sync + 'static,
    {
        let erased: SizeFn = Arc::new(move |record: &dyn PriceInfo| {
            record
                .as_any()
                .downcast_ref::<T>()
                .map(&estimator)
                .unwrap_or(FALLBACK_RECORD_SIZE)
        });

        let type_id = TypeId::of::<T>();
        let mut inner = self.inner.write();
        inner.registered.insert(type_id, erased);
        inner.resolved.remove(&type_id);
    }

    /// Whether a function is registered for `T`
    pub fn is_registered<T: PriceInfo>(&self) -> bool {
        self.inner.read().registered.contains_key(&TypeId::of::<T>())
    }

    /// Estimated footprint of one record in bytes
    pub fn estimate(&self, record: &dyn PriceInfo) -> usize {
        if let Some(size) = record.estimated_size() {
            return size;
        }

        match self.resolve(record) {
            Resolution::Registered(estimator) => estimator(record),
            Resolution::Chainlink => record
                .as_any()
                .downcast_ref::<ChainlinkPrice>()
                .map(chainlink_size)
                .unwrap_or(FALLBACK_RECORD_SIZE),
            Resolution::Pyth => record
                .as_any()
                .downcast_ref::<PythPrice>()
                .map(pyth_size)
                .unwrap_or(FALLBACK_RECORD_SIZE),
            Resolution::Fallback => FALLBACK_RECORD_SIZE,
        }
    }

    fn resolve(&self, record: &dyn PriceInfo) -> Resolution {
        let type_id = Any::type_id(record.as_any());

        if let Some(resolution) = self.inner.read().resolved.get(&type_id) {
            return resolution.clone();
        }

        let mut inner = self.inner.write();
        // Another writer may have resolved it while the read guard was dropped
        if let Some(resolution) = inner.resolved.get(&type_id) {
            return resolution.clone();
        }

        let resolution = if let Some(estimator) = inner.registered.get(&type_id) {
            Resolution::Registered(Arc::clone(estimator))
        } else if type_id == TypeId::of::<ChainlinkPrice>() {
            Resolution::Chainlink
        } else if type_id == TypeId::of::<PythPrice>() {
            Resolution::Pyth
        } else {
            Resolution::Fallback
        };

        inner.resolved.insert(type_id, resolution.clone());
        resolution
    }
}

impl fmt::Debug for SizeEstimatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SizeEstimatorRegistry")
            .field("registered", &inner.registered.len())
            .field("resolved", &inner.resolved.len())
            .finish()
    }
}

/// Five 32-byte round words, the exponent, network id, timestamp and address
pub fn chainlink_size(price: &ChainlinkPrice) -> usize {
    5 * 32 + 15 + 8 + 8 + price.feed_address.len() + 8
}

pub fn pyth_size(price: &PythPrice) -> usize {
    let symbol = price.symbol.as_deref().map(str::len).unwrap_or(0);
    price.id.len() + 8 + symbol + 8 + 4 * 32 + 8 + 8 + 8 + 15 + 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{I256, U256};
    use chrono::{DateTime, Utc};
    use oracle_core::{NetworkId, PriceSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct MorpherPrice {
        market: String,
        sized: Option<usize>,
    }

    impl PriceInfo for MorpherPrice {
        fn source(&self) -> PriceSource {
            PriceSource::Custom("morpher".into())
        }

        fn network_id(&self) -> NetworkId {
            1
        }

        fn identifier(&self) -> &str {
            &self.market
        }

        fn observed_at(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn magnitude(&self) -> I256 {
            I256::ZERO
        }

        fn scale(&self) -> i32 {
            0
        }

        fn estimated_size(&self) -> Option<usize> {
            self.sized
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn morpher(market: &str) -> MorpherPrice {
        MorpherPrice {
            market: market.into(),
            sized: None,
        }
    }

    fn chainlink(address: &str) -> ChainlinkPrice {
        ChainlinkPrice {
            round_id: U256::from(1u64),
            answer: I256::ONE,
            started_at: U256::ZERO,
            updated_at: U256::ZERO,
            answered_in_round: U256::from(1u64),
            exponent: -8,
            network_id: 1,
            feed_address: address.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_builtin_formulas() {
        let registry = SizeEstimatorRegistry::new();
        assert_eq!(registry.estimate(&chainlink("0xABC")), 160 + 15 + 8 + 8 + 5 + 8);

        let pyth = PythPrice {
            id: "e62df6c8".into(),
            symbol: Some("ETH/USD".into()),
            price: I256::ONE,
            confidence: U256::ZERO,
            exponent: -8,
            publish_time: 0,
            slot: 0,
            network_id: 0,
            ema: None,
            ema_confidence: None,
            timestamp: Utc::now(),
        };
        assert_eq!(registry.estimate(&pyth), 8 + 8 + 7 + 8 + 128 + 47);
    }

    #[test]
    fn test_unknown_kind_uses_fallback() {
        let registry = SizeEstimatorRegistry::new();
        assert_eq!(registry.estimate(&morpher("BTC")), FALLBACK_RECORD_SIZE);
    }

    #[test]
    fn test_registration_replaces_cached_resolution() {
        let registry = SizeEstimatorRegistry::new();
        let record = morpher("BTC");
        assert_eq!(registry.estimate(&record), FALLBACK_RECORD_SIZE);

        registry.register::<MorpherPrice, _>(|p| p.market.len() * 100);
        assert!(registry.is_registered::<MorpherPrice>());
        assert_eq!(registry.estimate(&record), 300);

        registry.register::<MorpherPrice, _>(|_| 42);
        assert_eq!(registry.estimate(&record), 42);
    }

    #[test]
    fn test_registration_overrides_builtin() {
        let registry = SizeEstimatorRegistry::new();
        registry.register::<ChainlinkPrice, _>(|_| 1);
        assert_eq!(registry.estimate(&chainlink("0xABC")), 1);
    }

    #[test]
    fn test_self_reported_size_wins() {
        let registry = SizeEstimatorRegistry::new();
        registry.register::<MorpherPrice, _>(|_| 999);

        let record = MorpherPrice {
            market: "BTC".into(),
            sized: Some(12),
        };
        assert_eq!(registry.estimate(&record), 12);
    }

    #[test]
    fn test_resolution_is_cached_per_type() {
        let registry = SizeEstimatorRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register::<MorpherPrice, _>(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            10
        });

        registry.estimate(&morpher("BTC"));
        registry.estimate(&morpher("ETH"));

        // the function runs per record, the lookup only once per type
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(registry.inner.read().resolved.len(), 1);
    }

    #[test]
    fn test_concurrent_register_and_estimate() {
        use std::thread;

        let registry = Arc::new(SizeEstimatorRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if i == 0 {
                            registry.register::<MorpherPrice, _>(|_| 7);
                        }
                        let size = registry.estimate(&morpher("BTC"));
                        assert!(size == 7 || size == FALLBACK_RECORD_SIZE);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.estimate(&morpher("BTC")), 7);
    }
}
