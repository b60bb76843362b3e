//! Price cache and fetch pipeline
//!
//! Features:
//! - Multi-source cache keyed by network, source and identifier
//! - Pluggable per-kind size estimation and bounded memory
//! - Chainlink reads with immediate endpoint failover
//! - Batched Pyth Hermes reads
//! - Periodic status reporting

pub mod estimator;
pub mod pruner;
pub mod state;
pub mod feeds;
pub mod clients;
pub mod orchestrator;
pub mod status;

pub use estimator::{SizeEstimatorRegistry, FALLBACK_RECORD_SIZE};
pub use pruner::{EvictionCandidate, EvictionPolicy, LeastRecentlyUpdated, PruneOutcome, Pruner};
pub use state::{CacheStats, PriceCache};
pub use feeds::{ChainClient, OffchainPriceClient, OffchainQuote, RoundData};
pub use clients::{HermesClient, JsonRpcChainClient};
pub use orchestrator::{CycleReport, FetchOrchestrator, OrchestratorConfig};
pub use status::{CacheStatus, FeedStatus, StatusReporter};
