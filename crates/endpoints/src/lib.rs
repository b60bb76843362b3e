//! RPC endpoint health monitoring
//!
//! Probes every configured endpoint of a network, keeps the lowest-latency
//! one as the network's live transport and switches away from it as soon as
//! an upstream call fails with a failover signature.

pub mod transport;
pub mod probe;
pub mod selector;
pub mod failover;

pub use transport::{RpcError, Transport};
pub use probe::{EndpointProbe, HttpProber, ProbeResult, Prober};
pub use selector::{select_best, select_best_avoiding, EndpointRecord, EndpointSelector, SelectorConfig};
pub use failover::{FailoverConfig, FailoverController};
