//! Error types

use thiserror::Error;

use crate::{NetworkId, PriceSource};

/// Substrings that mark an upstream failure worth an immediate endpoint switch
pub const FAILOVER_MARKERS: [&str; 4] = ["-32097", "32097", "execution reverted", "revert"];

/// Whether an upstream error message carries a recognised failover marker
pub fn is_failover_signal(message: &str) -> bool {
    FAILOVER_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Price feed errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("no price data for feed {identifier} on network {network} (source: {price_source})")]
    NotFound {
        network: NetworkId,
        price_source: PriceSource,
        identifier: String,
    },

    #[error("no transport available for network {0}")]
    NoTransport(NetworkId),

    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream error matching one of [`FAILOVER_MARKERS`]
    #[error("upstream error: {0}")]
    FailoverSignal(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FeedError {
    /// Wrap an upstream message, classifying failover signals
    pub fn upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_failover_signal(&message) {
            FeedError::FailoverSignal(message)
        } else {
            FeedError::Upstream(message)
        }
    }

    pub fn is_failover_signal(&self) -> bool {
        matches!(self, FeedError::FailoverSignal(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::NotFound { .. })
    }
}

/// Result type alias
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(FeedError::upstream("rpc error -32097: rate limited").is_failover_signal());
        assert!(FeedError::upstream("execution reverted").is_failover_signal());
        assert!(!FeedError::upstream("connection refused").is_failover_signal());
    }

    #[test]
    fn test_signal_displays_as_upstream() {
        let err = FeedError::upstream("32097: busy");
        assert_eq!(err.to_string(), "upstream error: 32097: busy");
    }
}
