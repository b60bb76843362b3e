//! Concrete provider clients

pub mod chainlink;
pub mod pyth;

pub use chainlink::JsonRpcChainClient;
pub use pyth::HermesClient;
