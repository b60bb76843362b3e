//! Core types and utilities for the oracle price relay
//!
//! This crate provides shared types used across all components:
//! - Network and price source identifiers
//! - Price record kinds and the common record capability
//! - Error taxonomy
//! - Configuration

pub mod types;
pub mod records;
pub mod config;
pub mod errors;

pub use types::*;
pub use records::*;
pub use config::*;
pub use errors::*;
