//! Cross-chain message relay library

pub mod attestation;
pub mod chain;
pub mod config;
pub mod http;
pub mod observability;
pub mod relay;
pub mod resilience;

pub use config::RelayConfig;
pub use http::ApiServer;
pub use relay::{RelayError, RelayOrchestrator, RelayStage};
