//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → RelaySettings for the orchestrator, adapter configs for clients
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Signer key material never lives in the file; it comes from the
//!   environment only

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AttestationConfig, BackoffStrategy, ChainConfig, ConfirmationConfig, MessageConfig, ObservabilityConfig,
    RelayConfig, ServerConfig, SubmissionConfig,
};
