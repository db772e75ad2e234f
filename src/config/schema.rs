//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::chain::types::{Commitment, FinalityLevel};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Source ledger RPC settings.
    pub chain: ChainConfig,

    /// Message publication parameters.
    pub message: MessageConfig,

    /// Submission retry settings.
    pub submission: SubmissionConfig,

    /// Finality polling settings.
    pub confirmation: ConfirmationConfig,

    /// Attestation network settings.
    pub attestation: AttestationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// HTTP API settings.
    pub server: ServerConfig,
}

/// Source ledger RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs, tried in order.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Commitment used for blockhash and status queries.
    pub commitment: Commitment,

    /// Attestation-network chain id of the source ledger.
    pub emitter_chain: u16,

    /// Estimated wall-clock validity of a freshly fetched blockhash.
    pub token_validity_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
            commitment: Commitment::Finalized,
            emitter_chain: 1,
            token_validity_secs: 60,
        }
    }
}

/// Parameters of the message-publishing transaction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Message nonce. Batched parts use `nonce + index`.
    pub nonce: u32,

    /// Finality the attestation network waits for before observing.
    pub finality: FinalityLevel,

    /// Largest payload carried by a single transaction.
    pub max_payload_per_tx: usize,

    /// Bridge fee paid per message, in lamports. Zero disables the transfer.
    pub message_fee_lamports: u64,

    /// Fee collector account (base58). Required when a fee is set.
    pub fee_collector: Option<String>,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            nonce: 0,
            finality: FinalityLevel::Finalized,
            max_payload_per_tx: 900,
            message_fee_lamports: 0,
            fee_collector: None,
        }
    }
}

/// Submission retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Maximum `send_raw` attempts per transaction.
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds; the first delay when
    /// backoff is exponential.
    pub backoff_ms: u64,

    /// Delay schedule between attempts.
    pub backoff_strategy: BackoffStrategy,

    /// Cap on exponential delays in milliseconds.
    pub max_backoff_ms: u64,

    /// Add up to 10% random jitter to the delay.
    pub jitter: bool,

    /// Submit without simulating first.
    ///
    /// Lower latency, but a failing program is only reported once the
    /// transaction is polled, instead of being refused at submission.
    pub skip_simulation: bool,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
            backoff_strategy: BackoffStrategy::Fixed,
            max_backoff_ms: 30_000,
            jitter: false,
            skip_simulation: true,
        }
    }
}

/// Submission delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// Finality polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Delay between status polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for finality, in seconds. The freshness
    /// token's expiry usually ends the wait first.
    pub finality_timeout_secs: u64,

    /// Tokens with less remaining validity are refreshed before signing.
    pub min_token_validity_secs: u64,

    /// Attempts per status query when the RPC fails transiently.
    pub status_max_attempts: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            finality_timeout_secs: 120,
            min_token_validity_secs: 20,
            status_max_attempts: 3,
        }
    }
}

/// Attestation network configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Guardian REST API base URL.
    pub base_url: String,

    /// Delay between polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Give up after this many milliseconds.
    pub timeout_ms: u64,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://wormhole-v2-testnet-api.certus.one".to_string(),
            poll_interval_ms: 3000,
            timeout_ms: 60_000,
            request_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8090").
    pub bind_address: String,

    /// Per-request timeout in seconds. Relays run in the background, so
    /// this only bounds the API calls themselves.
    pub request_timeout_secs: u64,

    /// How long a finished relay stays queryable, in seconds.
    pub job_retention_secs: u64,

    /// Finished relays kept at most; the oldest are dropped first.
    pub max_finished_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            request_timeout_secs: 10,
            job_retention_secs: 3600,
            max_finished_jobs: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.submission.max_attempts, 3);
        assert_eq!(config.submission.backoff_ms, 2000);
        assert!(config.submission.skip_simulation);
        assert_eq!(config.attestation.timeout_ms, 60_000);
        assert_eq!(config.message.nonce, 0);
        assert_eq!(config.message.finality, FinalityLevel::Finalized);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [submission]
            max_attempts = 5

            [message]
            finality = "confirmed"
            "#,
        )
        .unwrap();

        assert_eq!(config.submission.max_attempts, 5);
        assert_eq!(config.submission.backoff_ms, 2000);
        assert_eq!(config.message.finality, FinalityLevel::Confirmed);
        assert_eq!(config.chain.commitment, Commitment::Finalized);
    }
}
