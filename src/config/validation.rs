//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts >= 1, intervals and timeouts > 0)
//! - Check URLs, socket addresses and account encodings
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: RelayConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::chain::types::Identity;
use crate::config::schema::RelayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_http_url(&mut errors, "chain.rpc_url", &config.chain.rpc_url);
    for url in &config.chain.failover_urls {
        check_http_url(&mut errors, "chain.failover_urls", url);
    }
    check_positive(&mut errors, "chain.rpc_timeout_secs", config.chain.rpc_timeout_secs);
    check_positive(&mut errors, "chain.token_validity_secs", config.chain.token_validity_secs);

    if config.message.max_payload_per_tx == 0 {
        errors.push(ValidationError::new("message.max_payload_per_tx", "must be greater than zero"));
    }
    if config.message.message_fee_lamports > 0 {
        match &config.message.fee_collector {
            None => errors.push(ValidationError::new(
                "message.fee_collector",
                "required when message_fee_lamports is set",
            )),
            Some(collector) => {
                if let Err(e) = collector.parse::<Identity>() {
                    errors.push(ValidationError::new("message.fee_collector", e.to_string()));
                }
            }
        }
    }

    check_positive(&mut errors, "submission.max_attempts", config.submission.max_attempts as u64);
    if config.submission.max_backoff_ms < config.submission.backoff_ms {
        errors.push(ValidationError::new(
            "submission.max_backoff_ms",
            "must not be smaller than submission.backoff_ms",
        ));
    }

    check_positive(&mut errors, "confirmation.poll_interval_ms", config.confirmation.poll_interval_ms);
    check_positive(&mut errors, "confirmation.finality_timeout_secs", config.confirmation.finality_timeout_secs);
    check_positive(&mut errors, "confirmation.status_max_attempts", config.confirmation.status_max_attempts as u64);
    if config.confirmation.min_token_validity_secs >= config.chain.token_validity_secs {
        errors.push(ValidationError::new(
            "confirmation.min_token_validity_secs",
            "must be smaller than chain.token_validity_secs",
        ));
    }

    check_http_url(&mut errors, "attestation.base_url", &config.attestation.base_url);
    check_positive(&mut errors, "attestation.poll_interval_ms", config.attestation.poll_interval_ms);
    check_positive(&mut errors, "attestation.timeout_ms", config.attestation.timeout_ms);
    check_positive(&mut errors, "attestation.request_timeout_secs", config.attestation.request_timeout_secs);

    if config.observability.metrics_enabled {
        check_socket_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    check_socket_addr(&mut errors, "server.bind_address", &config.server.bind_address);
    check_positive(&mut errors, "server.request_timeout_secs", config.server.request_timeout_secs);
    check_positive(&mut errors, "server.job_retention_secs", config.server.job_retention_secs);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}

fn check_http_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}' in '{}'", url.scheme(), value),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = RelayConfig::default();
        config.chain.rpc_url = "ftp://example.com".to_string();
        config.submission.max_attempts = 0;
        config.server.bind_address = "not-an-address".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["chain.rpc_url", "submission.max_attempts", "server.bind_address"]
        );
    }

    #[test]
    fn test_fee_requires_collector() {
        let mut config = RelayConfig::default();
        config.message.message_fee_lamports = 100;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "message.fee_collector");

        config.message.fee_collector = Some("not base58 0OIl".to_string());
        assert!(validate_config(&config).is_err());

        config.message.fee_collector = Some("11111111111111111111111111111111".to_string());
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_min_validity_below_token_window() {
        let mut config = RelayConfig::default();
        config.confirmation.min_token_validity_secs = config.chain.token_validity_secs;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "confirmation.min_token_validity_secs");
    }
}
