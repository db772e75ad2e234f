//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_submit_attempts_total` (counter): every `send_raw` call
//! - `relay_retries_total` (counter): retries by operation
//! - `relay_finality_polls_total` (counter): status polls
//! - `relay_attestation_polls_total` (counter): attestation polls
//! - `relay_outcomes_total` (counter): finished relays by outcome
//! - `relay_duration_seconds` (histogram): end-to-end relay latency
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus
//! recorder, so library users and tests pay nothing.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_submit_attempt() {
    counter!("relay_submit_attempts_total").increment(1);
}

pub fn record_retry(operation: &'static str) {
    counter!("relay_retries_total", "operation" => operation).increment(1);
}

pub fn record_finality_poll() {
    counter!("relay_finality_polls_total").increment(1);
}

pub fn record_attestation_poll() {
    counter!("relay_attestation_polls_total").increment(1);
}

/// Record a finished relay. `outcome` is `done` or an error kind.
pub fn record_outcome(outcome: &'static str, started: Instant) {
    counter!("relay_outcomes_total", "outcome" => outcome).increment(1);
    histogram!("relay_duration_seconds").record(started.elapsed().as_secs_f64());
}
