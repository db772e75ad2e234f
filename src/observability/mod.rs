//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay stages produce:
//!     → logging.rs (structured log events inside a per-relay span)
//!     → metrics.rs (counters and a latency histogram)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every relay carries a UUID relay id in its span
//! - Transaction ids, attempts and sequences are logged as fields, not text

pub mod logging;
pub mod metrics;
