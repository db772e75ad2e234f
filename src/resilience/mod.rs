//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Network call (send_raw, get_status, transaction_logs):
//!     → retries.rs (classify failure, retry transient ones)
//!     → backoff.rs (fixed or exponential delay, optional jitter)
//! ```
//!
//! # Design Decisions
//! - One retry loop for every stage; each call site injects its own policy
//! - Classification is a predicate over typed errors, never over message text
//! - Timeouts are enforced by the callers with Tokio's timeout facilities

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::{retry, Classify, Retried, RetryError, RetryPolicy};
