//! Retry logic shared by every stage that talks to the network.
//!
//! # Responsibilities
//! - Run an async operation up to `max_attempts` times
//! - Ask an injected classifier whether each failure is transient
//! - Sleep according to the policy's backoff between attempts
//!
//! # Design Decisions
//! - Permanent failures return immediately, without sleeping
//! - Policy and classifier are supplied per call site; this loop knows nothing
//!   about chains or attestations
//! - Attempt counters live on the stack of a single invocation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::observability::metrics;
use crate::resilience::backoff::{with_jitter, Backoff};

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: Backoff,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Fixed-delay policy without jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after failed attempt number `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt);
        if self.jitter {
            with_jitter(delay)
        } else {
            delay
        }
    }
}

/// Decides whether a failure is worth another attempt.
pub trait Classify<E>: Send + Sync {
    fn is_transient(&self, error: &E) -> bool;
}

impl<E, F> Classify<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_transient(&self, error: &E) -> bool {
        self(error)
    }
}

/// A successful value and the attempt it succeeded on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Why the retry loop gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The classifier marked the failure permanent.
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { error: E, attempts: u32 },

    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { last_error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last underlying error.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Run `operation` under `policy`, retrying failures `classifier` deems transient.
///
/// `operation` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    classifier: &dyn Classify<E>,
    operation_name: &'static str,
    mut operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) if !classifier.is_transient(&error) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %error,
                    "Permanent failure, not retrying"
                );
                return Err(RetryError::Permanent {
                    error,
                    attempts: attempt,
                });
            }
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        last_error: error,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_after(attempt);
                tracing::info!(
                    operation = operation_name,
                    attempt,
                    delay = ?delay,
                    error = %error,
                    "Transient failure, retrying"
                );
                metrics::record_retry(operation_name);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
