//! Finality polling.
//!
//! # Responsibilities
//! - Poll transaction status until finalized, rejected or expired
//! - Bound the wait by a global finality timeout
//! - Retry transient status-query failures through the shared retry loop
//!
//! # Design Decisions
//! - Only the ledger declares expiry (`TxStatus::Expired`, its block-height
//!   check). The local clock estimate on the token never does, since a
//!   transaction can land right before its window closes
//! - Expiry is terminal here; only a rebuild with a fresh token can
//!   recover, and that is the caller's decision
//! - Running out of time is not expiry: the transaction may still land,
//!   so the caller must verify before retrying
//! - Every terminal `FinalityRecord` is logged before it becomes a result

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

use crate::chain::client::ChainClient;
use crate::chain::types::{
    is_transient, ChainError, FinalityFailure, FinalityRecord, FreshnessToken,
    TransactionId, TxStatus,
};
use crate::observability::metrics;
use crate::relay::error::RelayError;
use crate::resilience::{retry, Classify, RetryPolicy};

/// Waits for submitted transactions to become final.
pub struct ConfirmationWaiter {
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
    finality_timeout: Duration,
    status_policy: RetryPolicy,
    classifier: Arc<dyn Classify<ChainError>>,
}

impl ConfirmationWaiter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        poll_interval: Duration,
        finality_timeout: Duration,
        status_policy: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            poll_interval,
            finality_timeout,
            status_policy,
            classifier: Arc::new(is_transient),
        }
    }

    /// Replace the transient-error predicate used for status queries.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classify<ChainError>>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Wait until `transaction_id` is finalized.
    ///
    /// `token` is the freshness token the transaction was signed with.
    /// Expiry reported by the ledger surfaces as `FinalityExpired`, an
    /// execution error as `ChainRejected`, and a wait longer than the
    /// finality timeout as `FinalityTimeout`.
    pub async fn await_final(
        &self,
        transaction_id: &TransactionId,
        token: &FreshnessToken,
    ) -> Result<FinalityRecord, RelayError> {
        let record = self.poll_until_terminal(transaction_id, token).await?;

        match &record.error {
            None => tracing::info!(
                transaction_id = %record.transaction_id,
                slot = record.slot.unwrap_or_default(),
                polls = record.polls,
                "Transaction finalized"
            ),
            Some(failure) => tracing::warn!(
                transaction_id = %record.transaction_id,
                polls = record.polls,
                failure = ?failure,
                "Transaction did not finalize"
            ),
        }

        into_result(record, self.finality_timeout)
    }

    /// Wait for every transaction of a batch. Partial finality fails.
    pub async fn await_all(
        &self,
        pending: &[(TransactionId, FreshnessToken)],
    ) -> Result<Vec<FinalityRecord>, RelayError> {
        join_all(pending.iter().map(|(id, token)| self.await_final(id, token)))
            .await
            .into_iter()
            .collect()
    }

    async fn poll_until_terminal(
        &self,
        transaction_id: &TransactionId,
        token: &FreshnessToken,
    ) -> Result<FinalityRecord, RelayError> {
        let deadline = Instant::now() + self.finality_timeout;
        let mut polls = 0u32;
        let mut confirmed = false;

        loop {
            polls += 1;
            metrics::record_finality_poll();

            let status = retry(
                &self.status_policy,
                self.classifier.as_ref(),
                "get_status",
                |_| self.chain.get_status(transaction_id, token),
            )
            .await
            .map_err(|e| RelayError::ChainUnavailable {
                context: "polling transaction status",
                transaction_id: Some(transaction_id.clone()),
                attempts: e.attempts(),
                source: e.into_inner(),
            })?
            .value;

            match status {
                TxStatus::Finalized { slot } => {
                    return Ok(FinalityRecord::finalized(transaction_id.clone(), slot, polls))
                }
                TxStatus::Rejected { reason } => {
                    return Ok(FinalityRecord::failed(
                        transaction_id.clone(),
                        FinalityFailure::Rejected { reason },
                        polls,
                    ))
                }
                TxStatus::Expired => return Ok(expired(transaction_id, token, polls)),
                TxStatus::Pending | TxStatus::Confirmed => {
                    confirmed |= status == TxStatus::Confirmed;
                    tracing::debug!(transaction_id = %transaction_id, polls, status = ?status, "Awaiting finality");
                }
            }

            if Instant::now() >= deadline {
                return Ok(FinalityRecord::failed(
                    transaction_id.clone(),
                    FinalityFailure::TimedOut { confirmed },
                    polls,
                ));
            }
            sleep_until((Instant::now() + self.poll_interval).min(deadline)).await;
        }
    }
}

fn expired(transaction_id: &TransactionId, token: &FreshnessToken, polls: u32) -> FinalityRecord {
    FinalityRecord::failed(
        transaction_id.clone(),
        FinalityFailure::Expired {
            last_valid_block_height: token.last_valid_block_height,
        },
        polls,
    )
}

fn into_result(record: FinalityRecord, timeout: Duration) -> Result<FinalityRecord, RelayError> {
    match record.error {
        None => Ok(record),
        Some(FinalityFailure::Expired {
            last_valid_block_height,
        }) => Err(RelayError::FinalityExpired {
            transaction_id: record.transaction_id,
            last_valid_block_height,
            polls: record.polls,
        }),
        Some(FinalityFailure::Rejected { reason }) => Err(RelayError::ChainRejected {
            transaction_id: Some(record.transaction_id),
            reason,
        }),
        Some(FinalityFailure::TimedOut { confirmed }) => Err(RelayError::FinalityTimeout {
            transaction_id: record.transaction_id,
            confirmed,
            timeout,
            polls: record.polls,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::{now_ms, ChainResult, SendOptions, SignedTransaction};
    use crate::relay::error::Recovery;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted status results, then repeats `fallback`.
    struct ScriptedStatus {
        script: Mutex<VecDeque<ChainResult<TxStatus>>>,
        fallback: TxStatus,
        calls: Mutex<u32>,
    }

    impl ScriptedStatus {
        fn new(script: Vec<ChainResult<TxStatus>>) -> Arc<Self> {
            Self::then(script, TxStatus::Pending)
        }

        fn then(script: Vec<ChainResult<TxStatus>>, fallback: TxStatus) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedStatus {
        async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken> {
            unreachable!("not used by confirmation")
        }

        async fn send_raw(&self, _: &SignedTransaction, _: &SendOptions) -> ChainResult<TransactionId> {
            unreachable!("confirmation never submits")
        }

        async fn get_status(&self, _: &TransactionId, _: &FreshnessToken) -> ChainResult<TxStatus> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }

        async fn transaction_logs(&self, _: &TransactionId) -> ChainResult<Vec<String>> {
            unreachable!("not used by confirmation")
        }
    }

    fn token(validity_ms: u64) -> FreshnessToken {
        FreshnessToken {
            blockhash: "hash".to_string(),
            last_valid_block_height: 500,
            expires_at_ms: now_ms() + validity_ms,
        }
    }

    fn waiter(chain: Arc<ScriptedStatus>) -> ConfirmationWaiter {
        waiter_with_timeout(chain, Duration::from_secs(5))
    }

    fn waiter_with_timeout(chain: Arc<ScriptedStatus>, timeout: Duration) -> ConfirmationWaiter {
        ConfirmationWaiter::new(
            chain,
            Duration::from_millis(5),
            timeout,
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        )
    }

    fn id() -> TransactionId {
        TransactionId("tx1".to_string())
    }

    #[tokio::test]
    async fn test_finalized_after_three_polls() {
        let chain = ScriptedStatus::new(vec![
            Ok(TxStatus::Pending),
            Ok(TxStatus::Pending),
            Ok(TxStatus::Finalized { slot: 42 }),
        ]);
        let record = waiter(chain.clone()).await_final(&id(), &token(60_000)).await.unwrap();

        assert!(record.finalized);
        assert_eq!(record.slot, Some(42));
        assert_eq!(record.polls, 3);
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test]
    async fn test_expired_status_is_terminal() {
        let chain = ScriptedStatus::new(vec![
            Ok(TxStatus::Pending),
            Ok(TxStatus::Confirmed),
            Ok(TxStatus::Expired),
        ]);
        let err = waiter(chain).await_final(&id(), &token(60_000)).await.unwrap_err();
        match err {
            RelayError::FinalityExpired { last_valid_block_height, polls, .. } => {
                assert_eq!(last_valid_block_height, 500);
                assert_eq!(polls, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_confirmed_past_local_expiry_is_not_expired() {
        let chain = ScriptedStatus::then(Vec::new(), TxStatus::Confirmed);
        let err = waiter_with_timeout(chain.clone(), Duration::from_millis(60))
            .await_final(&id(), &token(20))
            .await
            .unwrap_err();

        match &err {
            RelayError::FinalityTimeout { transaction_id, confirmed, .. } => {
                assert_eq!(transaction_id, &id());
                assert!(*confirmed);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.recovery(), Recovery::VerifyBeforeRetry);
        assert_eq!(err.transaction_id(), Some(&id()));
        assert!(chain.calls() >= 2);
    }

    #[tokio::test]
    async fn test_finalizes_after_local_expiry() {
        let mut script = vec![Ok(TxStatus::Confirmed); 8];
        script.push(Ok(TxStatus::Finalized { slot: 11 }));
        let chain = ScriptedStatus::new(script);

        let record = waiter(chain).await_final(&id(), &token(1)).await.unwrap();
        assert!(record.finalized);
        assert_eq!(record.polls, 9);
    }

    #[tokio::test]
    async fn test_pending_timeout_is_not_confirmed() {
        let chain = ScriptedStatus::new(Vec::new());
        let err = waiter_with_timeout(chain, Duration::from_millis(20))
            .await_final(&id(), &token(60_000))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::FinalityTimeout { confirmed: false, .. }));
        assert_eq!(err.recovery(), Recovery::VerifyBeforeRetry);
    }

    #[tokio::test]
    async fn test_rejected_is_terminal() {
        let chain = ScriptedStatus::new(vec![Ok(TxStatus::Rejected {
            reason: "InstructionError".to_string(),
        })]);
        let err = waiter(chain).await_final(&id(), &token(60_000)).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::ChainRejected { transaction_id: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_transient_status_errors_retried() {
        let chain = ScriptedStatus::new(vec![
            Err(ChainError::Timeout(1)),
            Err(ChainError::Timeout(1)),
            Ok(TxStatus::Finalized { slot: 7 }),
        ]);
        let record = waiter(chain.clone()).await_final(&id(), &token(60_000)).await.unwrap();
        assert_eq!(record.polls, 1);
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test]
    async fn test_status_retries_exhausted() {
        let chain = ScriptedStatus::new(vec![Err(ChainError::Timeout(1)); 3]);
        let err = waiter(chain).await_final(&id(), &token(60_000)).await.unwrap_err();
        match err {
            RelayError::ChainUnavailable { attempts, transaction_id, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(transaction_id, Some(id()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_await_all_requires_every_transaction() {
        let chain = ScriptedStatus::new(vec![
            Ok(TxStatus::Finalized { slot: 1 }),
            Ok(TxStatus::Rejected { reason: "boom".to_string() }),
        ]);
        let pending = vec![
            (TransactionId("a".to_string()), token(60_000)),
            (TransactionId("b".to_string()), token(60_000)),
        ];
        assert!(waiter(chain).await_all(&pending).await.is_err());
    }
}
