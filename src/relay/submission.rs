//! Transaction submission with bounded retries.
//!
//! # Responsibilities
//! - Broadcast each signed transaction through `ChainClient::send_raw`
//! - Retry transient failures with the configured fixed backoff
//! - Fail fast on permanent errors
//! - Tag every failure with the transaction id, known from the signature
//!   before the first send
//!
//! # Design Decisions
//! - Resubmitting the same `SignedTransaction` is safe: its id is derived
//!   from its signature and the ledger deduplicates by it
//! - An unknown blockhash is reported as expiry, since only a rebuild
//!   with a fresh token can fix it

use futures_util::future::join_all;
use std::sync::Arc;

use crate::chain::client::ChainClient;
use crate::chain::types::{
    is_transient, now_ms, ChainError, SendOptions, SignedTransaction, SubmissionResult,
};
use crate::observability::metrics;
use crate::relay::error::RelayError;
use crate::resilience::{retry, Classify, Retried, RetryError, RetryPolicy};

/// Submits signed transactions, retrying transient failures.
pub struct SubmissionRetrier {
    chain: Arc<dyn ChainClient>,
    policy: RetryPolicy,
    classifier: Arc<dyn Classify<ChainError>>,
    options: SendOptions,
}

impl SubmissionRetrier {
    pub fn new(chain: Arc<dyn ChainClient>, policy: RetryPolicy, options: SendOptions) -> Self {
        Self {
            chain,
            policy,
            classifier: Arc::new(is_transient),
            options,
        }
    }

    /// Replace the transient-error predicate.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classify<ChainError>>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit one transaction. `index` is its position in the batch.
    pub async fn submit(
        &self,
        index: usize,
        tx: &SignedTransaction,
    ) -> Result<SubmissionResult, RelayError> {
        let expected_id = tx.transaction_id();
        let id = &expected_id;

        let outcome = retry(&self.policy, self.classifier.as_ref(), "submit", |attempt| async move {
            metrics::record_submit_attempt();
            tracing::debug!(transaction_id = %id, index, attempt, "Submitting transaction");
            self.chain.send_raw(tx, &self.options).await
        })
        .await;

        match outcome {
            Ok(Retried {
                value: transaction_id,
                attempts,
            }) => {
                tracing::info!(transaction_id = %transaction_id, index, attempts, "Transaction accepted");
                Ok(SubmissionResult {
                    transaction_id,
                    submitted_at_ms: now_ms(),
                    attempts,
                })
            }
            Err(RetryError::Exhausted {
                last_error,
                attempts,
            }) => Err(RelayError::SubmissionExhausted {
                index,
                transaction_id: expected_id,
                attempts,
                last_error,
            }),
            Err(RetryError::Permanent {
                error: ChainError::BlockhashNotFound,
                ..
            }) => Err(RelayError::FinalityExpired {
                transaction_id: expected_id,
                last_valid_block_height: tx
                    .freshness()
                    .map(|t| t.last_valid_block_height)
                    .unwrap_or_default(),
                polls: 0,
            }),
            Err(RetryError::Permanent {
                error: ChainError::Rejected(reason),
                ..
            }) => Err(RelayError::ChainRejected {
                transaction_id: Some(expected_id),
                reason,
            }),
            Err(RetryError::Permanent { error, attempts }) => Err(RelayError::ChainUnavailable {
                context: "submitting transaction",
                transaction_id: Some(expected_id),
                attempts,
                source: error,
            }),
        }
    }

    /// Submit a batch concurrently, each transaction retried independently.
    ///
    /// Fails with the first error in batch order. Transactions that were
    /// accepted anyway are logged, since they cannot be recalled.
    pub async fn submit_all(
        &self,
        batch: &[SignedTransaction],
    ) -> Result<Vec<SubmissionResult>, RelayError> {
        let results = join_all(
            batch
                .iter()
                .enumerate()
                .map(|(index, tx)| self.submit(index, tx)),
        )
        .await;

        let mut accepted = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(submission) => accepted.push(submission),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::warn!(error = %e, "Additional submission failure in batch"),
            }
        }

        match first_error {
            None => Ok(accepted),
            Some(err) => {
                if !accepted.is_empty() {
                    let ids: Vec<_> = accepted.iter().map(|s| s.transaction_id.as_str()).collect();
                    tracing::warn!(accepted = ?ids, error = %err, "Batch partially submitted");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::{
        ChainResult, FreshnessToken, Identity, Operation, TransactionId, TxSignature, TxStatus,
        UnsignedTransaction,
    };
    use crate::relay::error::Recovery;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted `send_raw` outcomes, then succeeds.
    #[derive(Default)]
    struct ScriptedSend {
        script: Mutex<VecDeque<ChainError>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSend {
        fn failing(errors: Vec<ChainError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(errors.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedSend {
        async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken> {
            unreachable!("not used by submission")
        }

        async fn send_raw(
            &self,
            tx: &SignedTransaction,
            _options: &SendOptions,
        ) -> ChainResult<TransactionId> {
            *self.calls.lock().unwrap() += 1;
            match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(tx.transaction_id()),
            }
        }

        async fn get_status(&self, _: &TransactionId, _: &FreshnessToken) -> ChainResult<TxStatus> {
            unreachable!("not used by submission")
        }

        async fn transaction_logs(&self, _: &TransactionId) -> ChainResult<Vec<String>> {
            unreachable!("not used by submission")
        }
    }

    fn signed(byte: u8) -> SignedTransaction {
        let payer = Identity::new([1; 32]);
        let tx = UnsignedTransaction::new(
            payer,
            vec![Operation::Transfer { from: payer, to: payer, lamports: byte as u64 }],
        )
        .unwrap()
        .with_freshness(FreshnessToken {
            blockhash: "hash".to_string(),
            last_valid_block_height: 77,
            expires_at_ms: u64::MAX,
        });
        SignedTransaction::new(tx, vec![TxSignature(vec![byte; 64])]).unwrap()
    }

    fn retrier(chain: Arc<ScriptedSend>, max_attempts: u32) -> SubmissionRetrier {
        SubmissionRetrier::new(
            chain,
            RetryPolicy::fixed(max_attempts, Duration::from_millis(1)),
            SendOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let chain = ScriptedSend::failing(vec![ChainError::Timeout(1), ChainError::RateLimited]);
        let result = retrier(chain.clone(), 3).submit(0, &signed(1)).await.unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.transaction_id, signed(1).transaction_id());
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let chain = ScriptedSend::failing(vec![ChainError::Timeout(1); 5]);
        let err = retrier(chain.clone(), 3).submit(2, &signed(1)).await.unwrap_err();

        match &err {
            RelayError::SubmissionExhausted { index, transaction_id, attempts, last_error } => {
                assert_eq!(*index, 2);
                assert_eq!(transaction_id, &signed(1).transaction_id());
                assert_eq!(*attempts, 3);
                assert_eq!(last_error, &ChainError::Timeout(1));
                assert_eq!(err.recovery(), Recovery::VerifyBeforeRetry);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let chain = ScriptedSend::failing(vec![ChainError::Rejected("bad instruction".into())]);
        let err = retrier(chain.clone(), 3).submit(0, &signed(1)).await.unwrap_err();
        assert_eq!(err.transaction_id(), Some(&signed(1).transaction_id()));
        assert!(matches!(err, RelayError::ChainRejected { .. }));
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_blockhash_means_expired() {
        let chain = ScriptedSend::failing(vec![ChainError::BlockhashNotFound]);
        let err = retrier(chain, 3).submit(0, &signed(1)).await.unwrap_err();
        match err {
            RelayError::FinalityExpired { last_valid_block_height, polls, .. } => {
                assert_eq!(last_valid_block_height, 77);
                assert_eq!(polls, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let chain = ScriptedSend::failing(vec![ChainError::Rejected("busy".into())]);
        let classifier: Arc<dyn Classify<ChainError>> =
            Arc::new(|e: &ChainError| matches!(e, ChainError::Rejected(_)));
        let result = retrier(chain.clone(), 2)
            .with_classifier(classifier)
            .submit(0, &signed(1))
            .await
            .unwrap();
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_submit_all_keeps_order() {
        let chain = ScriptedSend::failing(Vec::new());
        let batch = vec![signed(1), signed(2), signed(3)];
        let results = retrier(chain.clone(), 3).submit_all(&batch).await.unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.transaction_id.clone()).collect();
        let expected: Vec<_> = batch.iter().map(|tx| tx.transaction_id()).collect();
        assert_eq!(ids, expected);
        assert_eq!(chain.calls(), 3);
    }
}
