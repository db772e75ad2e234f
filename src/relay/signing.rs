//! Freshness refresh and batched signing.

use std::sync::Arc;
use std::time::Duration;

use crate::chain::client::ChainClient;
use crate::chain::types::{now_ms, SignedTransaction, UnsignedTransaction};
use crate::chain::wallet::Signer;
use crate::relay::error::RelayError;

/// Obtains signatures for a batch from an external signer.
///
/// Never retries: a rejection or disconnect ends the attempt.
pub struct SigningCoordinator {
    chain: Arc<dyn ChainClient>,
    min_token_validity: Duration,
}

impl SigningCoordinator {
    pub fn new(chain: Arc<dyn ChainClient>, min_token_validity: Duration) -> Self {
        Self {
            chain,
            min_token_validity,
        }
    }

    /// Sign `batch` with `signer` in one round.
    ///
    /// Transactions without a token, or whose token has less than
    /// `min_token_validity` left, are bound to a token fetched once for
    /// the whole batch.
    pub async fn sign(
        &self,
        batch: Vec<UnsignedTransaction>,
        signer: &dyn Signer,
    ) -> Result<Vec<SignedTransaction>, RelayError> {
        if batch.is_empty() {
            return Err(RelayError::InvalidInput("nothing to sign".to_string()));
        }
        let identity = signer
            .identity()
            .ok_or_else(|| RelayError::SignerUnavailable("signer is not connected".to_string()))?;

        if let Some(tx) = batch.iter().find(|tx| tx.fee_payer() != identity) {
            return Err(RelayError::Signing(format!(
                "fee payer {} is not the connected identity {}",
                tx.fee_payer(),
                identity
            )));
        }

        let batch = self.refresh_stale(batch).await?;
        let expected = batch.len();

        tracing::info!(identity = %identity, transactions = expected, "Requesting signatures");
        let signed = signer.sign_all(batch).await.map_err(|e| {
            tracing::warn!(error = %e, "Signer refused batch");
            RelayError::from(e)
        })?;

        if signed.len() != expected {
            return Err(RelayError::Signing(format!(
                "signer returned {} transactions for a batch of {}",
                signed.len(),
                expected
            )));
        }
        Ok(signed)
    }

    async fn refresh_stale(
        &self,
        batch: Vec<UnsignedTransaction>,
    ) -> Result<Vec<UnsignedTransaction>, RelayError> {
        let now = now_ms();
        let is_stale = |tx: &UnsignedTransaction| match tx.freshness() {
            None => true,
            Some(token) => token.remaining(now) < self.min_token_validity,
        };

        let stale = batch.iter().filter(|tx| is_stale(*tx)).count();
        if stale == 0 {
            return Ok(batch);
        }

        let token = self.chain.latest_freshness_token().await.map_err(|source| {
            RelayError::ChainUnavailable {
                context: "refreshing freshness token",
                transaction_id: None,
                attempts: 1,
                source,
            }
        })?;
        tracing::debug!(
            stale,
            blockhash = %token.blockhash,
            last_valid_block_height = token.last_valid_block_height,
            "Refreshed freshness token"
        );

        Ok(batch
            .into_iter()
            .map(|tx| {
                if is_stale(&tx) {
                    tx.with_freshness(token.clone())
                } else {
                    tx
                }
            })
            .collect())
    }
}
