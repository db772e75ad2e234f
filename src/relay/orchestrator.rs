//! End-to-end relay pipeline.
//!
//! # State Machine
//! ```text
//! Building → Signing → Submitting → ConfirmingFinality
//!     → ExtractingFingerprint → AwaitingAttestation → Done
//!
//! any stage ──error──→ Failed(reason)
//! ```
//!
//! # Design Decisions
//! - No cross-stage retries; each stage owns its retry policy
//! - Cancellation stops polling and retrying at the next suspension
//!   point, but never recalls a submitted transaction
//! - Every transaction of a batch carries one message part, and every
//!   part is fingerprinted and attested; artifacts come back in batch order

use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::attestation::service::AttestationService;
use crate::attestation::types::{AttestationArtifact, MessageFingerprint};
use crate::attestation::waiter::{extract_fingerprint, AttestationWaiter};
use crate::chain::client::ChainClient;
use crate::chain::types::{
    is_transient, ChainError, FinalityRecord, FreshnessToken, Identity, SendOptions,
    SignedTransaction, TransactionId,
};
use crate::chain::wallet::Signer;
use crate::config::{BackoffStrategy, RelayConfig, SubmissionConfig};
use crate::observability::metrics;
use crate::relay::builder::{parse_destination, MessageParams, TransactionBuilder};
use crate::relay::confirmation::ConfirmationWaiter;
use crate::relay::error::RelayError;
use crate::relay::signing::SigningCoordinator;
use crate::relay::submission::SubmissionRetrier;
use crate::resilience::{retry, Backoff, RetryPolicy};

/// Progress of one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "reason", rename_all = "snake_case")]
pub enum RelayStage {
    Building,
    Signing,
    Submitting,
    ConfirmingFinality,
    ExtractingFingerprint,
    AwaitingAttestation,
    Done,
    Failed(String),
}

impl RelayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStage::Building => "building",
            RelayStage::Signing => "signing",
            RelayStage::Submitting => "submitting",
            RelayStage::ConfirmingFinality => "confirming_finality",
            RelayStage::ExtractingFingerprint => "extracting_fingerprint",
            RelayStage::AwaitingAttestation => "awaiting_attestation",
            RelayStage::Done => "done",
            RelayStage::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayStage::Done | RelayStage::Failed(_))
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStage::Failed(reason) => write!(f, "failed: {}", reason),
            stage => f.write_str(stage.as_str()),
        }
    }
}

/// Tunables for every stage of the pipeline.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub emitter_chain: u16,
    pub message: MessageParams,
    pub min_token_validity: Duration,
    pub submit_policy: RetryPolicy,
    pub send_options: SendOptions,
    pub finality_poll_interval: Duration,
    pub finality_timeout: Duration,
    /// Retries for status and log queries.
    pub status_policy: RetryPolicy,
    pub attestation_poll_interval: Duration,
    pub attestation_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        Ok(Self::with_message(config, MessageParams::from_config(&config.message)?))
    }

    fn with_message(config: &RelayConfig, message: MessageParams) -> Self {
        let finality_poll_interval = Duration::from_millis(config.confirmation.poll_interval_ms);
        Self {
            emitter_chain: config.chain.emitter_chain,
            message,
            min_token_validity: Duration::from_secs(config.confirmation.min_token_validity_secs),
            submit_policy: RetryPolicy {
                max_attempts: config.submission.max_attempts,
                backoff: submit_backoff(&config.submission),
                jitter: config.submission.jitter,
            },
            send_options: SendOptions {
                skip_preflight: config.submission.skip_simulation,
                ..SendOptions::default()
            },
            finality_poll_interval,
            finality_timeout: Duration::from_secs(config.confirmation.finality_timeout_secs),
            status_policy: RetryPolicy::fixed(
                config.confirmation.status_max_attempts,
                finality_poll_interval,
            ),
            attestation_poll_interval: Duration::from_millis(config.attestation.poll_interval_ms),
            attestation_timeout: Duration::from_millis(config.attestation.timeout_ms),
        }
    }
}

fn submit_backoff(config: &SubmissionConfig) -> Backoff {
    let base = Duration::from_millis(config.backoff_ms);
    match config.backoff_strategy {
        BackoffStrategy::Fixed => Backoff::Fixed(base),
        BackoffStrategy::Exponential => Backoff::Exponential {
            base,
            max: Duration::from_millis(config.max_backoff_ms),
        },
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::with_message(&RelayConfig::default(), MessageParams::default())
    }
}

/// Sequences the relay stages. The only entry point the API layers use.
pub struct RelayOrchestrator {
    chain: Arc<dyn ChainClient>,
    builder: TransactionBuilder,
    signing: SigningCoordinator,
    submission: SubmissionRetrier,
    confirmation: ConfirmationWaiter,
    attestation: AttestationWaiter,
    settings: RelaySettings,
}

impl RelayOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        attestations: Arc<dyn AttestationService>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            builder: TransactionBuilder::new(settings.message.clone()),
            signing: SigningCoordinator::new(chain.clone(), settings.min_token_validity),
            submission: SubmissionRetrier::new(
                chain.clone(),
                settings.submit_policy,
                settings.send_options,
            ),
            confirmation: ConfirmationWaiter::new(
                chain.clone(),
                settings.finality_poll_interval,
                settings.finality_timeout,
                settings.status_policy,
            ),
            attestation: AttestationWaiter::new(attestations, settings.attestation_poll_interval),
            chain,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Relay `payload` to `destination`, signing with `signer`.
    ///
    /// Returns one artifact per message part, in payload order. A payload
    /// within `max_payload_per_tx` yields exactly one.
    pub async fn relay(
        &self,
        payload: &[u8],
        destination: &str,
        signer: &dyn Signer,
    ) -> Result<Vec<AttestationArtifact>, RelayError> {
        self.relay_with(
            Uuid::new_v4(),
            payload,
            destination,
            signer,
            &|_: &RelayStage| {},
            &CancellationToken::new(),
        )
        .await
    }

    /// Relay with progress reporting and cancellation.
    ///
    /// `observer` sees every stage, ending with `Done` or `Failed`.
    pub async fn relay_with(
        &self,
        relay_id: Uuid,
        payload: &[u8],
        destination: &str,
        signer: &dyn Signer,
        observer: &(dyn Fn(&RelayStage) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Vec<AttestationArtifact>, RelayError> {
        let span = tracing::info_span!("relay", relay_id = %relay_id);

        async move {
            let started = Instant::now();
            tracing::info!(destination, payload_len = payload.len(), "Relay started");

            let result = self.run(payload, destination, signer, observer, cancel).await;
            match &result {
                Ok(artifacts) => {
                    observer(&RelayStage::Done);
                    metrics::record_outcome("done", started);
                    for artifact in artifacts {
                        tracing::info!(
                            fingerprint = %artifact.fingerprint,
                            digest = %artifact.digest,
                            "Message attested"
                        );
                    }
                    tracing::info!(
                        parts = artifacts.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Relay complete"
                    );
                }
                Err(e) => {
                    observer(&RelayStage::Failed(e.to_string()));
                    metrics::record_outcome(e.kind(), started);
                    tracing::error!(error = %e, kind = e.kind(), recovery = ?e.recovery(), "Relay failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Poll again for the attestation of an already finalized message.
    pub async fn resume_attestation(
        &self,
        fingerprint: &MessageFingerprint,
    ) -> Result<AttestationArtifact, RelayError> {
        let span = tracing::info_span!("resume", fingerprint = %fingerprint);
        self.attestation
            .await_attestation(fingerprint, self.settings.attestation_timeout)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        payload: &[u8],
        destination: &str,
        signer: &dyn Signer,
        observer: &(dyn Fn(&RelayStage) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<Vec<AttestationArtifact>, RelayError> {
        observer(&RelayStage::Building);
        if payload.is_empty() {
            return Err(RelayError::InvalidInput("payload is empty".to_string()));
        }
        parse_destination(destination)?;

        let identity = match signer.identity() {
            Some(identity) => identity,
            None => {
                cancellable(cancel, "connecting signer", async {
                    signer.connect().await.map_err(RelayError::from)
                })
                .await?
            }
        };
        let batch = self.builder.build(payload, identity, destination)?;

        observer(&RelayStage::Signing);
        let signed = cancellable(cancel, "signing", self.signing.sign(batch, signer)).await?;

        observer(&RelayStage::Submitting);
        let submissions =
            cancellable(cancel, "submitting", self.submission.submit_all(&signed)).await?;

        observer(&RelayStage::ConfirmingFinality);
        let pending = signed
            .iter()
            .zip(&submissions)
            .map(|(tx, submission)| {
                let token = tx.freshness().cloned().ok_or_else(|| {
                    RelayError::Signing("signed transaction carries no freshness token".to_string())
                })?;
                Ok((submission.transaction_id.clone(), token))
            })
            .collect::<Result<Vec<(TransactionId, FreshnessToken)>, RelayError>>()?;
        let records = cancellable(
            cancel,
            "confirming finality",
            self.confirmation.await_all(&pending),
        )
        .await?;

        observer(&RelayStage::ExtractingFingerprint);
        if records.is_empty() {
            return Err(RelayError::Signing("signer returned an empty batch".to_string()));
        }
        let fingerprints = cancellable(cancel, "extracting fingerprint", async {
            join_all(
                signed
                    .iter()
                    .zip(&records)
                    .map(|(tx, record)| self.fingerprint_for(tx, record)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
        })
        .await?;

        observer(&RelayStage::AwaitingAttestation);
        cancellable(cancel, "awaiting attestation", self.attest_all(&fingerprints)).await
    }

    /// Await the attestation of every part. Fails with the first error in
    /// batch order; the other fingerprints are logged for resumption.
    async fn attest_all(
        &self,
        fingerprints: &[MessageFingerprint],
    ) -> Result<Vec<AttestationArtifact>, RelayError> {
        let timeout = self.settings.attestation_timeout;
        let results = join_all(
            fingerprints
                .iter()
                .map(|fingerprint| self.attestation.await_attestation(fingerprint, timeout)),
        )
        .await;

        if fingerprints.len() > 1 && results.iter().any(Result::is_err) {
            let all: Vec<_> = fingerprints.iter().map(ToString::to_string).collect();
            tracing::warn!(fingerprints = ?all, "Multi-part relay not fully attested");
        }
        results.into_iter().collect()
    }

    async fn fingerprint_for(
        &self,
        tx: &SignedTransaction,
        record: &FinalityRecord,
    ) -> Result<MessageFingerprint, RelayError> {
        let transaction_id = &record.transaction_id;
        let emitter = tx.message().message_emitter().ok_or_else(|| {
            RelayError::FingerprintNotFound {
                transaction_id: transaction_id.clone(),
            }
        })?;
        self.fingerprint_of(transaction_id, emitter).await
    }

    async fn fingerprint_of(
        &self,
        transaction_id: &TransactionId,
        emitter: Identity,
    ) -> Result<MessageFingerprint, RelayError> {
        // Log indexing can trail the finalized status briefly.
        let classifier =
            |e: &ChainError| is_transient(e) || matches!(e, ChainError::TransactionNotFound(_));

        let logs = retry(
            &self.settings.status_policy,
            &classifier,
            "transaction_logs",
            |_| self.chain.transaction_logs(transaction_id),
        )
        .await
        .map_err(|e| RelayError::ChainUnavailable {
            context: "fetching transaction logs",
            transaction_id: Some(transaction_id.clone()),
            attempts: e.attempts(),
            source: e.into_inner(),
        })?
        .value;

        let fingerprint = extract_fingerprint(&logs, self.settings.emitter_chain, emitter)
            .ok_or_else(|| RelayError::FingerprintNotFound {
                transaction_id: transaction_id.clone(),
            })?;
        tracing::info!(
            transaction_id = %transaction_id,
            sequence = fingerprint.sequence,
            emitter = %fingerprint.emitter,
            "Message fingerprint extracted"
        );
        Ok(fingerprint)
    }
}

impl fmt::Debug for RelayOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("settings", &self.settings)
            .finish()
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: &'static str,
    fut: impl Future<Output = Result<T, RelayError>>,
) -> Result<T, RelayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(stage, "Relay cancelled");
            Err(RelayError::Cancelled { stage })
        }
        result = fut => result,
    }
}
