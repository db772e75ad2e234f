//! Relay error taxonomy.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::attestation::types::MessageFingerprint;
use crate::chain::types::{ChainError, TransactionId};
use crate::chain::wallet::SignerError;

/// What the caller should do after a failed relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Correct the payload or destination.
    FixInput,
    /// Connect or approve in the wallet, then start over.
    UserAction,
    /// Start a new relay; it will be built with a fresh token.
    RebuildAndResubmit,
    /// The message is final; call `resume_attestation` with the fingerprint.
    RepollAttestation,
    /// Infrastructure trouble; try again later.
    RetryLater,
    /// A transaction may have landed; check the ledger before starting over.
    VerifyBeforeRetry,
    /// Terminal.
    None,
}

/// Errors surfaced by `RelayOrchestrator`.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("Signing rejected by user")]
    UserRejected,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Submission of transaction #{index} ({transaction_id}) failed after {attempts} attempts: {last_error}")]
    SubmissionExhausted {
        index: usize,
        transaction_id: TransactionId,
        attempts: u32,
        last_error: ChainError,
    },

    #[error("Transaction {transaction_id} expired at block height {last_valid_block_height} after {polls} polls")]
    FinalityExpired {
        transaction_id: TransactionId,
        last_valid_block_height: u64,
        polls: u32,
    },

    #[error("Transaction {transaction_id} not final after {timeout:?} ({polls} polls, confirmed: {confirmed})")]
    FinalityTimeout {
        transaction_id: TransactionId,
        confirmed: bool,
        timeout: Duration,
        polls: u32,
    },

    #[error("Transaction {} rejected: {reason}", display_id(.transaction_id))]
    ChainRejected {
        transaction_id: Option<TransactionId>,
        reason: String,
    },

    #[error("Ledger unavailable while {context} after {attempts} attempts: {source}")]
    ChainUnavailable {
        context: &'static str,
        transaction_id: Option<TransactionId>,
        attempts: u32,
        #[source]
        source: ChainError,
    },

    #[error("No message sequence in logs of transaction {transaction_id}")]
    FingerprintNotFound { transaction_id: TransactionId },

    #[error("Attestation for {fingerprint} not available after {timeout:?} ({polls} polls)")]
    AttestationTimeout {
        fingerprint: MessageFingerprint,
        timeout: Duration,
        polls: u32,
    },

    #[error("Attestation for {fingerprint} failed: {reason}")]
    Attestation {
        fingerprint: MessageFingerprint,
        reason: String,
    },

    #[error("Relay cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

fn display_id(id: &Option<TransactionId>) -> String {
    id.as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<unsubmitted>".to_string())
}

impl RelayError {
    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::SignerUnavailable(_) => "signer_unavailable",
            RelayError::UserRejected => "user_rejected",
            RelayError::Signing(_) => "signing",
            RelayError::SubmissionExhausted { .. } => "submission_exhausted",
            RelayError::FinalityExpired { .. } => "finality_expired",
            RelayError::FinalityTimeout { .. } => "finality_timeout",
            RelayError::ChainRejected { .. } => "chain_rejected",
            RelayError::ChainUnavailable { .. } => "chain_unavailable",
            RelayError::FingerprintNotFound { .. } => "fingerprint_not_found",
            RelayError::AttestationTimeout { .. } => "attestation_timeout",
            RelayError::Attestation { .. } => "attestation",
            RelayError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            RelayError::InvalidInput(_) => Recovery::FixInput,
            RelayError::SignerUnavailable(_) | RelayError::UserRejected => Recovery::UserAction,
            RelayError::Signing(_) => Recovery::RetryLater,
            // An earlier attempt may have reached the ledger before timing out.
            RelayError::SubmissionExhausted {
                attempts,
                last_error,
                ..
            } if *attempts > 1 || matches!(last_error, ChainError::Timeout(_)) => {
                Recovery::VerifyBeforeRetry
            }
            RelayError::SubmissionExhausted { .. } => Recovery::RetryLater,
            RelayError::FinalityExpired { .. } => Recovery::RebuildAndResubmit,
            RelayError::FinalityTimeout { .. } => Recovery::VerifyBeforeRetry,
            RelayError::ChainRejected { .. } => Recovery::None,
            RelayError::ChainUnavailable {
                transaction_id: Some(_),
                ..
            } => Recovery::VerifyBeforeRetry,
            RelayError::ChainUnavailable { .. } => Recovery::RetryLater,
            RelayError::FingerprintNotFound { .. } => Recovery::None,
            RelayError::AttestationTimeout { .. } => Recovery::RepollAttestation,
            RelayError::Attestation { .. } => Recovery::None,
            RelayError::Cancelled { .. } => Recovery::VerifyBeforeRetry,
        }
    }

    /// Transaction the error refers to, when one was submitted.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            RelayError::SubmissionExhausted { transaction_id, .. }
            | RelayError::FinalityExpired { transaction_id, .. }
            | RelayError::FinalityTimeout { transaction_id, .. }
            | RelayError::FingerprintNotFound { transaction_id } => Some(transaction_id),
            RelayError::ChainRejected { transaction_id, .. }
            | RelayError::ChainUnavailable { transaction_id, .. } => transaction_id.as_ref(),
            _ => None,
        }
    }

    /// Fingerprint the error refers to, when the message is already final.
    pub fn fingerprint(&self) -> Option<&MessageFingerprint> {
        match self {
            RelayError::AttestationTimeout { fingerprint, .. }
            | RelayError::Attestation { fingerprint, .. } => Some(fingerprint),
            _ => None,
        }
    }
}

impl From<SignerError> for RelayError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::NotConnected => RelayError::SignerUnavailable(err.to_string()),
            SignerError::UserRejected => RelayError::UserRejected,
            SignerError::Other(reason) => RelayError::Signing(reason),
        }
    }
}
