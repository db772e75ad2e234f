//! Cross-chain relay pipeline.
//!
//! # Data Flow
//! ```text
//! payload + destination
//!     → builder.rs       (UnsignedTransaction batch)
//!     → signing.rs       (fresh token, one signer round)
//!     → submission.rs    (send_raw with bounded retries)
//!     → confirmation.rs  (poll until finalized or expired)
//!     → attestation      (fingerprint, guardian polling)
//!     → one AttestationArtifact per message part
//! ```
//! `orchestrator.rs` sequences the stages; `error.rs` holds the shared
//! error taxonomy and recovery hints.

pub mod builder;
pub mod confirmation;
pub mod error;
pub mod orchestrator;
pub mod signing;
pub mod submission;

pub use builder::{MessageParams, TransactionBuilder};
pub use confirmation::ConfirmationWaiter;
pub use error::{Recovery, RelayError};
pub use orchestrator::{RelayOrchestrator, RelaySettings, RelayStage};
pub use signing::SigningCoordinator;
pub use submission::SubmissionRetrier;
