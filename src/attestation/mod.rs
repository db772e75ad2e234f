//! Attestation subsystem.
//!
//! # Data Flow
//! ```text
//! finalized transaction logs
//!     → waiter.rs (extract_fingerprint)
//!     → MessageFingerprint (emitter_chain, emitter, sequence)
//!     → service.rs (AttestationService::poll, guardian REST)
//!     → types.rs (VAA parsing and digest)
//!     → AttestationArtifact
//! ```

pub mod service;
pub mod types;
pub mod waiter;

pub use service::{AttestationService, GuardianRestClient};
pub use types::{AttestationArtifact, AttestationError, MessageFingerprint};
pub use waiter::{extract_fingerprint, AttestationWaiter};
