//! Message fingerprints and signed attestation artifacts.
//!
//! Artifacts use the guardian VAA v1 layout:
//! ```text
//! header: version u8 | guardian_set_index u32 | n u8 | n × (index u8, signature [65])
//! body:   timestamp u32 | nonce u32 | emitter_chain u16 | emitter [32]
//!         | sequence u64 | consistency_level u8 | payload ..
//! ```
//! All integers are big-endian. The digest guardians sign is
//! `keccak256(keccak256(body))`.

use alloy::primitives::{hex, keccak256, B256};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::chain::types::Identity;

pub const VAA_VERSION: u8 = 1;
const HEADER_LEN: usize = 6;
const SIGNATURE_LEN: usize = 66;
const BODY_FIXED_LEN: usize = 51;

/// Uniquely identifies one relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageFingerprint {
    pub emitter_chain: u16,
    pub emitter: Identity,
    pub sequence: u64,
}

impl MessageFingerprint {
    /// Emitter address as lowercase hex, as the guardian API expects it.
    pub fn emitter_hex(&self) -> String {
        hex::encode(self.emitter.as_bytes())
    }
}

impl fmt::Display for MessageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.emitter_chain, self.emitter_hex(), self.sequence)
    }
}

/// Errors from the attestation network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    #[error("Attestation transport error: {0}")]
    Transport(String),

    #[error("Attestation request timed out")]
    Timeout,

    #[error("Attestation service returned HTTP {status}")]
    Http { status: u16 },

    #[error("Malformed attestation: {0}")]
    Malformed(String),
}

impl AttestationError {
    /// Whether polling should continue after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            AttestationError::Transport(_) | AttestationError::Timeout => true,
            AttestationError::Http { status } => *status == 429 || *status >= 500,
            AttestationError::Malformed(_) => false,
        }
    }
}

/// One guardian signature over the body digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianSignature {
    pub index: u8,
    pub signature: [u8; 65],
}

/// The observed message as guardians sign it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaaBody {
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
}

impl VaaBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BODY_FIXED_LEN + self.payload.len());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.emitter_chain.to_be_bytes());
        out.extend_from_slice(&self.emitter_address);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(self.consistency_level);
        out.extend_from_slice(&self.payload);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, AttestationError> {
        if bytes.len() < BODY_FIXED_LEN {
            return Err(AttestationError::Malformed(format!(
                "body is {} bytes, need at least {}",
                bytes.len(),
                BODY_FIXED_LEN
            )));
        }
        let mut emitter_address = [0u8; 32];
        emitter_address.copy_from_slice(&bytes[10..42]);
        Ok(Self {
            timestamp: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            nonce: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            emitter_chain: u16::from_be_bytes([bytes[8], bytes[9]]),
            emitter_address,
            sequence: u64::from_be_bytes(bytes[42..50].try_into().unwrap_or_default()),
            consistency_level: bytes[50],
            payload: bytes[BODY_FIXED_LEN..].to_vec(),
        })
    }

    /// Digest signed by the guardians.
    pub fn digest(&self) -> B256 {
        keccak256(keccak256(self.encode()))
    }
}

/// Encode a complete VAA.
pub fn encode_vaa(guardian_set_index: u32, signatures: &[GuardianSignature], body: &VaaBody) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + signatures.len() * SIGNATURE_LEN + BODY_FIXED_LEN);
    out.push(VAA_VERSION);
    out.extend_from_slice(&guardian_set_index.to_be_bytes());
    out.push(signatures.len() as u8);
    for sig in signatures {
        out.push(sig.index);
        out.extend_from_slice(&sig.signature);
    }
    out.extend(body.encode());
    out
}

/// Signed proof that the guardian quorum observed a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationArtifact {
    pub fingerprint: MessageFingerprint,
    /// Raw VAA bytes, carried verbatim.
    pub bytes: Vec<u8>,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub body: VaaBody,
    pub digest: B256,
}

impl AttestationArtifact {
    /// Parse raw VAA bytes and check that they attest `expected`.
    ///
    /// Signatures are carried, not verified.
    pub fn parse(expected: &MessageFingerprint, bytes: Vec<u8>) -> Result<Self, AttestationError> {
        if bytes.len() < HEADER_LEN {
            return Err(AttestationError::Malformed("truncated header".to_string()));
        }
        if bytes[0] != VAA_VERSION {
            return Err(AttestationError::Malformed(format!("unsupported version {}", bytes[0])));
        }
        let guardian_set_index = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let signature_count = bytes[5];
        let body_start = HEADER_LEN + signature_count as usize * SIGNATURE_LEN;
        if bytes.len() < body_start {
            return Err(AttestationError::Malformed(format!(
                "{} signatures declared but only {} bytes present",
                signature_count,
                bytes.len()
            )));
        }

        let body = VaaBody::decode(&bytes[body_start..])?;
        let observed = MessageFingerprint {
            emitter_chain: body.emitter_chain,
            emitter: Identity::new(body.emitter_address),
            sequence: body.sequence,
        };
        if observed != *expected {
            return Err(AttestationError::Malformed(format!(
                "artifact attests {}, expected {}",
                observed, expected
            )));
        }

        let digest = body.digest();
        Ok(Self {
            fingerprint: observed,
            bytes,
            guardian_set_index,
            signature_count,
            body,
            digest,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.body.payload
    }
}
