//! Ledger value types and error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Accepted length range of a base58-encoded account key.
pub const ADDRESS_MIN_LEN: usize = 32;
pub const ADDRESS_MAX_LEN: usize = 44;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reasons an account key string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address length {0} outside 32..=44")]
    Length(usize),

    #[error("invalid base58 character '{0}'")]
    Charset(char),

    #[error("address decodes to {0} bytes, expected 32")]
    Size(usize),
}

/// A 32-byte ledger account key, rendered in base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);

impl Identity {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for Identity {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if !(ADDRESS_MIN_LEN..=ADDRESS_MAX_LEN).contains(&s.len()) {
            return Err(AddressError::Length(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
            return Err(AddressError::Charset(c));
        }

        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::Size(0))?;
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Size(decoded.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_base58())
    }
}

impl Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base58())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Identity)
        }
    }
}

/// Ledger commitment level for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// Finality the attestation network waits for before observing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalityLevel {
    Confirmed,
    Finalized,
}

impl FinalityLevel {
    /// On-chain consistency level byte.
    pub fn consistency_level(&self) -> u8 {
        match self {
            FinalityLevel::Confirmed => 0,
            FinalityLevel::Finalized => 1,
        }
    }
}

/// A recent block reference authorizing a transaction for a bounded window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessToken {
    /// Recent blockhash, base58.
    pub blockhash: String,
    /// Last block height at which the ledger accepts the blockhash.
    pub last_valid_block_height: u64,
    /// Locally estimated wall-clock expiry (ms since epoch).
    pub expires_at_ms: u64,
}

impl FreshnessToken {
    /// Remaining local validity at `now_ms`.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms.saturating_sub(now_ms))
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// A chain instruction carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Publish a message through the core bridge.
    PostMessage {
        emitter: Identity,
        recipient: Identity,
        nonce: u32,
        consistency_level: u8,
        payload: Vec<u8>,
    },
    /// Native transfer, used to pay the bridge message fee.
    Transfer {
        from: Identity,
        to: Identity,
        lamports: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction has no operations")]
pub struct EmptyTransaction;

/// A transaction awaiting signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    operations: Vec<Operation>,
    fee_payer: Identity,
    freshness: Option<FreshnessToken>,
}

impl UnsignedTransaction {
    /// Create a transaction. At least one operation is required.
    pub fn new(fee_payer: Identity, operations: Vec<Operation>) -> Result<Self, EmptyTransaction> {
        if operations.is_empty() {
            return Err(EmptyTransaction);
        }
        Ok(Self {
            operations,
            fee_payer,
            freshness: None,
        })
    }

    /// Bind the transaction to a freshness token, replacing any previous one.
    pub fn with_freshness(mut self, token: FreshnessToken) -> Self {
        self.freshness = Some(token);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn fee_payer(&self) -> Identity {
        self.fee_payer
    }

    pub fn freshness(&self) -> Option<&FreshnessToken> {
        self.freshness.as_ref()
    }

    /// Emitter of the message posted by this transaction, if any.
    pub fn message_emitter(&self) -> Option<Identity> {
        self.operations.iter().rev().find_map(|op| match op {
            Operation::PostMessage { emitter, .. } => Some(*emitter),
            _ => None,
        })
    }

    /// Canonical bytes covered by the fee payer's signature.
    pub fn message_bytes(&self) -> ChainResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ChainError::Encoding(e.to_string()))
    }
}

/// Raw signature bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature(pub Vec<u8>);

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", bs58::encode(&self.0).into_string())
    }
}

/// Ledger transaction identifier (base58 of the first signature).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed transaction ready for submission.
///
/// Always carries at least one signature and one operation, whichever
/// way it was built or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSignedTransaction")]
pub struct SignedTransaction {
    signatures: Vec<TxSignature>,
    message: UnsignedTransaction,
}

#[derive(Deserialize)]
struct RawSignedTransaction {
    signatures: Vec<TxSignature>,
    message: UnsignedTransaction,
}

impl TryFrom<RawSignedTransaction> for SignedTransaction {
    type Error = ChainError;

    fn try_from(raw: RawSignedTransaction) -> ChainResult<Self> {
        if raw.message.operations.is_empty() {
            return Err(ChainError::Encoding("transaction has no operations".to_string()));
        }
        Self::new(raw.message, raw.signatures)
    }
}

impl SignedTransaction {
    /// Attach signatures. The first one must be the fee payer's.
    pub fn new(message: UnsignedTransaction, signatures: Vec<TxSignature>) -> ChainResult<Self> {
        if signatures.is_empty() {
            return Err(ChainError::Encoding("transaction carries no signatures".to_string()));
        }
        Ok(Self {
            signatures,
            message,
        })
    }

    pub fn message(&self) -> &UnsignedTransaction {
        &self.message
    }

    pub fn signatures(&self) -> &[TxSignature] {
        &self.signatures
    }

    pub fn freshness(&self) -> Option<&FreshnessToken> {
        self.message.freshness()
    }

    /// Identifier the ledger will report for this transaction.
    ///
    /// Derived from content, so an identical resubmission keeps its id.
    pub fn transaction_id(&self) -> TransactionId {
        let fee_payer = self.signatures.first().map(|s| s.0.as_slice()).unwrap_or_default();
        TransactionId(bs58::encode(fee_payer).into_string())
    }

    /// Serialize to the submission wire format.
    pub fn to_wire(&self) -> ChainResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ChainError::Encoding(e.to_string()))
    }

    pub fn from_wire(bytes: &[u8]) -> ChainResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ChainError::Encoding(e.to_string()))
    }
}

/// Options forwarded to `send_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Skip simulation before broadcasting.
    pub skip_preflight: bool,
    /// Commitment used for simulation when it runs.
    pub preflight_commitment: Commitment,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            preflight_commitment: Commitment::Confirmed,
        }
    }
}

/// Outcome of one accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub transaction_id: TransactionId,
    pub submitted_at_ms: u64,
    pub attempts: u32,
}

/// Ledger view of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet seen, or only processed.
    Pending,
    /// Voted on by a supermajority but still revertible.
    Confirmed,
    /// Irreversible.
    Finalized { slot: u64 },
    /// The freshness token's window elapsed without the transaction landing.
    Expired,
    /// Landed with an execution error.
    Rejected { reason: String },
}

/// Why a transaction did not finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalityFailure {
    Expired { last_valid_block_height: u64 },
    Rejected { reason: String },
    /// Still not final when the wait ran out. `confirmed` means the
    /// ledger had already reported the transaction as landed.
    TimedOut { confirmed: bool },
}

/// Terminal result of waiting for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalityRecord {
    pub transaction_id: TransactionId,
    pub finalized: bool,
    pub slot: Option<u64>,
    pub error: Option<FinalityFailure>,
    pub polls: u32,
}

impl FinalityRecord {
    pub fn finalized(transaction_id: TransactionId, slot: u64, polls: u32) -> Self {
        Self {
            transaction_id,
            finalized: true,
            slot: Some(slot),
            error: None,
            polls,
        }
    }

    pub fn failed(transaction_id: TransactionId, error: FinalityFailure, polls: u32) -> Self {
        Self {
            transaction_id,
            finalized: false,
            slot: None,
            error: Some(error),
            polls,
        }
    }
}

/// Errors that can occur talking to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Connection or HTTP-level failure.
    #[error("RPC transport error: {0}")]
    Transport(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Endpoint asked us to slow down.
    #[error("RPC rate limited")]
    RateLimited,

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The ledger refused the transaction (failed simulation or validation).
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// The transaction's blockhash is unknown or too old.
    #[error("Blockhash not found")]
    BlockhashNotFound,

    /// The ledger does not (yet) know the transaction.
    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    /// Every configured endpoint failed.
    #[error("All RPC providers failed: {0}")]
    Unavailable(String),
}

/// Node is behind or unhealthy.
pub const RPC_NODE_UNHEALTHY: i64 = -32005;
/// Requested block is not available yet.
pub const RPC_BLOCK_NOT_AVAILABLE: i64 = -32004;
/// Slot skipped or missing in long-term storage.
pub const RPC_SLOT_SKIPPED: i64 = -32007;

/// Default transient classification for ledger calls.
pub fn is_transient(error: &ChainError) -> bool {
    match error {
        ChainError::Transport(_)
        | ChainError::Timeout(_)
        | ChainError::RateLimited
        | ChainError::Unavailable(_) => true,
        ChainError::Rpc { code, .. } => matches!(
            *code,
            RPC_NODE_UNHEALTHY | RPC_BLOCK_NOT_AVAILABLE | RPC_SLOT_SKIPPED
        ),
        ChainError::Rejected(_)
        | ChainError::BlockhashNotFound
        | ChainError::TransactionNotFound(_)
        | ChainError::Encoding(_)
        | ChainError::MalformedResponse(_) => false,
    }
}

/// Result type for ledger operations.
pub type ChainResult<T> = Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

    fn identity(byte: u8) -> Identity {
        Identity::new([byte; 32])
    }

    #[test]
    fn test_identity_parsing() {
        let id: Identity = SYSTEM_PROGRAM.parse().unwrap();
        assert_eq!(id, Identity::new([0u8; 32]));
        assert_eq!(id.to_string(), SYSTEM_PROGRAM);

        let round_trip: Identity = identity(7).to_base58().parse().unwrap();
        assert_eq!(round_trip, identity(7));
    }

    #[test]
    fn test_identity_rejections() {
        assert_eq!("".parse::<Identity>(), Err(AddressError::Empty));
        assert_eq!("1111".parse::<Identity>(), Err(AddressError::Length(4)));
        assert_eq!(
            "0000000000000000000000000000000000".parse::<Identity>(),
            Err(AddressError::Charset('0'))
        );
        // 44 base58 digits overflow 32 bytes
        let too_big = "z".repeat(44);
        assert!(matches!(too_big.parse::<Identity>(), Err(AddressError::Size(_))));
    }

    #[test]
    fn test_identity_json_is_base58() {
        let json = serde_json::to_string(&identity(1)).unwrap();
        assert_eq!(json, format!("\"{}\"", identity(1).to_base58()));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity(1));
    }

    #[test]
    fn test_empty_transaction_rejected() {
        assert_eq!(UnsignedTransaction::new(identity(1), Vec::new()), Err(EmptyTransaction));
    }

    #[test]
    fn test_wire_format_and_id() {
        let tx = UnsignedTransaction::new(
            identity(1),
            vec![Operation::PostMessage {
                emitter: identity(1),
                recipient: identity(2),
                nonce: 0,
                consistency_level: 1,
                payload: b"hello".to_vec(),
            }],
        )
        .unwrap();
        assert_eq!(tx.message_emitter(), Some(identity(1)));

        let signed = SignedTransaction::new(tx, vec![TxSignature(vec![9u8; 64])]).unwrap();
        let decoded = SignedTransaction::from_wire(&signed.to_wire().unwrap()).unwrap();
        assert_eq!(decoded, signed);
        assert_eq!(decoded.transaction_id(), signed.transaction_id());
    }

    #[test]
    fn test_unsigned_signature_list_rejected() {
        let tx = UnsignedTransaction::new(
            identity(1),
            vec![Operation::Transfer { from: identity(1), to: identity(2), lamports: 1 }],
        )
        .unwrap();
        assert!(SignedTransaction::new(tx, Vec::new()).is_err());
    }

    #[test]
    fn test_decoding_enforces_signatures() {
        let tx = UnsignedTransaction::new(
            identity(1),
            vec![Operation::Transfer { from: identity(1), to: identity(2), lamports: 1 }],
        )
        .unwrap();
        let signed = SignedTransaction::new(tx, vec![TxSignature(vec![3u8; 64])]).unwrap();

        let mut json = serde_json::to_value(&signed).unwrap();
        let back: SignedTransaction = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.transaction_id(), signed.transaction_id());

        json["signatures"] = serde_json::json!([]);
        assert!(serde_json::from_value::<SignedTransaction>(json.clone()).is_err());

        json["signatures"] = serde_json::to_value(signed.signatures()).unwrap();
        json["message"]["operations"] = serde_json::json!([]);
        assert!(serde_json::from_value::<SignedTransaction>(json).is_err());
    }

    #[test]
    fn test_freshness_window() {
        let token = FreshnessToken {
            blockhash: "abc".to_string(),
            last_valid_block_height: 100,
            expires_at_ms: 10_000,
        };
        assert_eq!(token.remaining(4_000), Duration::from_millis(6_000));
        assert_eq!(token.remaining(20_000), Duration::ZERO);
        assert!(!token.is_expired(9_999));
        assert!(token.is_expired(10_000));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&ChainError::Timeout(5)));
        assert!(is_transient(&ChainError::RateLimited));
        assert!(is_transient(&ChainError::Rpc { code: RPC_NODE_UNHEALTHY, message: String::new() }));
        assert!(!is_transient(&ChainError::Rpc { code: -32602, message: String::new() }));
        assert!(!is_transient(&ChainError::BlockhashNotFound));
        assert!(!is_transient(&ChainError::Rejected("custom program error".into())));
    }
}
