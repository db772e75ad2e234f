//! In-memory ledger and guardian network.
//!
//! Backs `--simulate` runs and tests. Transactions finalize after a
//! configurable number of status polls; messages get per-emitter
//! sequences and become attested after a configurable number of
//! attestation polls. Artifacts are derived from stored message bodies,
//! so repeated polls return identical bytes.

use alloy::primitives::keccak256;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::attestation::service::AttestationService;
use crate::attestation::types::{
    encode_vaa, AttestationArtifact, AttestationError, GuardianSignature, MessageFingerprint,
    VaaBody,
};
use crate::chain::client::ChainClient;
use crate::chain::types::{
    now_ms, ChainError, ChainResult, FreshnessToken, Identity, Operation, SendOptions,
    SignedTransaction, TransactionId, TxStatus,
};

/// Blocks a blockhash stays valid for.
const BLOCKHASH_VALIDITY_BLOCKS: u64 = 150;
const GUARDIAN_QUORUM: u8 = 13;

#[derive(Debug)]
struct SimulatedTx {
    status_polls: u32,
    finalized_slot: Option<u64>,
    logs: Vec<String>,
}

/// Simulated ledger plus guardian network.
#[derive(Debug)]
pub struct SimulatedLedger {
    emitter_chain: u16,
    polls_to_finality: u32,
    polls_to_attestation: u32,
    token_validity: Duration,
    block_height: AtomicU64,
    transactions: DashMap<TransactionId, SimulatedTx>,
    sequences: DashMap<Identity, u64>,
    messages: DashMap<MessageFingerprint, VaaBody>,
    attestation_polls: DashMap<MessageFingerprint, u32>,
    token_requests: AtomicU32,
    send_calls: AtomicU32,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedLedger {
    pub fn new(emitter_chain: u16) -> Self {
        Self {
            emitter_chain,
            polls_to_finality: 2,
            polls_to_attestation: 1,
            token_validity: Duration::from_secs(60),
            block_height: AtomicU64::new(1_000),
            transactions: DashMap::new(),
            sequences: DashMap::new(),
            messages: DashMap::new(),
            attestation_polls: DashMap::new(),
            token_requests: AtomicU32::new(0),
            send_calls: AtomicU32::new(0),
        }
    }

    /// Status polls a transaction needs before it reports finalized.
    pub fn with_polls_to_finality(mut self, polls: u32) -> Self {
        self.polls_to_finality = polls.max(1);
        self
    }

    /// Attestation polls a message needs before its artifact exists.
    pub fn with_polls_to_attestation(mut self, polls: u32) -> Self {
        self.polls_to_attestation = polls.max(1);
        self
    }

    pub fn with_token_validity(mut self, validity: Duration) -> Self {
        self.token_validity = validity;
        self
    }

    /// Move the chain tip forward, expiring old blockhashes.
    pub fn advance_blocks(&self, blocks: u64) {
        self.block_height.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> u32 {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Distinct transactions accepted so far.
    pub fn accepted_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn record_messages(&self, tx: &SignedTransaction) -> Vec<String> {
        let mut logs = Vec::new();
        for op in tx.message().operations() {
            if let Operation::PostMessage {
                emitter,
                nonce,
                consistency_level,
                payload,
                ..
            } = op
            {
                let sequence = {
                    let mut next = self.sequences.entry(*emitter).or_insert(0);
                    let sequence = *next;
                    *next += 1;
                    sequence
                };
                let fingerprint = MessageFingerprint {
                    emitter_chain: self.emitter_chain,
                    emitter: *emitter,
                    sequence,
                };
                self.messages.insert(
                    fingerprint,
                    VaaBody {
                        timestamp: (now_ms() / 1000) as u32,
                        nonce: *nonce,
                        emitter_chain: self.emitter_chain,
                        emitter_address: *emitter.as_bytes(),
                        sequence,
                        consistency_level: *consistency_level,
                        payload: payload.clone(),
                    },
                );
                logs.push("Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth invoke [1]".to_string());
                logs.push(format!("Program log: Sequence: {}", sequence));
            }
        }
        logs
    }
}

#[async_trait]
impl ChainClient for SimulatedLedger {
    async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        let height = self.block_height();
        Ok(FreshnessToken {
            blockhash: bs58::encode(keccak256(height.to_be_bytes())).into_string(),
            last_valid_block_height: height + BLOCKHASH_VALIDITY_BLOCKS,
            expires_at_ms: now_ms() + self.token_validity.as_millis() as u64,
        })
    }

    async fn send_raw(
        &self,
        tx: &SignedTransaction,
        _options: &SendOptions,
    ) -> ChainResult<TransactionId> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);

        let token = tx
            .freshness()
            .ok_or_else(|| ChainError::Rejected("transaction has no recent blockhash".to_string()))?;
        if token.is_expired(now_ms()) || self.block_height() > token.last_valid_block_height {
            return Err(ChainError::BlockhashNotFound);
        }

        let transaction_id = tx.transaction_id();
        match self.transactions.entry(transaction_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(transaction_id = %transaction_id, "Duplicate submission ignored");
            }
            Entry::Vacant(slot) => {
                slot.insert(SimulatedTx {
                    status_polls: 0,
                    finalized_slot: None,
                    logs: self.record_messages(tx),
                });
            }
        }
        Ok(transaction_id)
    }

    async fn get_status(
        &self,
        transaction_id: &TransactionId,
        token: &FreshnessToken,
    ) -> ChainResult<TxStatus> {
        let Some(mut tx) = self.transactions.get_mut(transaction_id) else {
            return Ok(if self.block_height() > token.last_valid_block_height {
                TxStatus::Expired
            } else {
                TxStatus::Pending
            });
        };

        tx.status_polls += 1;
        if let Some(slot) = tx.finalized_slot {
            return Ok(TxStatus::Finalized { slot });
        }
        if tx.status_polls >= self.polls_to_finality {
            let slot = self.block_height.fetch_add(1, Ordering::SeqCst);
            tx.finalized_slot = Some(slot);
            return Ok(TxStatus::Finalized { slot });
        }
        Ok(if tx.status_polls + 1 == self.polls_to_finality {
            TxStatus::Confirmed
        } else {
            TxStatus::Pending
        })
    }

    async fn transaction_logs(&self, transaction_id: &TransactionId) -> ChainResult<Vec<String>> {
        match self.transactions.get(transaction_id) {
            Some(tx) if tx.finalized_slot.is_some() => Ok(tx.logs.clone()),
            _ => Err(ChainError::TransactionNotFound(transaction_id.0.clone())),
        }
    }
}

#[async_trait]
impl AttestationService for SimulatedLedger {
    async fn poll(
        &self,
        fingerprint: &MessageFingerprint,
    ) -> Result<Option<AttestationArtifact>, AttestationError> {
        let Some(body) = self.messages.get(fingerprint).map(|b| b.clone()) else {
            return Ok(None);
        };

        let polls = {
            let mut polls = self.attestation_polls.entry(*fingerprint).or_insert(0);
            *polls += 1;
            *polls
        };
        if polls < self.polls_to_attestation {
            return Ok(None);
        }

        let digest = body.digest();
        let signatures: Vec<_> = (0..GUARDIAN_QUORUM)
            .map(|index| {
                let mut signature = [index; 65];
                signature[..32].copy_from_slice(digest.as_slice());
                GuardianSignature { index, signature }
            })
            .collect();

        AttestationArtifact::parse(fingerprint, encode_vaa(0, &signatures, &body)).map(Some)
    }
}
