//! Payload to unsigned transaction construction.
//!
//! Pure: no network access, no clock. Freshness tokens are attached later
//! by the signing stage.

use crate::chain::types::{FinalityLevel, Identity, Operation, UnsignedTransaction};
use crate::config::MessageConfig;
use crate::relay::error::RelayError;

/// Bridge fee transfer added to every message transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFee {
    pub collector: Identity,
    pub lamports: u64,
}

/// Message publication parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageParams {
    pub nonce: u32,
    pub finality: FinalityLevel,
    pub max_payload_per_tx: usize,
    pub fee: Option<MessageFee>,
}

impl MessageParams {
    pub fn from_config(config: &MessageConfig) -> Result<Self, RelayError> {
        let fee = match (&config.fee_collector, config.message_fee_lamports) {
            (_, 0) => None,
            (Some(collector), lamports) => Some(MessageFee {
                collector: collector.parse().map_err(|e| {
                    RelayError::InvalidInput(format!("fee collector '{}': {}", collector, e))
                })?,
                lamports,
            }),
            (None, _) => {
                return Err(RelayError::InvalidInput(
                    "message fee configured without a fee collector".to_string(),
                ))
            }
        };

        Ok(Self {
            nonce: config.nonce,
            finality: config.finality,
            max_payload_per_tx: config.max_payload_per_tx.max(1),
            fee,
        })
    }
}

impl Default for MessageParams {
    fn default() -> Self {
        Self {
            nonce: 0,
            finality: FinalityLevel::Finalized,
            max_payload_per_tx: MessageConfig::default().max_payload_per_tx,
            fee: None,
        }
    }
}

/// Parse a destination account, rejecting anything that is not a
/// well-formed base58 key.
pub fn parse_destination(destination: &str) -> Result<Identity, RelayError> {
    destination
        .parse()
        .map_err(|e| RelayError::InvalidInput(format!("destination '{}': {}", destination, e)))
}

/// Turns a payload into message transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    params: MessageParams,
}

impl TransactionBuilder {
    pub fn new(params: MessageParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MessageParams {
        &self.params
    }

    /// Build the ordered batch for `payload`.
    ///
    /// Payloads longer than `max_payload_per_tx` become one transaction per
    /// part, with nonces `nonce, nonce + 1, ..`. The signer's identity is
    /// both fee payer and emitter.
    pub fn build(
        &self,
        payload: &[u8],
        fee_payer: Identity,
        destination: &str,
    ) -> Result<Vec<UnsignedTransaction>, RelayError> {
        if payload.is_empty() {
            return Err(RelayError::InvalidInput("payload is empty".to_string()));
        }
        let recipient = parse_destination(destination)?;
        let consistency_level = self.params.finality.consistency_level();

        let batch = payload
            .chunks(self.params.max_payload_per_tx.max(1))
            .enumerate()
            .map(|(index, part)| {
                let mut operations = Vec::with_capacity(2);
                if let Some(fee) = self.params.fee {
                    operations.push(Operation::Transfer {
                        from: fee_payer,
                        to: fee.collector,
                        lamports: fee.lamports,
                    });
                }
                operations.push(Operation::PostMessage {
                    emitter: fee_payer,
                    recipient,
                    nonce: self.params.nonce.wrapping_add(index as u32),
                    consistency_level,
                    payload: part.to_vec(),
                });
                UnsignedTransaction::new(fee_payer, operations)
                    .map_err(|e| RelayError::InvalidInput(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            parts = batch.len(),
            payload_len = payload.len(),
            recipient = %recipient,
            "Built message batch"
        );
        Ok(batch)
    }
}
