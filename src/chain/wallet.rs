//! Signer capability and local key management.
//!
//! # Security
//! - Secret keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized
//! - A signer must be connected before it signs anything

use async_trait::async_trait;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::chain::types::{Identity, SignedTransaction, TxSignature, UnsignedTransaction};

/// Environment variable name for the relay's signing key.
pub const SIGNER_KEY_ENV_VAR: &str = "BRIDGE_RELAY_SIGNER_KEY";

/// Errors a signer can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Signer is not connected")]
    NotConnected,

    #[error("Signing request rejected by user")]
    UserRejected,

    #[error("Signer error: {0}")]
    Other(String),
}

/// A wallet able to authorize transactions for one identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The connected identity, if any.
    fn identity(&self) -> Option<Identity>;

    /// Connect and return the identity.
    async fn connect(&self) -> Result<Identity, SignerError>;

    /// Sign a batch in one request. Output order matches input order.
    async fn sign_all(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError>;
}

/// Ed25519 signer holding its key in process memory.
pub struct LocalSigner {
    key: SigningKey,
    connected: AtomicBool,
}

impl LocalSigner {
    /// Create a signer from a base58 secret: a 32-byte seed or a 64-byte
    /// keypair (seed followed by public key).
    pub fn from_base58(secret: &str) -> Result<Self, SignerError> {
        let bytes = bs58::decode(secret.trim())
            .into_vec()
            .map_err(|e| SignerError::Other(format!("Invalid secret key encoding: {}", e)))?;

        let key = match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let mut keypair = [0u8; 64];
                keypair.copy_from_slice(&bytes);
                SigningKey::from_keypair_bytes(&keypair).map_err(|_| {
                    SignerError::Other("Keypair public half does not match secret".to_string())
                })?
            }
            n => {
                return Err(SignerError::Other(format!(
                    "Invalid secret key length {}, expected 32 or 64 bytes",
                    n
                )))
            }
        };

        let signer = Self::from_key(key);
        tracing::info!(identity = %signer.public_identity(), "Local signer initialized");
        Ok(signer)
    }

    /// Load the signer from `BRIDGE_RELAY_SIGNER_KEY`.
    pub fn from_env() -> Result<Self, SignerError> {
        let secret = std::env::var(SIGNER_KEY_ENV_VAR).map_err(|_| {
            SignerError::Other(format!("Environment variable {} not set", SIGNER_KEY_ENV_VAR))
        })?;
        Self::from_base58(&secret)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_key(SigningKey::from_bytes(&seed))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::from_key(SigningKey::generate(&mut OsRng))
    }

    fn from_key(key: SigningKey) -> Self {
        Self {
            key,
            connected: AtomicBool::new(false),
        }
    }

    /// Identity of the key, whether or not connected.
    pub fn public_identity(&self) -> Identity {
        Identity::new(self.key.verifying_key().to_bytes())
    }

    /// Export the 64-byte keypair in base58. Only for `keygen` output.
    pub fn secret_base58(&self) -> String {
        bs58::encode(self.key.to_keypair_bytes()).into_string()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn identity(&self) -> Option<Identity> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.public_identity())
    }

    async fn connect(&self) -> Result<Identity, SignerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.public_identity())
    }

    async fn sign_all(
        &self,
        transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignerError::NotConnected);
        }
        let identity = self.public_identity();

        transactions
            .into_iter()
            .map(|tx| {
                if tx.fee_payer() != identity {
                    return Err(SignerError::Other(format!(
                        "Fee payer {} is not the signer identity {}",
                        tx.fee_payer(),
                        identity
                    )));
                }
                let message = tx
                    .message_bytes()
                    .map_err(|e| SignerError::Other(e.to_string()))?;
                let signature = self.key.sign(&message);
                SignedTransaction::new(tx, vec![TxSignature(signature.to_bytes().to_vec())])
                    .map_err(|e| SignerError::Other(e.to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("identity", &self.public_identity())
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}
