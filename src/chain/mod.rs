//! Source ledger subsystem.
//!
//! # Data Flow
//! ```text
//! UnsignedTransaction
//!     → wallet.rs (Signer: connect, sign_all)
//!     → SignedTransaction (bincode wire format)
//!     → client.rs (ChainClient: send_raw, get_status, transaction_logs)
//!     → ledger (JSON-RPC, or simulated.rs in memory)
//! ```
//!
//! # Design Decisions
//! - Capabilities are async traits so the relay pipeline can hold
//!   `Arc<dyn ChainClient>` and `&dyn Signer`
//! - Errors are typed; retry classification never inspects message text

pub mod client;
pub mod simulated;
pub mod types;
pub mod wallet;

pub use client::{ChainClient, RpcChainClient};
pub use simulated::SimulatedLedger;
pub use types::{
    ChainError, ChainResult, FreshnessToken, Identity, SignedTransaction, TransactionId, TxStatus,
    UnsignedTransaction,
};
pub use wallet::{LocalSigner, Signer, SignerError};
