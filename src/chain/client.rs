//! Ledger RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Define the `ChainClient` capability the relay pipeline consumes
//! - Speak JSON-RPC to the ledger (blockhash, submission, status, logs)
//! - Fail over across endpoints on transport errors and unhealthy nodes
//! - Map RPC error objects to typed `ChainError`s for classification
//!
//! # Compatibility
//! Method names and status fields follow the Solana JSON-RPC API, but
//! `sendTransaction` carries `SignedTransaction::to_wire` (bincode of this
//! crate's own transaction type), not a native ledger transaction. A stock
//! validator rejects it; `send_raw` only works against a node or gateway
//! that decodes this format, such as the mock backends in the test suite.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

use crate::chain::types::{
    is_transient, now_ms, ChainError, ChainResult, FreshnessToken, SendOptions, SignedTransaction,
    TransactionId, TxStatus,
};
use crate::config::ChainConfig;

/// Simulation or sanitization failed during `sendTransaction`.
pub const RPC_PREFLIGHT_FAILURE: i64 = -32002;

/// Access to the source ledger.
///
/// Implementations must be safe to share across concurrent relays.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch a recent block reference to authorize new transactions.
    async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken>;

    /// Broadcast a signed transaction and return its identifier.
    async fn send_raw(
        &self,
        tx: &SignedTransaction,
        options: &SendOptions,
    ) -> ChainResult<TransactionId>;

    /// Report the status of a submitted transaction. `token` is the one the
    /// transaction was signed with and decides expiry.
    async fn get_status(
        &self,
        transaction_id: &TransactionId,
        token: &FreshnessToken,
    ) -> ChainResult<TxStatus>;

    /// Program log lines of a finalized transaction.
    async fn transaction_logs(&self, transaction_id: &TransactionId) -> ChainResult<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn into_chain_error(self) -> ChainError {
        if self.code == RPC_PREFLIGHT_FAILURE {
            let err = self.data.as_ref().and_then(|d| d.get("err"));
            if err.and_then(Value::as_str) == Some("BlockhashNotFound") {
                return ChainError::BlockhashNotFound;
            }
            return ChainError::Rejected(self.message);
        }
        ChainError::Rpc {
            code: self.code,
            message: self.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    meta: Option<TransactionMeta>,
}

/// JSON-RPC ledger client with failover support.
pub struct RpcChainClient {
    http: reqwest::Client,
    /// Primary endpoint first, then failovers.
    endpoints: Vec<Url>,
    config: ChainConfig,
    timeout_duration: Duration,
    next_id: AtomicU64,
}

impl RpcChainClient {
    /// Create a new client. Invalid failover URLs are skipped with a warning.
    pub fn new(config: ChainConfig) -> ChainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut endpoints = Vec::new();

        let primary: Url = config.rpc_url.parse().map_err(|e| {
            ChainError::Transport(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        endpoints.push(primary);

        for url_str in &config.failover_urls {
            match url_str.parse() {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = endpoints.len() - 1,
            commitment = config.commitment.as_str(),
            "Ledger client initialized"
        );

        Ok(Self {
            http,
            endpoints,
            config,
            timeout_duration,
            next_id: AtomicU64::new(1),
        })
    }

    /// Check if the ledger is reachable by fetching a blockhash.
    pub async fn is_healthy(&self) -> bool {
        self.latest_freshness_token().await.is_ok()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    async fn post(&self, endpoint: &Url, body: &Value) -> ChainResult<RpcResponse> {
        let response = self
            .http
            .post(endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChainError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChainError::Transport(format!("HTTP status {}", status)));
        }

        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))
    }

    /// Call `method` on each endpoint in turn until one answers.
    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> ChainResult<T> {
        let mut last_error = None;

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let body = json!({
                "jsonrpc": "2.0",
                "id": self.next_id.fetch_add(1, Ordering::Relaxed),
                "method": method,
                "params": params,
            });

            let outcome = match timeout(self.timeout_duration, self.post(endpoint, &body)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ChainError::Timeout(self.config.rpc_timeout_secs)),
            };

            match outcome {
                Ok(envelope) => {
                    if let Some(error) = envelope.error.map(RpcErrorObject::into_chain_error) {
                        if !is_transient(&error) {
                            return Err(error);
                        }
                        tracing::warn!(provider_idx = i, method, error = %error, "Node unhealthy, trying next provider");
                        last_error = Some(error);
                        continue;
                    }
                    return serde_json::from_value(envelope.result)
                        .map_err(|e| ChainError::MalformedResponse(format!("{}: {}", method, e)));
                }
                Err(e) => {
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC call failed, trying next provider");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if self.endpoints.len() == 1 => e,
            Some(e) => ChainError::Unavailable(e.to_string()),
            None => ChainError::Unavailable("no RPC providers configured".to_string()),
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken> {
        let response: WithContext<LatestBlockhash> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.config.commitment.as_str() }]),
            )
            .await?;

        Ok(FreshnessToken {
            blockhash: response.value.blockhash,
            last_valid_block_height: response.value.last_valid_block_height,
            expires_at_ms: now_ms() + self.config.token_validity_secs * 1000,
        })
    }

    async fn send_raw(
        &self,
        tx: &SignedTransaction,
        options: &SendOptions,
    ) -> ChainResult<TransactionId> {
        // Crate wire format, see the module docs.
        let encoded = BASE64.encode(tx.to_wire()?);
        let params = json!([
            encoded,
            {
                "encoding": "base64",
                "skipPreflight": options.skip_preflight,
                "preflightCommitment": options.preflight_commitment.as_str(),
                "maxRetries": 0,
            }
        ]);

        let signature: String = self.call("sendTransaction", params).await?;
        let expected = tx.transaction_id();
        if signature != expected.0 {
            tracing::warn!(
                returned = %signature,
                expected = %expected,
                "Ledger returned an unexpected transaction id"
            );
        }
        Ok(TransactionId(signature))
    }

    async fn get_status(
        &self,
        transaction_id: &TransactionId,
        token: &FreshnessToken,
    ) -> ChainResult<TxStatus> {
        let response: WithContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[transaction_id.as_str()], { "searchTransactionHistory": true }]),
            )
            .await?;

        match response.value.into_iter().next().flatten() {
            Some(status) => {
                if let Some(err) = status.err {
                    return Ok(TxStatus::Rejected {
                        reason: err.to_string(),
                    });
                }
                Ok(match status.confirmation_status.as_deref() {
                    Some("finalized") => TxStatus::Finalized { slot: status.slot },
                    Some("confirmed") => TxStatus::Confirmed,
                    _ => TxStatus::Pending,
                })
            }
            None => {
                let height: u64 = self
                    .call(
                        "getBlockHeight",
                        json!([{ "commitment": self.config.commitment.as_str() }]),
                    )
                    .await?;
                if height > token.last_valid_block_height {
                    Ok(TxStatus::Expired)
                } else {
                    Ok(TxStatus::Pending)
                }
            }
        }
    }

    async fn transaction_logs(&self, transaction_id: &TransactionId) -> ChainResult<Vec<String>> {
        let response: Option<TransactionResponse> = self
            .call(
                "getTransaction",
                json!([
                    transaction_id.as_str(),
                    { "encoding": "json", "commitment": "finalized", "maxSupportedTransactionVersion": 0 }
                ]),
            )
            .await?;

        let tx = response.ok_or_else(|| ChainError::TransactionNotFound(transaction_id.0.clone()))?;
        Ok(tx.meta.and_then(|m| m.log_messages).unwrap_or_default())
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("endpoints", &self.endpoints.len())
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ChainConfig {
        ChainConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            rpc_timeout_secs: 2,
            ..ChainConfig::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = RpcChainClient::new(test_config()).unwrap();
        assert_eq!(client.endpoints.len(), 1);
    }

    #[test]
    fn test_invalid_primary_url() {
        let mut config = test_config();
        config.rpc_url = "not a url".to_string();
        assert!(RpcChainClient::new(config).is_err());
    }

    #[test]
    fn test_invalid_failover_skipped() {
        let mut config = test_config();
        config.failover_urls = vec!["::bad::".to_string(), "http://127.0.0.1:2".to_string()];
        let client = RpcChainClient::new(config).unwrap();
        assert_eq!(client.endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_rpc_failover_exhausts_all_providers() {
        let mut config = test_config();
        config.failover_urls.push("http://127.0.0.1:2".to_string());
        let client = RpcChainClient::new(config).unwrap();

        let err = client.latest_freshness_token().await.unwrap_err();
        assert!(matches!(err, ChainError::Unavailable(_)));
        assert!(is_transient(&err));
        assert!(!client.is_healthy().await);
    }

    #[test]
    fn test_preflight_error_mapping() {
        let blockhash = RpcErrorObject {
            code: RPC_PREFLIGHT_FAILURE,
            message: "Transaction simulation failed".to_string(),
            data: Some(json!({ "err": "BlockhashNotFound" })),
        };
        assert_eq!(blockhash.into_chain_error(), ChainError::BlockhashNotFound);

        let program = RpcErrorObject {
            code: RPC_PREFLIGHT_FAILURE,
            message: "Transaction simulation failed".to_string(),
            data: Some(json!({ "err": { "InstructionError": [0, { "Custom": 1 }] } })),
        };
        assert!(matches!(program.into_chain_error(), ChainError::Rejected(_)));

        let other = RpcErrorObject {
            code: -32005,
            message: "Node is behind".to_string(),
            data: None,
        };
        assert!(is_transient(&other.into_chain_error()));
    }

    #[test]
    fn test_status_deserialization() {
        let value = json!({
            "context": { "slot": 10 },
            "value": [{ "slot": 9, "confirmations": null, "err": null, "confirmationStatus": "finalized" }]
        });
        let parsed: WithContext<Vec<Option<SignatureStatus>>> = serde_json::from_value(value).unwrap();
        let status = parsed.value[0].as_ref().unwrap();
        assert_eq!(status.slot, 9);
        assert!(status.err.is_none());
        assert_eq!(status.confirmation_status.as_deref(), Some("finalized"));
    }
}
