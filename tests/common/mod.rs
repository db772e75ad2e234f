//! Shared stubs for the integration suite.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use bridge_relay::attestation::types::{encode_vaa, GuardianSignature, VaaBody};
use bridge_relay::attestation::{
    AttestationArtifact, AttestationError, AttestationService, MessageFingerprint,
};
use bridge_relay::chain::types::{now_ms, ChainResult, SendOptions};
use bridge_relay::chain::{
    ChainClient, FreshnessToken, Identity, SignedTransaction, Signer, SignerError, TransactionId,
    TxStatus, UnsignedTransaction,
};
use bridge_relay::relay::RelaySettings;
use bridge_relay::resilience::RetryPolicy;

pub const DESTINATION: &str = "11111111111111111111111111111111";

/// Sequence number the scripted ledger logs for every message.
pub const SCRIPTED_SEQUENCE: u64 = 7;

/// Settings with millisecond delays so tests run fast.
pub fn fast_settings() -> RelaySettings {
    RelaySettings {
        submit_policy: RetryPolicy::fixed(3, Duration::from_millis(1)),
        finality_poll_interval: Duration::from_millis(5),
        status_policy: RetryPolicy::fixed(3, Duration::from_millis(1)),
        attestation_poll_interval: Duration::from_millis(5),
        attestation_timeout: Duration::from_millis(500),
        ..RelaySettings::default()
    }
}

/// Ledger stub replaying scripted results and counting every call.
///
/// Drained scripts fall back to success: sends are accepted and status
/// reports finalized.
#[derive(Default)]
pub struct ScriptedChain {
    send_script: Mutex<VecDeque<ChainResult<()>>>,
    status_script: Mutex<VecDeque<TxStatus>>,
    token_calls: AtomicU32,
    send_calls: AtomicU32,
    status_calls: AtomicU32,
    log_calls: AtomicU32,
}

impl ScriptedChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_sends(sends: Vec<ChainResult<()>>) -> Arc<Self> {
        Arc::new(Self {
            send_script: Mutex::new(sends.into()),
            ..Self::default()
        })
    }

    pub fn with_statuses(statuses: Vec<TxStatus>) -> Arc<Self> {
        Arc::new(Self {
            status_script: Mutex::new(statuses.into()),
            ..Self::default()
        })
    }

    pub fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Every network call of any kind.
    pub fn total_calls(&self) -> u32 {
        self.token_calls() + self.send_calls() + self.status_calls() + self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn latest_freshness_token(&self) -> ChainResult<FreshnessToken> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(FreshnessToken {
            blockhash: "9sHcv6xwn9YkB8nxTUGKDwPwNnmqVp5oAXxU8Fdkm4J6".to_string(),
            last_valid_block_height: 1_150,
            expires_at_ms: now_ms() + 60_000,
        })
    }

    async fn send_raw(
        &self,
        tx: &SignedTransaction,
        _options: &SendOptions,
    ) -> ChainResult<TransactionId> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.send_script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next.map(|()| tx.transaction_id())
    }

    async fn get_status(&self, _: &TransactionId, _: &FreshnessToken) -> ChainResult<TxStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TxStatus::Finalized { slot: 4_242 }))
    }

    async fn transaction_logs(&self, _: &TransactionId) -> ChainResult<Vec<String>> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth invoke [1]".to_string(),
            format!("Program log: Sequence: {}", SCRIPTED_SEQUENCE),
            "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth success".to_string(),
        ])
    }
}

/// Signer that always fails the same way.
pub struct FailingSigner {
    identity: Option<Identity>,
    error: SignerError,
    sign_calls: AtomicU32,
}

impl FailingSigner {
    /// Connected, but the user declines every request.
    pub fn rejecting() -> Self {
        Self {
            identity: Some(Identity::new([4; 32])),
            error: SignerError::UserRejected,
            sign_calls: AtomicU32::new(0),
        }
    }

    /// No wallet attached.
    pub fn disconnected() -> Self {
        Self {
            identity: None,
            error: SignerError::NotConnected,
            sign_calls: AtomicU32::new(0),
        }
    }

    pub fn sign_calls(&self) -> u32 {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for FailingSigner {
    fn identity(&self) -> Option<Identity> {
        self.identity
    }

    async fn connect(&self) -> Result<Identity, SignerError> {
        self.identity.ok_or_else(|| self.error.clone())
    }

    async fn sign_all(
        &self,
        _transactions: Vec<UnsignedTransaction>,
    ) -> Result<Vec<SignedTransaction>, SignerError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Guardian stub: pending for `pending_polls` polls, then a quorum
/// artifact carrying `payload`.
pub struct ScriptedAttestation {
    pending_polls: u32,
    payload: Vec<u8>,
    polls: AtomicU32,
}

impl ScriptedAttestation {
    pub fn new(pending_polls: u32, payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            pending_polls,
            payload: payload.to_vec(),
            polls: AtomicU32::new(0),
        })
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttestationService for ScriptedAttestation {
    async fn poll(
        &self,
        fingerprint: &MessageFingerprint,
    ) -> Result<Option<AttestationArtifact>, AttestationError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls <= self.pending_polls {
            return Ok(None);
        }
        AttestationArtifact::parse(fingerprint, quorum_vaa(fingerprint, &self.payload)).map(Some)
    }
}

/// A 13-signature VAA attesting `payload` under `fingerprint`.
pub fn quorum_vaa(fingerprint: &MessageFingerprint, payload: &[u8]) -> Vec<u8> {
    let body = VaaBody {
        timestamp: 1_700_000_000,
        nonce: 0,
        emitter_chain: fingerprint.emitter_chain,
        emitter_address: *fingerprint.emitter.as_bytes(),
        sequence: fingerprint.sequence,
        consistency_level: 1,
        payload: payload.to_vec(),
    };
    let signatures: Vec<_> = (0..13u8)
        .map(|index| GuardianSignature {
            index,
            signature: [index; 65],
        })
        .collect();
    encode_vaa(0, &signatures, &body)
}

/// Start a programmable HTTP backend on an ephemeral port. `f` receives
/// the raw request and returns a status code and response body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request = read_request(&mut socket).await;
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Body of a raw HTTP request.
pub fn request_body(raw: &str) -> &str {
    raw.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

/// Read one HTTP/1.1 request, head and body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return text.into_owned();
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
