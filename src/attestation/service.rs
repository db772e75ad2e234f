//! Attestation network access.
//!
//! # Responsibilities
//! - Define the `AttestationService` capability
//! - Query the guardian REST API for signed VAAs
//! - Treat "not found yet" as pending rather than as an error

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::attestation::types::{AttestationArtifact, AttestationError, MessageFingerprint};
use crate::config::AttestationConfig;

/// Source of signed attestations.
#[async_trait]
pub trait AttestationService: Send + Sync {
    /// Fetch the artifact for `fingerprint`. `Ok(None)` means quorum has not
    /// been reached yet. Must be free of side effects.
    async fn poll(
        &self,
        fingerprint: &MessageFingerprint,
    ) -> Result<Option<AttestationArtifact>, AttestationError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaaResponse {
    vaa_bytes: String,
}

/// Guardian REST client.
#[derive(Debug, Clone)]
pub struct GuardianRestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GuardianRestClient {
    pub fn new(config: &AttestationConfig) -> Result<Self, AttestationError> {
        let base_url: Url = config.base_url.parse().map_err(|e| {
            AttestationError::Transport(format!("Invalid attestation URL '{}': {}", config.base_url, e))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AttestationError::Transport(e.to_string()))?;

        tracing::info!(base_url = %base_url, "Attestation client initialized");
        Ok(Self { http, base_url })
    }

    fn vaa_url(&self, fingerprint: &MessageFingerprint) -> Result<Url, AttestationError> {
        let path = format!(
            "v1/signed_vaa/{}/{}/{}",
            fingerprint.emitter_chain,
            fingerprint.emitter_hex(),
            fingerprint.sequence
        );
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(&path)
            .map_err(|e| AttestationError::Transport(e.to_string()))
    }
}

#[async_trait]
impl AttestationService for GuardianRestClient {
    async fn poll(
        &self,
        fingerprint: &MessageFingerprint,
    ) -> Result<Option<AttestationArtifact>, AttestationError> {
        let url = self.vaa_url(fingerprint)?;
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AttestationError::Timeout
            } else {
                AttestationError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(AttestationError::Http {
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body: SignedVaaResponse = response
            .json()
            .await
            .map_err(|e| AttestationError::Malformed(e.to_string()))?;
        let bytes = BASE64
            .decode(body.vaa_bytes.as_bytes())
            .map_err(|e| AttestationError::Malformed(format!("vaaBytes: {}", e)))?;

        AttestationArtifact::parse(fingerprint, bytes).map(Some)
    }
}
