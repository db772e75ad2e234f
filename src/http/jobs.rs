//! In-memory registry of relays started through the API.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::attestation::types::{AttestationArtifact, MessageFingerprint};
use crate::chain::types::{now_ms, TransactionId};
use crate::config::ServerConfig;
use crate::relay::error::{Recovery, RelayError};
use crate::relay::orchestrator::RelayStage;

/// Client-facing view of an attestation artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactView {
    pub emitter_chain: u16,
    pub emitter: String,
    pub sequence: u64,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub digest: String,
    pub vaa: String,
}

impl From<&AttestationArtifact> for ArtifactView {
    fn from(artifact: &AttestationArtifact) -> Self {
        Self {
            emitter_chain: artifact.fingerprint.emitter_chain,
            emitter: artifact.fingerprint.emitter.to_base58(),
            sequence: artifact.fingerprint.sequence,
            guardian_set_index: artifact.guardian_set_index,
            signature_count: artifact.signature_count,
            digest: artifact.digest.to_string(),
            vaa: BASE64.encode(&artifact.bytes),
        }
    }
}

/// Client-facing view of a relay failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorView {
    pub kind: &'static str,
    pub message: String,
    pub recovery: Recovery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<MessageFingerprint>,
}

impl From<&RelayError> for ErrorView {
    fn from(err: &RelayError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            recovery: err.recovery(),
            transaction_id: err.transaction_id().cloned(),
            fingerprint: err.fingerprint().copied(),
        }
    }
}

/// Point-in-time state of one relay job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub destination: String,
    pub payload_len: usize,
    #[serde(flatten)]
    pub stage: RelayStage,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// One per message part, in payload order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancellationToken,
}

/// Shared job table. Cheap to clone.
///
/// Finished jobs are kept for `retention`, and at most `max_finished` of
/// them; running jobs are never dropped.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    retention: Duration,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_retention(
            Duration::from_secs(config.job_retention_secs),
            config.max_finished_jobs,
        )
    }

    pub fn with_retention(retention: Duration, max_finished: usize) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            retention,
            max_finished,
        }
    }

    /// Register a job and return its id and cancellation token.
    pub fn create(&self, destination: &str, payload_len: usize) -> (Uuid, CancellationToken) {
        self.prune();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let now = now_ms();
        self.jobs.insert(
            id,
            JobEntry {
                snapshot: JobSnapshot {
                    id,
                    destination: destination.to_string(),
                    payload_len,
                    stage: RelayStage::Building,
                    created_at_ms: now,
                    updated_at_ms: now,
                    artifacts: Vec::new(),
                    error: None,
                },
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    /// Record progress. Ignored once the job is terminal.
    pub fn set_stage(&self, id: Uuid, stage: RelayStage) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            if !entry.snapshot.stage.is_terminal() {
                entry.snapshot.stage = stage;
                entry.snapshot.updated_at_ms = now_ms();
            }
        }
    }

    /// Record the final outcome.
    pub fn finish(&self, id: Uuid, result: &Result<Vec<AttestationArtifact>, RelayError>) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            let snapshot = &mut entry.snapshot;
            match result {
                Ok(artifacts) => {
                    snapshot.stage = RelayStage::Done;
                    snapshot.artifacts = artifacts.iter().map(ArtifactView::from).collect();
                }
                Err(err) => {
                    snapshot.stage = RelayStage::Failed(err.to_string());
                    snapshot.error = Some(ErrorView::from(err));
                }
            }
            snapshot.updated_at_ms = now_ms();
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&id).map(|entry| entry.snapshot.clone())
    }

    /// Request cancellation. Returns the snapshot, or `None` for unknown ids.
    pub fn cancel(&self, id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&id).map(|entry| {
            entry.cancel.cancel();
            entry.snapshot.clone()
        })
    }

    /// Cancel every job still running.
    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            if !entry.snapshot.stage.is_terminal() {
                entry.cancel.cancel();
            }
        }
    }

    /// Jobs not yet done or failed.
    pub fn active(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| !entry.snapshot.stage.is_terminal())
            .count()
    }

    /// Drop finished jobs past the retention window, then the oldest
    /// finished jobs beyond the cap. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let cutoff = now_ms().saturating_sub(self.retention.as_millis() as u64);
        let mut removed = 0;
        self.jobs.retain(|_, entry| {
            let keep = !entry.snapshot.stage.is_terminal() || entry.snapshot.updated_at_ms > cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });

        let mut finished: Vec<(u64, Uuid)> = self
            .jobs
            .iter()
            .filter(|entry| entry.snapshot.stage.is_terminal())
            .map(|entry| (entry.snapshot.updated_at_ms, *entry.key()))
            .collect();
        if finished.len() > self.max_finished {
            finished.sort_unstable();
            let excess = finished.len() - self.max_finished;
            for (_, id) in &finished[..excess] {
                if self.jobs.remove(id).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, remaining = self.jobs.len(), "Pruned finished relays");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
