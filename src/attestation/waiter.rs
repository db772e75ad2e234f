//! Fingerprint extraction and attestation polling.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::attestation::service::AttestationService;
use crate::attestation::types::{AttestationArtifact, MessageFingerprint};
use crate::chain::types::Identity;
use crate::observability::metrics;
use crate::relay::error::RelayError;

const SEQUENCE_MARKER: &str = "Sequence: ";

/// Find the message sequence the core bridge logged for a finalized
/// transaction. The last `Sequence:` line wins.
pub fn extract_fingerprint(
    logs: &[String],
    emitter_chain: u16,
    emitter: Identity,
) -> Option<MessageFingerprint> {
    logs.iter().rev().find_map(|line| {
        let (_, rest) = line.split_once(SEQUENCE_MARKER)?;
        let sequence = rest.trim().parse::<u64>().ok()?;
        Some(MessageFingerprint {
            emitter_chain,
            emitter,
            sequence,
        })
    })
}

/// Polls the attestation network until a signed artifact is available.
pub struct AttestationWaiter {
    service: Arc<dyn AttestationService>,
    poll_interval: Duration,
}

impl AttestationWaiter {
    pub fn new(service: Arc<dyn AttestationService>, poll_interval: Duration) -> Self {
        Self {
            service,
            poll_interval,
        }
    }

    /// Poll until the artifact for `fingerprint` exists or `timeout` elapses.
    ///
    /// Transient service errors are logged and polling continues. Calling
    /// this again with the same fingerprint is safe.
    pub async fn await_attestation(
        &self,
        fingerprint: &MessageFingerprint,
        timeout: Duration,
    ) -> Result<AttestationArtifact, RelayError> {
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            metrics::record_attestation_poll();

            match timeout_at(deadline, self.service.poll(fingerprint)).await {
                Ok(Ok(Some(artifact))) => {
                    tracing::info!(
                        fingerprint = %fingerprint,
                        polls,
                        guardian_set = artifact.guardian_set_index,
                        signatures = artifact.signature_count,
                        "Attestation available"
                    );
                    return Ok(artifact);
                }
                Ok(Ok(None)) => {
                    tracing::debug!(fingerprint = %fingerprint, polls, "Attestation pending");
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(fingerprint = %fingerprint, polls, error = %e, "Attestation poll failed, will retry");
                }
                Ok(Err(e)) => {
                    tracing::error!(fingerprint = %fingerprint, error = %e, "Attestation rejected");
                    return Err(RelayError::Attestation {
                        fingerprint: *fingerprint,
                        reason: e.to_string(),
                    });
                }
                Err(_) => break,
            }

            let next = Instant::now() + self.poll_interval;
            sleep_until(next.min(deadline)).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        tracing::warn!(fingerprint = %fingerprint, polls, timeout_ms = timeout.as_millis() as u64, "Attestation timed out");
        Err(RelayError::AttestationTimeout {
            fingerprint: *fingerprint,
            timeout,
            polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::types::{encode_vaa, AttestationError, GuardianSignature, VaaBody};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fingerprint() -> MessageFingerprint {
        MessageFingerprint {
            emitter_chain: 1,
            emitter: Identity::new([8; 32]),
            sequence: 11,
        }
    }

    fn artifact(fp: &MessageFingerprint) -> AttestationArtifact {
        let body = VaaBody {
            timestamp: 0,
            nonce: 0,
            emitter_chain: fp.emitter_chain,
            emitter_address: *fp.emitter.as_bytes(),
            sequence: fp.sequence,
            consistency_level: 1,
            payload: b"hi".to_vec(),
        };
        let sigs = [GuardianSignature { index: 0, signature: [1; 65] }];
        AttestationArtifact::parse(fp, encode_vaa(0, &sigs, &body)).unwrap()
    }

    /// Pending for `pending` polls, failing transiently on the first, then ready.
    struct Flaky {
        pending: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AttestationService for Flaky {
        async fn poll(
            &self,
            fp: &MessageFingerprint,
        ) -> Result<Option<AttestationArtifact>, AttestationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(AttestationError::Http { status: 503 });
            }
            if n < self.pending {
                return Ok(None);
            }
            Ok(Some(artifact(fp)))
        }
    }

    struct Broken;

    #[async_trait]
    impl AttestationService for Broken {
        async fn poll(
            &self,
            _fp: &MessageFingerprint,
        ) -> Result<Option<AttestationArtifact>, AttestationError> {
            Err(AttestationError::Malformed("bad header".to_string()))
        }
    }

    #[test]
    fn test_extract_last_sequence() {
        let logs = vec![
            "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth invoke [1]".to_string(),
            "Program log: Sequence: 4".to_string(),
            "Program log: Sequence: 5".to_string(),
            "Program worm2ZoG2kUd4vFXhvjh93UUH596ayRfgQ2MgjNMTth success".to_string(),
        ];
        let fp = extract_fingerprint(&logs, 1, Identity::new([8; 32])).unwrap();
        assert_eq!(fp.sequence, 5);
        assert_eq!(fp.emitter_chain, 1);
    }

    #[test]
    fn test_extract_missing_sequence() {
        let logs = vec!["Program log: Sequence: abc".to_string()];
        assert!(extract_fingerprint(&logs, 1, Identity::new([8; 32])).is_none());
        assert!(extract_fingerprint(&[], 1, Identity::new([8; 32])).is_none());
    }

    #[tokio::test]
    async fn test_waits_through_pending_and_transient() {
        let service = Arc::new(Flaky { pending: 3, calls: AtomicU32::new(0) });
        let waiter = AttestationWaiter::new(service.clone(), Duration::from_millis(5));

        let artifact = waiter
            .await_attestation(&fingerprint(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(artifact.fingerprint, fingerprint());
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_reports_polls() {
        let service = Arc::new(Flaky { pending: u32::MAX, calls: AtomicU32::new(0) });
        let waiter = AttestationWaiter::new(service, Duration::from_millis(10));

        let err = waiter
            .await_attestation(&fingerprint(), Duration::from_millis(55))
            .await
            .unwrap_err();
        match err {
            RelayError::AttestationTimeout { polls, timeout, .. } => {
                assert!(polls >= 2);
                assert_eq!(timeout, Duration::from_millis(55));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_is_terminal() {
        let waiter = AttestationWaiter::new(Arc::new(Broken), Duration::from_millis(5));
        let err = waiter
            .await_attestation(&fingerprint(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Attestation { .. }));
    }
}
