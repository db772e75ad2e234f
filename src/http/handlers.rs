//! Relay API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::chain::wallet::Signer;
use crate::http::jobs::{ErrorView, JobRegistry, JobSnapshot};
use crate::relay::builder::parse_destination;
use crate::relay::error::{Recovery, RelayError};
use crate::relay::orchestrator::{RelayOrchestrator, RelayStage};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RelayOrchestrator>,
    pub signer: Arc<dyn Signer>,
    pub jobs: JobRegistry,
}

/// How the request payload is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRelayRequest {
    pub payload: String,
    pub destination: String,
    #[serde(default)]
    pub encoding: PayloadEncoding,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_relays: usize,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorView,
}

impl ApiError {
    fn from_relay(status: StatusCode, err: &RelayError) -> Self {
        Self {
            status,
            body: ErrorView::from(err),
        }
    }

    fn not_found(id: Uuid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorView {
                kind: "not_found",
                message: format!("relay {} not found", id),
                recovery: Recovery::None,
                transaction_id: None,
                fingerprint: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// `POST /v1/relays`: validate, register and start a relay in the background.
pub async fn create_relay(
    State(state): State<AppState>,
    Json(request): Json<CreateRelayRequest>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let payload = decode_payload(&request)
        .map_err(|e| ApiError::from_relay(StatusCode::BAD_REQUEST, &e))?;
    parse_destination(&request.destination)
        .map_err(|e| ApiError::from_relay(StatusCode::BAD_REQUEST, &e))?;

    let (id, cancel) = state.jobs.create(&request.destination, payload.len());
    let snapshot = state.jobs.get(id).ok_or_else(|| ApiError::not_found(id))?;
    tracing::info!(relay_id = %id, destination = %request.destination, "Relay accepted");

    let AppState {
        orchestrator,
        signer,
        jobs,
    } = state;
    let destination = request.destination;
    tokio::spawn(async move {
        let observer = |stage: &RelayStage| jobs.set_stage(id, stage.clone());
        let result = orchestrator
            .relay_with(id, &payload, &destination, signer.as_ref(), &observer, &cancel)
            .await;
        jobs.finish(id, &result);
    });

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `GET /v1/relays/{id}`
pub async fn get_relay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state.jobs.get(id).map(Json).ok_or_else(|| ApiError::not_found(id))
}

/// `DELETE /v1/relays/{id}`: stop polling and retrying. A submitted
/// transaction is not recalled.
pub async fn cancel_relay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let snapshot = state.jobs.cancel(id).ok_or_else(|| ApiError::not_found(id))?;
    if snapshot.stage.is_terminal() {
        return Ok((StatusCode::CONFLICT, Json(snapshot)));
    }
    tracing::info!(relay_id = %id, stage = snapshot.stage.as_str(), "Relay cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_relays: state.jobs.active(),
    })
}

fn decode_payload(request: &CreateRelayRequest) -> Result<Vec<u8>, RelayError> {
    let payload = match request.encoding {
        PayloadEncoding::Utf8 => request.payload.as_bytes().to_vec(),
        PayloadEncoding::Base64 => BASE64
            .decode(request.payload.as_bytes())
            .map_err(|e| RelayError::InvalidInput(format!("payload is not valid base64: {}", e)))?,
    };
    if payload.is_empty() {
        return Err(RelayError::InvalidInput("payload is empty".to_string()));
    }
    Ok(payload)
}
