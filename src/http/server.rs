//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the relay API handlers
//! - Wire up middleware (tracing, request timeout)
//! - Bind to a listener and shut down gracefully on Ctrl+C
//!
//! # Design Decisions
//! - Relays run as background tasks; requests only start, inspect or
//!   cancel them, so the request timeout stays short
//! - On shutdown every running relay is cancelled

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::http::handlers::{cancel_relay, create_relay, get_relay, health, AppState};
use crate::http::jobs::JobRegistry;

/// HTTP server for the relay API.
pub struct ApiServer {
    router: Router,
    jobs: JobRegistry,
}

impl ApiServer {
    pub fn new(state: AppState, config: &ServerConfig) -> Self {
        let jobs = state.jobs.clone();
        let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router, jobs }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let active = self.jobs.active();
        if active > 0 {
            tracing::warn!(active, "Cancelling running relays");
            self.jobs.cancel_all();
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/relays", post(create_relay))
        .route("/v1/relays/{id}", get(get_relay).delete(cancel_relay))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
