//! Relay HTTP API.
//!
//! # Data Flow
//! ```text
//! POST /v1/relays
//!     → handlers.rs (validate payload and destination, 400 on failure)
//!     → jobs.rs (register job, cancellation token)
//!     → background task: RelayOrchestrator::relay_with
//!         → observer updates the job's stage
//!         → finish() stores the artifacts or the error view
//! GET /v1/relays/{id}     → snapshot
//! DELETE /v1/relays/{id}  → cancel
//! ```

pub mod handlers;
pub mod jobs;
pub mod server;

pub use handlers::AppState;
pub use jobs::{JobRegistry, JobSnapshot};
pub use server::{build_router, ApiServer};
