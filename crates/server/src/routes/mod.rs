//! API route handlers for the jobwatch server.

pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health - Health check
/// - POST   /api/jobs - Start a simulated job
/// - GET    /api/jobs/{id} - Current job record
/// - DELETE /api/jobs/{id} - Cancel a job
/// - GET    /api/jobs/{id}/stream - SSE stream of status changes
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router().merge(jobs::router()))
        .merge(metrics::router())
        .with_state(state)
}
