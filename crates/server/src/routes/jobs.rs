// crates/server/src/routes/jobs.rs
//! Job control endpoints.
//!
//! - POST   /jobs             - Start a simulated job (authenticated)
//! - GET    /jobs/{id}        - Current job record
//! - DELETE /jobs/{id}        - Cancel a job (authenticated, owner only)
//! - GET    /jobs/{id}/stream - SSE stream of status changes

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobwatch_core::{simulated_work, JobRecord, JobStatus, StreamFrame};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use ts_rs::TS;

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_STEPS: u32 = 1_000;
const MAX_STEP_MS: u64 = 60_000;

#[derive(Debug, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub steps: u32,
    #[serde(default = "default_step_ms")]
    #[ts(type = "number")]
    pub step_ms: u64,
}

fn default_step_ms() -> u64 {
    1_000
}

#[derive(Debug, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    pub id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/jobs - Start a job running the built-in simulated body.
async fn create_job(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    if req.steps == 0 || req.steps > MAX_STEPS {
        return Err(ApiError::BadRequest(format!(
            "steps must be between 1 and {MAX_STEPS}"
        )));
    }
    if req.step_ms > MAX_STEP_MS {
        return Err(ApiError::BadRequest(format!(
            "stepMs must be at most {MAX_STEP_MS}"
        )));
    }

    let steps = req.steps;
    let step = Duration::from_millis(req.step_ms);
    let handle = state
        .runner
        .start(&user.user_id, move |ctx| simulated_work(ctx, steps, step))
        .await?;

    tracing::info!(job_id = %handle.id(), owner_id = %user.user_id, steps, "Job submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            id: handle.record.id.clone(),
            status: handle.record.status,
        }),
    ))
}

/// GET /api/jobs/{id} - Current job record.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.jobs.get_status(&id).await?))
}

/// DELETE /api/jobs/{id} - Cancel a job on behalf of the caller.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.jobs.cancel(&id, &user.user_id).await?;
    let response = if cancelled {
        CancelResponse {
            success: true,
            message: "Job cancelled".to_string(),
        }
    } else {
        CancelResponse {
            success: false,
            message: "Job already finished".to_string(),
        }
    };
    Ok(Json(response))
}

/// GET /api/jobs/{id}/stream - SSE stream of status changes.
///
/// Each frame's event name is the status event kind. Keep-alives are comment
/// frames. The response ends after `complete`, `error` or `timeout`.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let frames = state.stream.subscribe(id);

    let stream = async_stream::stream! {
        let mut frames = std::pin::pin!(frames);
        while let Some(frame) = frames.next().await {
            match frame {
                StreamFrame::KeepAlive => yield Ok(Event::default().comment("keep-alive")),
                StreamFrame::Event(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize status event");
                            continue;
                        }
                    };
                    yield Ok(Event::default().event(event.kind.as_str()).data(json));
                }
            }
        }
    };

    Sse::new(stream)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/jobs/{id}/stream", get(stream_job))
}
