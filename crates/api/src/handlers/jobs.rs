//! Handlers for job submission and cancellation.
//!
//! Submission handlers deserialize the body into the operation's request
//! type and hand it to the [`JobEngine`](crate::engine::JobEngine).
//! Malformed bodies become `ValidationError` responses (400).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sourcepin_core::request::{AdjustRequest, CloneRequest, JobRequest, PullRequest};
use sourcepin_core::types::JobId;

use crate::engine::Submission;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /pull
pub async fn pull(
    State(state): State<AppState>,
    body: Result<Json<PullRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = body?;
    submit(&state, JobRequest::Pull(request)).await
}

/// POST /clone
pub async fn clone_repo(
    State(state): State<AppState>,
    body: Result<Json<CloneRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = body?;
    submit(&state, JobRequest::Clone(request)).await
}

/// POST /adjust
pub async fn adjust(
    State(state): State<AppState>,
    body: Result<Json<AdjustRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = body?;
    submit(&state, JobRequest::Adjust(request)).await
}

async fn submit(state: &AppState, request: JobRequest) -> AppResult<Response> {
    let response = match state.engine.submit(request).await? {
        Submission::Completed(outcome) => outcome.into_response(),
        Submission::Accepted(accepted) => {
            (StatusCode::ACCEPTED, Json(json!({"callback": accepted}))).into_response()
        }
    };
    Ok(response)
}

/// POST /cancel/{job_id}
///
/// Idempotent: repeating it for a job that is still winding down succeeds
/// again; unknown and finished jobs are a 400.
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let job_id = JobId::from(job_id);
    if state.engine.cancel(&job_id).await {
        Ok(Json(json!({"id": job_id, "cancelled": true})))
    } else {
        Err(AppError::JobNotFound(job_id.to_string()))
    }
}
