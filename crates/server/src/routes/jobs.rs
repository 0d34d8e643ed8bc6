// crates/server/src/routes/jobs.rs
//! API routes for background job management.
//!
//! - GET /jobs — list jobs (filterable by type/status, newest first)
//! - GET /jobs/{id} — one job's serialized form
//! - GET /jobs/{id}/history — the job's metric history
//! - POST /jobs/{id}/cancel — request cancellation
//! - GET /jobs/stream — SSE feed of job events (polling-free fallback to /ws)

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;

use trainyard_jobs::{message_type_for, HistoryEntry, JobStatus, JobSummary, JobType};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job type (wire name, e.g. `training`).
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Hard cap on the snapshot returned; no pagination cursor.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// GET /api/jobs — list jobs, newest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Json<Vec<JobSummary>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = state
        .store
        .list(query.job_type, query.status, limit)
        .iter()
        .map(|job| job.summary())
        .collect();
    Json(jobs)
}

/// GET /api/jobs/{id} — one job's serialized form.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    state
        .store
        .get(&id)
        .map(|job| Json(job.summary()))
        .ok_or(ApiError::JobNotFound(id))
}

/// GET /api/jobs/{id}/history — timestamped metric snapshots, append order.
async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    state
        .store
        .get(&id)
        .map(|job| Json(job.history))
        .ok_or(ApiError::JobNotFound(id))
}

/// POST /api/jobs/{id}/cancel — request cancellation.
///
/// Pending jobs cancel immediately; running jobs are asked to stop through
/// their progress callback. 404 for unknown ids, 409 for terminal jobs.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    if state.store.cancel(&id) {
        return Ok(Json(CancelResponse { cancelled: true }));
    }
    match state.store.get(&id) {
        None => Err(ApiError::JobNotFound(id)),
        Some(job) => Err(ApiError::InvalidState(format!(
            "job {} is already {}",
            id,
            job.status.as_str()
        ))),
    }
}

/// GET /api/jobs/stream — SSE stream of all job events.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.store.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Ok(event) = rx.recv().await {
            let Some(kind) = message_type_for(&event) else { continue };
            let payload = json!({ "type": kind, "job": event.job });
            yield Ok(Event::default().data(payload.to_string()));
        }
    };

    Sse::new(stream)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/history", get(job_history))
        .route("/jobs/{id}/cancel", post(cancel_job))
}
