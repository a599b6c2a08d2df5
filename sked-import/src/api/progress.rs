//! Job progress endpoint

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use sked_common::events::ProgressSnapshot;

/// GET /import/jobs/:id/progress
///
/// Latest retained snapshot; 404 once it has expired or for unknown jobs.
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProgressSnapshot>> {
    state
        .tracker
        .latest_snapshot(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No progress for job {}", job_id)))
}

pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/import/jobs/:id/progress", get(job_progress))
}
