//! Server-Sent Events (SSE) for import progress streaming

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only stream events of this job
    pub job_id: Option<String>,
}

/// GET /import/events[?job_id=] - SSE stream of `ImportEvent`s
///
/// Streams JobQueued, JobStarted, StageChanged, ProgressUpdated, JobRetrying,
/// JobStalled, JobCompleted, JobFailed and JobCancelled. Idle connections
/// receive a heartbeat every 15 seconds.
pub async fn import_event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sked_common::sse::create_event_sse_stream(&state.event_bus, filter.job_id)
}
