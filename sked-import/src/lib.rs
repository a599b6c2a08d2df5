//! sked-import library interface
//!
//! The import core: normalization, column mapping, validation, entity match
//! review, and the job orchestrator with its progress tracker. The binary
//! wires these together behind a small read-only HTTP surface; everything
//! else drives the services directly (see [`services::ImportPipeline`]).

pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::services::{JobOrchestrator, ProgressTracker};
use axum::Router;
use chrono::{DateTime, Utc};
use sked_common::events::EventBus;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub tracker: Arc<ProgressTracker>,
    pub orchestrator: Arc<JobOrchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        event_bus: EventBus,
        tracker: Arc<ProgressTracker>,
        orchestrator: Arc<JobOrchestrator>,
    ) -> Self {
        Self {
            event_bus,
            tracker,
            orchestrator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/import/events", get(api::import_event_stream))
        .merge(api::progress_routes())
        .merge(api::health_routes())
        .with_state(state)
}
