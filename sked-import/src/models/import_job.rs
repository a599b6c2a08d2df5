//! Import job record and state machine
//!
//! `PENDING → PROCESSING → {COMPLETED | FAILED | CANCELLED}`, with the
//! nested stage cursor `PARSING → … → FINALIZATION` while processing.
//! Automatic retries and stall requeues stay PROCESSING and only rewind the
//! stage cursor; the sole way out of a terminal state is an explicit retry
//! (`FAILED → PENDING`). Only status, progress and the bookkeeping fields
//! change after creation; mapping and validation inputs are frozen.

use crate::models::column_mapping::{EntityType, FrozenMappingSet};
use crate::models::validation::ValidationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sked_common::events::{ImportStage, JobStatus, ProgressSnapshot};
use sked_common::{Error, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Approved review resolutions: entity type → row → existing entity id
pub type ResolvedEntities = BTreeMap<EntityType, BTreeMap<usize, String>>;

/// Everything needed to commit an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJobSpec {
    pub user_id: String,
    pub file_id: String,
    pub mapping_config: FrozenMappingSet,
    pub validation_result: ValidationResult,
    #[serde(default)]
    pub resolved_entities: ResolvedEntities,
}

/// Row counters and stage cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub successful_rows: usize,
    pub failed_rows: usize,
    pub current_stage: ImportStage,
    /// Seconds, `None` when speed is zero or unknown
    pub estimated_time_remaining: Option<f64>,
}

impl Default for ImportProgress {
    fn default() -> Self {
        Self {
            total_rows: 0,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            current_stage: ImportStage::Parsing,
            estimated_time_remaining: None,
        }
    }
}

impl ImportProgress {
    /// Percentage complete (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_rows > 0 {
            (self.processed_rows as f64 / self.total_rows as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// One failed attempt, kept for debugging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Backoff before the next attempt, 0 when none followed
    pub delay_ms: u64,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// A row that did not import, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_index: usize,
    pub stage: ImportStage,
    pub message: String,
}

/// Persisted import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub user_id: String,
    pub file_id: String,
    pub mapping_config: FrozenMappingSet,
    pub validation_result: ValidationResult,
    #[serde(default)]
    pub resolved_entities: ResolvedEntities,
    pub status: JobStatus,
    pub progress: ImportProgress,
    /// Attempts started so far (the running one included)
    pub attempts: u32,
    #[serde(default)]
    pub attempt_log: Vec<AttemptRecord>,
    #[serde(default)]
    pub stall_count: u32,
    /// Set while a PROCESSING job waits to be rerun from PARSING
    #[serde(default)]
    pub rerun_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub row_failures: Vec<RowFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    /// Create a pending job with a fresh identity
    pub fn new(spec: ImportJobSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: spec.user_id,
            file_id: spec.file_id,
            mapping_config: spec.mapping_config,
            validation_result: spec.validation_result,
            resolved_entities: spec.resolved_entities,
            status: JobStatus::Pending,
            progress: ImportProgress::default(),
            attempts: 0,
            attempt_log: Vec::new(),
            stall_count: 0,
            rerun_at: None,
            last_heartbeat: None,
            failure_reason: None,
            row_failures: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to new status
    ///
    /// Terminal states stamp `completed_at`.
    ///
    /// # Errors
    /// `Conflict` for an edge outside the state machine
    pub fn transition_to(&mut self, new_status: JobStatus) -> Result<JobStatus> {
        let old = self.status;
        if !can_transition(old, new_status) {
            return Err(Error::Conflict(format!(
                "Job {} cannot move from {} to {}",
                self.id, old, new_status
            )));
        }
        self.status = new_status;

        if new_status.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.progress.estimated_time_remaining = None;
            self.rerun_at = None;
        }

        Ok(old)
    }

    /// Rewind to the start of the pipeline for another run
    ///
    /// Identity, inputs and the attempt log survive; counters and
    /// per-row failures do not.
    pub fn reset_progress(&mut self) {
        let total_rows = self.progress.total_rows;
        self.progress = ImportProgress {
            total_rows,
            ..ImportProgress::default()
        };
        self.row_failures.clear();
    }

    /// Keep the job PROCESSING and rerun it from PARSING at `at`
    ///
    /// # Errors
    /// `Conflict` unless the job is PROCESSING
    pub fn schedule_rerun(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(Error::Conflict(format!(
                "Job {} is {}, only processing jobs are rerun",
                self.id, self.status
            )));
        }
        self.reset_progress();
        self.rerun_at = Some(at);
        self.last_heartbeat = None;
        Ok(())
    }

    /// PROCESSING with no run attached, waiting for a worker
    pub fn awaiting_rerun(&self) -> bool {
        self.status == JobStatus::Processing && self.rerun_at.is_some()
    }

    /// Explicit retry of a failed job
    pub fn reset_for_retry(&mut self) -> Result<()> {
        self.transition_to(JobStatus::Pending)?;
        self.reset_progress();
        self.attempts = 0;
        self.stall_count = 0;
        self.rerun_at = None;
        self.failure_reason = None;
        self.completed_at = None;
        self.last_heartbeat = None;
        Ok(())
    }

    pub fn is_stalled(&self, now: DateTime<Utc>, heartbeat_timeout: chrono::Duration) -> bool {
        if self.status != JobStatus::Processing || self.rerun_at.is_some() {
            return false;
        }
        let since = self.last_heartbeat.or(self.started_at).unwrap_or(self.created_at);
        now - since > heartbeat_timeout
    }

    /// Point-in-time view for subscribers
    pub fn snapshot(&self, throughput: Option<f64>, message: Option<String>) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.id.clone(),
            status: self.status,
            stage: self.progress.current_stage,
            total_rows: self.progress.total_rows,
            processed_rows: self.progress.processed_rows,
            successful_rows: self.progress.successful_rows,
            failed_rows: self.progress.failed_rows,
            percentage: self.progress.percentage(),
            throughput,
            estimated_time_remaining: self.progress.estimated_time_remaining,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Edges of the job state machine
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Cancelled)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled)
            | (Failed, Pending)
    )
}
