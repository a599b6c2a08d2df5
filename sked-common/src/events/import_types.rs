//! Import job type definitions
//!
//! Supporting types shared between the import service and anything observing
//! its progress stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an import job
///
/// `Pending → Processing → {Completed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again (except explicit retry of `Failed`)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage cursor while a job is `Processing`
///
/// Declaration order is execution order; the derived `Ord` is relied on for
/// the "never regresses" check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStage {
    Parsing,
    Mapping,
    Validation,
    EntityCreation,
    ScheduleImport,
    Finalization,
}

impl ImportStage {
    /// All stages in execution order
    pub const ALL: [ImportStage; 6] = [
        ImportStage::Parsing,
        ImportStage::Mapping,
        ImportStage::Validation,
        ImportStage::EntityCreation,
        ImportStage::ScheduleImport,
        ImportStage::Finalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStage::Parsing => "PARSING",
            ImportStage::Mapping => "MAPPING",
            ImportStage::Validation => "VALIDATION",
            ImportStage::EntityCreation => "ENTITY_CREATION",
            ImportStage::ScheduleImport => "SCHEDULE_IMPORT",
            ImportStage::Finalization => "FINALIZATION",
        }
    }

    /// Stage following this one, `None` after finalization
    pub fn next(&self) -> Option<ImportStage> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable point-in-time view of a job's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: ImportStage,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub successful_rows: usize,
    pub failed_rows: usize,
    /// Percentage complete (0.0 - 100.0)
    pub percentage: f64,
    /// Rows per second, `None` until a throughput sample exists
    pub throughput: Option<f64>,
    /// Seconds remaining, `None` when speed is zero or unknown
    pub estimated_time_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_execution_order() {
        assert!(ImportStage::Parsing < ImportStage::Mapping);
        assert!(ImportStage::ScheduleImport < ImportStage::Finalization);
        assert_eq!(ImportStage::Validation.next(), Some(ImportStage::EntityCreation));
        assert_eq!(ImportStage::Finalization.next(), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let stage = serde_json::to_string(&ImportStage::EntityCreation).unwrap();
        assert_eq!(stage, "\"ENTITY_CREATION\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
