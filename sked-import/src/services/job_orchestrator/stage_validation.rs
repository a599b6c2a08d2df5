//! Stage 3: VALIDATION
//!
//! Fails every row the frozen validation result marked invalid, plus any
//! row that fails re-validation of its mapped values.

use super::{JobOrchestrator, JobRun, RowTally};
use crate::models::validation::IssueSeverity;
use crate::services::validator::validate_mapped_row;
use sked_common::events::ImportStage;
use sked_common::Result;

impl JobOrchestrator {
    /// Stage 3: VALIDATION - drop invalid rows
    pub(super) async fn stage_validation(&self, run: &mut JobRun) -> Result<()> {
        self.enter_stage(run, ImportStage::Validation).await?;

        let mut tally = RowTally::default();
        for mapped in &run.mapped {
            let mut errors: Vec<String> = run
                .job
                .validation_result
                .row_errors(mapped.row_index)
                .into_iter()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .collect();

            for issue in validate_mapped_row(mapped) {
                if issue.severity != IssueSeverity::Error {
                    continue;
                }
                let message = format!("{}: {}", issue.field, issue.message);
                if !errors.contains(&message) {
                    errors.push(message);
                }
            }

            if !run.job.validation_result.is_row_valid(mapped.row_index) && errors.is_empty() {
                errors.push("Row was rejected during validation".to_string());
            }
            if !errors.is_empty() {
                tally.fail(mapped.row_index, ImportStage::Validation, errors.join("; "));
            }
        }

        let rejected = tally.pending();
        self.flush_tally(run, &mut tally).await?;

        tracing::info!(
            job_id = %run.job.id,
            rejected,
            remaining = run.live.len(),
            "Validation stage complete"
        );
        Ok(())
    }
}
