//! Stage 6: FINALIZATION
//!
//! Checks the row accounting and marks the job completed.

use super::{JobOrchestrator, JobRun};
use sked_common::events::ImportStage;
use sked_common::{Error, Result};

impl JobOrchestrator {
    /// Stage 6: FINALIZATION - complete the job
    ///
    /// # Errors
    /// `Fatal` when some row was never counted
    pub(super) async fn stage_finalization(&self, run: &mut JobRun) -> Result<()> {
        self.enter_stage(run, ImportStage::Finalization).await?;

        let job = self.jobs.get(run.job_id()).await?;
        let progress = &job.progress;
        if !run.live.is_empty() || progress.processed_rows != progress.total_rows {
            return Err(Error::Fatal(format!(
                "Row accounting mismatch: {} of {} rows processed, {} unaccounted",
                progress.processed_rows,
                progress.total_rows,
                run.live.len()
            )));
        }

        self.ensure_current(run)?;
        self.tracker.complete_job(run.job_id()).await?;

        if let Err(e) = self.enforce_retention().await {
            tracing::warn!(error = %e, "Retention pass failed");
        }
        Ok(())
    }
}
