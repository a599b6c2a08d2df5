//! Stage 1: PARSING
//!
//! Fetches the uploaded file, normalizes it with the configured options and
//! seeds progress with the row count. The row count must match the frozen
//! validation result, otherwise row indices would no longer line up.

use super::{JobOrchestrator, JobRun};
use crate::collaborators::with_timeout;
use crate::services::normalizer::DataNormalizer;
use sked_common::events::ImportStage;
use sked_common::{Error, Result};

impl JobOrchestrator {
    /// Stage 1: PARSING - fetch and normalize the file
    ///
    /// # Errors
    /// `Transient` when the blob store times out; `Validation` when the file
    /// no longer matches what was validated.
    pub(super) async fn stage_parsing(&self, run: &mut JobRun) -> Result<()> {
        tracing::info!(job_id = %run.job.id, file_id = %run.job.file_id, "Stage PARSING");

        let raw = with_timeout(
            "blob store fetch",
            self.settings.dependency_timeout,
            self.collaborators.blob_store.fetch(&run.job.file_id),
        )
        .await?;

        let normalized = DataNormalizer::new(self.settings.normalization.clone()).normalize(&raw);
        let total_rows = normalized.data.row_count();
        let expected = run.job.validation_result.total_rows;
        if total_rows != expected {
            return Err(Error::Validation(format!(
                "File {} normalizes to {} rows but {} rows were validated",
                run.job.file_id, total_rows, expected
            )));
        }

        self.ensure_current(run)?;
        self.tracker
            .initialize_progress(run.job_id(), total_rows, ImportStage::Parsing)
            .await?;

        tracing::debug!(
            job_id = %run.job.id,
            total_rows,
            quality_score = normalized.quality_report.quality_score,
            "File parsed"
        );

        run.live = (0..total_rows).collect();
        run.data = Some(normalized.data);
        Ok(())
    }
}
