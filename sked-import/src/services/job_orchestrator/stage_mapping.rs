//! Stage 2: MAPPING
//!
//! Applies the frozen mapping set to every row.

use super::{JobOrchestrator, JobRun};
use sked_common::events::ImportStage;
use sked_common::{Error, Result};

impl JobOrchestrator {
    /// Stage 2: MAPPING - shape rows into per-entity records
    pub(super) async fn stage_mapping(&self, run: &mut JobRun) -> Result<()> {
        self.enter_stage(run, ImportStage::Mapping).await?;

        let data = run
            .data
            .take()
            .ok_or_else(|| Error::Internal("MAPPING reached without parsed data".to_string()))?;

        let mappings = &run.job.mapping_config;
        run.mapped = data
            .rows
            .iter()
            .enumerate()
            .map(|(row_index, row)| mappings.apply_row(row_index, row))
            .collect();

        tracing::debug!(
            job_id = %run.job.id,
            rows = run.mapped.len(),
            entity_types = ?mappings.entity_types(),
            "Rows mapped"
        );
        Ok(())
    }
}
