//! Stage 5: SCHEDULE_IMPORT
//!
//! Commits one schedule entry per live row using the entity ids resolved in
//! ENTITY_CREATION. Uploads without schedule columns pass straight through.

use super::{JobOrchestrator, JobRun, RowTally};
use crate::collaborators::{with_timeout, ScheduleEntry};
use crate::models::column_mapping::{EntityType, MappedRecord};
use crate::utils::value_parsing::parse_day_of_week;
use sked_common::events::ImportStage;
use sked_common::{ErrorKind, Result};
use std::collections::BTreeMap;

/// Build the entry for one row, or say what is missing
fn schedule_entry(
    row_index: usize,
    record: &MappedRecord,
    ids: &BTreeMap<EntityType, String>,
) -> std::result::Result<ScheduleEntry, String> {
    let id = |entity_type: EntityType| {
        ids.get(&entity_type)
            .cloned()
            .ok_or_else(|| format!("No {} resolved", entity_type))
    };
    let day = record.text("day_of_week").unwrap_or_default();
    let day_of_week =
        parse_day_of_week(&day).ok_or_else(|| format!("Unrecognized day of week '{}'", day))?;

    Ok(ScheduleEntry {
        row_index,
        course_id: id(EntityType::Course)?,
        lecturer_id: id(EntityType::Lecturer)?,
        venue_id: id(EntityType::Venue)?,
        student_group_id: ids.get(&EntityType::StudentGroup).cloned(),
        day_of_week,
        start_time: record.text("start_time").ok_or("Missing start time")?,
        end_time: record.text("end_time").ok_or("Missing end time")?,
    })
}

impl JobOrchestrator {
    /// Stage 5: SCHEDULE_IMPORT - commit schedule entries
    ///
    /// # Errors
    /// Transient sink failures fail the stage. Conflicts (clashing slots,
    /// duplicates) and validation failures only fail the affected row.
    pub(super) async fn stage_schedule_import(&self, run: &mut JobRun) -> Result<()> {
        self.enter_stage(run, ImportStage::ScheduleImport).await?;

        if !run.job.mapping_config.has_schedule() {
            tracing::debug!(job_id = %run.job.id, "No schedule columns, nothing to import");
            return Ok(());
        }

        let batch = self.settings.progress_batch.max(1);
        let rows: Vec<usize> = run.live.iter().copied().collect();
        let mut tally = RowTally::default();
        let mut imported = 0usize;

        for row_index in rows {
            let entry = match (
                run.mapped
                    .get(row_index)
                    .and_then(|row| row.records.get(&EntityType::Schedule)),
                run.entity_ids.get(&row_index),
            ) {
                (Some(record), Some(ids)) => schedule_entry(row_index, record, ids),
                _ => Err("Row has no schedule record".to_string()),
            };

            match entry {
                Err(message) => tally.fail(row_index, ImportStage::ScheduleImport, message),
                Ok(entry) => {
                    self.ensure_current(run)?;
                    let result = with_timeout(
                        "schedule import",
                        self.settings.dependency_timeout,
                        self.collaborators.sink.import_schedule_entry(&entry),
                    )
                    .await;
                    self.beat(run).await?;
                    match result {
                        Ok(_) => {
                            imported += 1;
                            tally.succeed(row_index);
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::Validation) => {
                            tally.fail(row_index, ImportStage::ScheduleImport, e.to_string())
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if tally.pending() >= batch {
                self.flush_tally(run, &mut tally).await?;
            }
        }
        self.flush_tally(run, &mut tally).await?;

        tracing::info!(job_id = %run.job.id, imported, "Schedule import stage complete");
        Ok(())
    }
}
