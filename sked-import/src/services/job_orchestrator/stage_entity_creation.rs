//! Stage 4: ENTITY_CREATION
//!
//! Resolves every entity a live row references. Rows approved onto an
//! existing entity during review reuse that id; everything else is created
//! through the sink once per normalized name and shared by later rows.
//!
//! For uploads without schedule columns the entity records are the import,
//! so rows are counted here.

use super::{JobOrchestrator, JobRun, RowTally};
use crate::collaborators::with_timeout;
use crate::models::column_mapping::EntityType;
use crate::services::entity_matcher::{normalize_name, row_references};
use sked_common::events::ImportStage;
use sked_common::{ErrorKind, Result};
use std::collections::{BTreeMap, HashMap};

impl JobOrchestrator {
    /// Stage 4: ENTITY_CREATION - resolve or create referenced entities
    ///
    /// # Errors
    /// Transient sink failures fail the stage. Conflict and validation
    /// failures only fail the affected row.
    pub(super) async fn stage_entity_creation(&self, run: &mut JobRun) -> Result<()> {
        self.enter_stage(run, ImportStage::EntityCreation).await?;

        let has_schedule = run.job.mapping_config.has_schedule();
        let batch = self.settings.progress_batch.max(1);
        let rows: Vec<usize> = run.live.iter().copied().collect();

        // (entity type, normalized name) → created id, or the reason it failed
        let mut known: HashMap<(EntityType, String), std::result::Result<String, String>> = HashMap::new();
        let mut created = 0usize;
        let mut reused = 0usize;
        let mut tally = RowTally::default();

        for row_index in rows {
            let Some(mapped) = run.mapped.get(row_index) else {
                continue;
            };

            let mut ids: BTreeMap<EntityType, String> = BTreeMap::new();
            let mut failure: Option<String> = None;

            for (entity_type, record) in row_references(mapped) {
                if let Some(id) = run
                    .job
                    .resolved_entities
                    .get(&entity_type)
                    .and_then(|rows| rows.get(&row_index))
                {
                    ids.insert(entity_type, id.clone());
                    reused += 1;
                    continue;
                }

                let key = (entity_type, normalize_name(&record.text("name").unwrap_or_default()));
                let outcome = match known.get(&key) {
                    Some(outcome) => outcome.clone(),
                    None => {
                        self.ensure_current(run)?;
                        let result = with_timeout(
                            "entity creation",
                            self.settings.dependency_timeout,
                            self.collaborators.sink.create_entity(entity_type, &record),
                        )
                        .await;
                        self.beat(run).await?;
                        let outcome = match result {
                            Ok(id) => {
                                created += 1;
                                Ok(id)
                            }
                            Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::Validation) => {
                                Err(format!("{} could not be created: {}", entity_type, e))
                            }
                            Err(e) => return Err(e),
                        };
                        known.insert(key, outcome.clone());
                        outcome
                    }
                };

                match outcome {
                    Ok(id) => {
                        ids.insert(entity_type, id);
                    }
                    Err(message) => {
                        failure = Some(message);
                        break;
                    }
                }
            }

            match failure {
                Some(message) => tally.fail(row_index, ImportStage::EntityCreation, message),
                None if has_schedule => {
                    run.entity_ids.insert(row_index, ids);
                }
                None => tally.succeed(row_index),
            }

            if tally.pending() >= batch {
                self.flush_tally(run, &mut tally).await?;
            }
        }
        self.flush_tally(run, &mut tally).await?;

        tracing::info!(
            job_id = %run.job.id,
            created,
            reused,
            remaining = run.live.len(),
            "Entity creation stage complete"
        );
        Ok(())
    }
}
