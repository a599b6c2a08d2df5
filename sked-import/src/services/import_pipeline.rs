//! Import preparation pipeline
//!
//! Everything that happens before a job is queued:
//! 1. fetch + normalize the file, propose column mappings ([`ImportPipeline::prepare`])
//! 2. freeze the (possibly edited) mappings and validate rows ([`ImportPipeline::validate`])
//! 3. match referenced entities and open a review session ([`ImportPipeline::open_review`])
//! 4. close the session and queue the job ([`ImportPipeline::commit`])
//!
//! Mappings are detected on the normalized headers, the same headers the
//! orchestrator sees when it normalizes the file again with the same options.

use crate::collaborators::{with_timeout, Collaborators, ExistingEntity};
use crate::models::column_mapping::{EntityType, FrozenMappingSet, MappedRow, MappingDetectionResult, MappingSet};
use crate::models::import_job::ImportJobSpec;
use crate::models::normalization::{NormalizationOptions, NormalizationResult};
use crate::models::review::{ConfidenceThresholds, ReviewSession};
use crate::models::validation::ValidationResult;
use crate::services::column_mapper::ColumnMappingResolver;
use crate::services::entity_matcher::{referenced_records, EntityMatcher};
use crate::services::job_orchestrator::JobOrchestrator;
use crate::services::normalizer::DataNormalizer;
use crate::services::review_engine::ReviewEngine;
use crate::services::validator::validate_rows;
use sked_common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A normalized file with proposed mappings
#[derive(Debug, Clone)]
pub struct PreparedImport {
    pub file_id: String,
    pub normalization: NormalizationResult,
    pub detection: MappingDetectionResult,
}

impl PreparedImport {
    /// Proposed mappings as an editable set
    pub fn mapping_set(&self) -> MappingSet {
        MappingSet::new(self.detection.mappings())
    }
}

pub struct ImportPipeline {
    collaborators: Collaborators,
    normalizer: DataNormalizer,
    resolver: ColumnMappingResolver,
    matcher: EntityMatcher,
    review: Arc<ReviewEngine>,
    orchestrator: Arc<JobOrchestrator>,
    dependency_timeout: Duration,
}

impl ImportPipeline {
    pub fn new(
        collaborators: Collaborators,
        normalization: NormalizationOptions,
        review: Arc<ReviewEngine>,
        orchestrator: Arc<JobOrchestrator>,
        dependency_timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            normalizer: DataNormalizer::new(normalization),
            resolver: ColumnMappingResolver::new(),
            matcher: EntityMatcher::new(),
            review,
            orchestrator,
            dependency_timeout,
        }
    }

    /// Fetch and normalize a file, then propose mappings for its headers
    pub async fn prepare(&self, file_id: &str) -> Result<PreparedImport> {
        let raw = with_timeout(
            "blob store fetch",
            self.dependency_timeout,
            self.collaborators.blob_store.fetch(file_id),
        )
        .await?;

        let normalization = self.normalizer.normalize(&raw);
        let detection = self
            .resolver
            .detect_column_mappings(normalization.data.headers.as_slice());

        tracing::info!(
            file_id,
            rows = normalization.data.row_count(),
            quality_score = normalization.quality_report.quality_score,
            suggestions = detection.suggestions.len(),
            conflicting = detection.conflicting_columns.len(),
            unmapped = detection.unmapped_columns.len(),
            "Import prepared"
        );
        Ok(PreparedImport {
            file_id: file_id.to_string(),
            normalization,
            detection,
        })
    }

    /// Freeze mappings and validate every row
    ///
    /// # Errors
    /// `Validation` listing the uncovered required fields
    pub fn validate(
        &self,
        prepared: &PreparedImport,
        mappings: MappingSet,
    ) -> Result<(FrozenMappingSet, ValidationResult)> {
        let frozen = mappings.freeze()?;
        let validation = validate_rows(&prepared.normalization.data, &frozen);
        Ok((frozen, validation))
    }

    /// Match the entities valid rows reference and open a review session
    ///
    /// Automatic approvals are applied straight away, so only matches
    /// between the thresholds are left for a human.
    pub async fn open_review(
        &self,
        session_id: &str,
        user_id: &str,
        prepared: &PreparedImport,
        frozen: &FrozenMappingSet,
        validation: &ValidationResult,
        thresholds: Option<ConfidenceThresholds>,
    ) -> Result<ReviewSession> {
        let rows: Vec<MappedRow> = prepared
            .normalization
            .data
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, _)| validation.is_row_valid(*idx))
            .map(|(idx, row)| frozen.apply_row(idx, row))
            .collect();
        let records = referenced_records(&rows);

        let mut existing: BTreeMap<EntityType, Vec<ExistingEntity>> = BTreeMap::new();
        for entity_type in records.keys() {
            let entities = with_timeout(
                "entity directory lookup",
                self.dependency_timeout,
                self.collaborators.directory.existing(*entity_type),
            )
            .await?;
            existing.insert(*entity_type, entities);
        }

        let matches = self.matcher.ambiguous_matches(&records, &existing);
        self.review
            .create_review_session(session_id, user_id, matches, thresholds)
            .await?;
        self.review
            .apply_automatic_approvals(session_id, user_id)
            .await?;
        self.review.get_session(session_id, user_id).await
    }

    /// Close the review session and queue the import job
    ///
    /// # Errors
    /// `Conflict` while matches are still undecided; `NotFound` when the
    /// session is gone.
    pub async fn commit(
        &self,
        session_id: &str,
        user_id: &str,
        file_id: &str,
        frozen: FrozenMappingSet,
        validation: ValidationResult,
    ) -> Result<String> {
        let stats = self.review.get_review_statistics(session_id, user_id).await?;
        if stats.requires_manual_review {
            return Err(Error::Conflict(format!(
                "{} matches still need a decision",
                stats.totals.undecided()
            )));
        }

        let resolved_entities = self.review.complete_session(session_id, user_id).await?;
        self.orchestrator
            .create_import_job(ImportJobSpec {
                user_id: user_id.to_string(),
                file_id: file_id.to_string(),
                mapping_config: frozen,
                validation_result: validation,
                resolved_entities,
            })
            .await
    }
}
