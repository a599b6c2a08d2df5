//! Entity Matcher
//!
//! Resolves the entity references in mapped rows against existing entities.
//! Schedule rows reference a course, lecturer, venue and (optionally) a
//! student group by name; uploads of standalone entities carry the records
//! directly.
//!
//! **Match rules:**
//! - Exact: an identity field (email, staff id, code) or the normalized name
//!   equals an existing entity's → confidence 1.0
//! - Fuzzy: normalized-name similarity above 0.5, best five kept
//! - None: no candidate

use crate::collaborators::ExistingEntity;
use crate::models::column_mapping::{EntityType, MappedRecord, MappedRow};
use crate::models::parsed_data::CellValue;
use crate::models::review::{CandidateMatch, EntityMatches, MatchResult, MatchType};
use crate::services::column_mapper::similarity;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_CANDIDATE_FLOOR: f64 = 0.5;
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

/// Fields compared for equality only
fn identity_fields(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Lecturer => &["email", "staff_id"],
        EntityType::Venue | EntityType::Course => &["code"],
        EntityType::StudentGroup | EntityType::Schedule => &[],
    }
}

/// Lower-case, punctuation stripped, single spaces
pub fn normalize_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-row records of each referenced entity type
///
/// Direct entity records win over references derived from schedule fields.
pub fn referenced_records(rows: &[MappedRow]) -> BTreeMap<EntityType, Vec<MappedRecord>> {
    let mut out: BTreeMap<EntityType, Vec<MappedRecord>> = BTreeMap::new();
    for row in rows {
        for (entity_type, record) in row_references(row) {
            out.entry(entity_type).or_default().push(record);
        }
    }
    out
}

/// Referenced entity records of one row
pub fn row_references(row: &MappedRow) -> BTreeMap<EntityType, MappedRecord> {
    let mut refs: BTreeMap<EntityType, MappedRecord> = BTreeMap::new();

    if let Some(schedule) = row.records.get(&EntityType::Schedule) {
        let derived = [
            (EntityType::Course, "course_name", Some(("course_code", "code"))),
            (EntityType::Lecturer, "lecturer_name", None),
            (EntityType::Venue, "venue_name", None),
            (EntityType::StudentGroup, "student_group", None),
        ];
        for (entity_type, name_field, extra) in derived {
            let Some(name) = schedule.text(name_field) else {
                continue;
            };
            let mut record = MappedRecord::new(entity_type, row.row_index);
            record.fields.insert("name".to_string(), CellValue::Text(name));
            if let Some((from, to)) = extra {
                if let Some(value) = schedule.text(from) {
                    record.fields.insert(to.to_string(), CellValue::Text(value));
                }
            }
            refs.insert(entity_type, record);
        }
    }

    for (entity_type, record) in &row.records {
        if *entity_type != EntityType::Schedule && record.text("name").is_some() {
            refs.insert(*entity_type, record.clone());
        }
    }

    refs
}

/// Entity Matcher
pub struct EntityMatcher {
    candidate_floor: f64,
    max_candidates: usize,
}

impl Default for EntityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityMatcher {
    pub fn new() -> Self {
        Self {
            candidate_floor: DEFAULT_CANDIDATE_FLOOR,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Match one record against existing entities
    pub fn match_record(&self, record: &MappedRecord, existing: &[ExistingEntity]) -> MatchResult {
        let source_value = record.text("name").unwrap_or_default();
        let key = normalize_name(&source_value);

        for entity in existing {
            let mut matched_fields = Vec::new();
            for field in identity_fields(record.entity_type) {
                let (Some(ours), Some(theirs)) = (record.text(field), entity.field(field)) else {
                    continue;
                };
                if normalize_name(&ours) == normalize_name(theirs) {
                    matched_fields.push(field.to_string());
                }
            }
            if !key.is_empty() && entity.field("name").map(normalize_name).as_deref() == Some(key.as_str()) {
                matched_fields.push("name".to_string());
            }

            if !matched_fields.is_empty() {
                return MatchResult {
                    entity_id: Some(entity.id.clone()),
                    confidence: 1.0,
                    match_type: MatchType::Exact,
                    suggested_matches: vec![CandidateMatch {
                        candidate_id: entity.id.clone(),
                        confidence: 1.0,
                        matching_fields: matched_fields,
                    }],
                    source_value,
                };
            }
        }

        if key.is_empty() {
            return MatchResult::no_match(source_value);
        }

        let mut candidates: Vec<CandidateMatch> = existing
            .iter()
            .filter_map(|entity| {
                let name = normalize_name(entity.field("name")?);
                let score = similarity(&key, &name);
                (score > self.candidate_floor).then(|| CandidateMatch {
                    candidate_id: entity.id.clone(),
                    confidence: score,
                    matching_fields: vec!["name".to_string()],
                })
            })
            .collect();

        if candidates.is_empty() {
            return MatchResult::no_match(source_value);
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        candidates.truncate(self.max_candidates);

        MatchResult {
            entity_id: Some(candidates[0].candidate_id.clone()),
            confidence: candidates[0].confidence,
            match_type: MatchType::Fuzzy,
            suggested_matches: candidates,
            source_value,
        }
    }

    /// Match every record of one entity type; keyed by source row
    pub fn match_rows(
        &self,
        records: &[MappedRecord],
        existing: &[ExistingEntity],
    ) -> BTreeMap<usize, MatchResult> {
        records
            .iter()
            .map(|record| (record.row_index, self.match_record(record, existing)))
            .collect()
    }

    /// Rows that need a decision: those with at least one candidate
    ///
    /// Rows without candidates are created as new entities and never enter
    /// a review session.
    pub fn ambiguous_matches(
        &self,
        records: &BTreeMap<EntityType, Vec<MappedRecord>>,
        existing: &BTreeMap<EntityType, Vec<ExistingEntity>>,
    ) -> EntityMatches {
        let mut out = EntityMatches::new();
        for (entity_type, rows) in records {
            let known = existing.get(entity_type).map(Vec::as_slice).unwrap_or(&[]);
            let matches: BTreeMap<usize, MatchResult> = self
                .match_rows(rows, known)
                .into_iter()
                .filter(|(_, m)| m.is_ambiguous())
                .collect();
            debug!(entity_type = %entity_type, candidates = matches.len(), "Entity matching done");
            if !matches.is_empty() {
                out.insert(*entity_type, matches);
            }
        }
        out
    }
}
