//! Column Mapping Resolver
//!
//! Scores source headers against the target field catalog with normalized
//! Levenshtein similarity and proposes one target field per header.
//!
//! **Algorithm:**
//! 1. Reduce each header to a lowercase alphanumeric key
//! 2. Score the key against every field name and alias of every entity type;
//!    keep candidates with similarity above the floor (0.3)
//! 3. Rank entity types by dominance (sum of each header's best similarity
//!    for that type) to break similarity ties
//! 4. Assign greedily, best candidate first, so no two headers claim the
//!    same target field
//!
//! A header with no candidate above the floor is unmapped. A header whose
//! candidates were all claimed by better matches is reported as conflicting,
//! with those candidates, for a manual override.

use crate::models::column_mapping::{
    ColumnConflict, ColumnMapping, EntityType, FieldCandidate, MappingCompleteness, MappingDetectionResult,
    MappingSet, MappingSuggestion,
};
use crate::services::field_catalog::{self, FieldSpec};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Candidates at or below this similarity are discarded
pub const DEFAULT_SIMILARITY_FLOOR: f64 = 0.3;

/// Alternatives retained per suggestion
const MAX_ALTERNATIVES: usize = 5;

/// Lowercase alphanumeric key of a header or field name
pub fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// `1 - levenshtein(a, b) / max(|a|, |b|)`; two empty strings score 1.0
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64
}

#[derive(Debug, Clone)]
struct Scored {
    header_idx: usize,
    entity_type: EntityType,
    field: &'static FieldSpec,
    similarity: f64,
    matched: &'static str,
}

fn field_candidate(scored: &Scored) -> FieldCandidate {
    FieldCandidate {
        entity_type: scored.entity_type,
        target_field: scored.field.name.to_string(),
        confidence: scored.similarity,
    }
}

/// Column Mapping Resolver
pub struct ColumnMappingResolver {
    similarity_floor: f64,
}

impl Default for ColumnMappingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnMappingResolver {
    pub fn new() -> Self {
        Self {
            similarity_floor: DEFAULT_SIMILARITY_FLOOR,
        }
    }

    pub fn with_similarity_floor(similarity_floor: f64) -> Self {
        Self { similarity_floor }
    }

    /// Propose a target field for every header
    ///
    /// # Arguments
    /// * `headers` - Raw source headers in file order
    ///
    /// # Returns
    /// Suggestions in header order, unmapped headers, `entityType.fieldName`
    /// gaps for every entity type that received at least one mapping, and
    /// the mean suggestion confidence.
    pub fn detect_column_mappings<S: AsRef<str>>(&self, headers: &[S]) -> MappingDetectionResult {
        if headers.is_empty() {
            return MappingDetectionResult::default();
        }

        let per_header: Vec<Vec<Scored>> = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| self.score_header(idx, h.as_ref()))
            .collect();

        let dominance = dominance(&per_header);

        let mut all: Vec<&Scored> = per_header.iter().flatten().collect();
        all.sort_by(|a, b| rank(a, b, &dominance));

        let mut assigned: Vec<Option<&Scored>> = vec![None; headers.len()];
        let mut taken: BTreeSet<(EntityType, &'static str)> = BTreeSet::new();
        for candidate in all {
            if assigned[candidate.header_idx].is_some()
                || taken.contains(&(candidate.entity_type, candidate.field.name))
            {
                continue;
            }
            taken.insert((candidate.entity_type, candidate.field.name));
            assigned[candidate.header_idx] = Some(candidate);
        }

        let mut suggestions = Vec::new();
        let mut unmapped_columns = Vec::new();
        let mut conflicting_columns = Vec::new();

        for (idx, header) in headers.iter().enumerate() {
            let header = header.as_ref();
            let Some(chosen) = assigned[idx] else {
                if per_header[idx].is_empty() {
                    debug!(header, "No target field above similarity floor");
                    unmapped_columns.push(header.to_string());
                } else {
                    debug!(header, "Every candidate field claimed by another header");
                    let mut candidates: Vec<&Scored> = per_header[idx].iter().collect();
                    candidates.sort_by(|a, b| rank(a, b, &dominance));
                    candidates.truncate(MAX_ALTERNATIVES);
                    conflicting_columns.push(ColumnConflict {
                        source_column: header.to_string(),
                        candidates: candidates.into_iter().map(field_candidate).collect(),
                    });
                }
                continue;
            };

            let mut alternatives: Vec<&Scored> = per_header[idx]
                .iter()
                .filter(|c| !(c.entity_type == chosen.entity_type && c.field.name == chosen.field.name))
                .collect();
            alternatives.sort_by(|a, b| rank(a, b, &dominance));
            alternatives.truncate(MAX_ALTERNATIVES);

            debug!(
                header,
                entity_type = %chosen.entity_type,
                field = chosen.field.name,
                similarity = chosen.similarity,
                "Column mapped"
            );

            suggestions.push(MappingSuggestion {
                mapping: ColumnMapping {
                    source_column: header.to_string(),
                    target_field: chosen.field.name.to_string(),
                    entity_type: chosen.entity_type,
                    confidence: chosen.similarity,
                    required: chosen.field.required,
                    transformation: field_catalog::infer_transformation(chosen.field.name),
                },
                alternatives: alternatives.into_iter().map(field_candidate).collect(),
                reasoning: reasoning(header, chosen),
            });
        }

        let missing_required_fields = MappingSet::new(
            suggestions.iter().map(|s| s.mapping.clone()).collect(),
        )
        .missing_required_fields();

        let confidence = if suggestions.is_empty() {
            0.0
        } else {
            suggestions.iter().map(|s| s.mapping.confidence).sum::<f64>() / suggestions.len() as f64
        };

        info!(
            headers = headers.len(),
            mapped = suggestions.len(),
            unmapped = unmapped_columns.len(),
            conflicting = conflicting_columns.len(),
            missing_required = missing_required_fields.len(),
            confidence,
            "Column mapping detection complete"
        );

        MappingDetectionResult {
            suggestions,
            unmapped_columns,
            conflicting_columns,
            missing_required_fields,
            confidence,
        }
    }

    /// Required-field coverage of `mappings` for one entity type
    ///
    /// `is_complete` is false iff a required field lacks a mapping; missing
    /// important-but-optional fields only produce warnings.
    pub fn validate_mapping_completeness(
        &self,
        mappings: &[ColumnMapping],
        entity_type: EntityType,
    ) -> MappingCompleteness {
        let covered: BTreeSet<&str> = mappings
            .iter()
            .filter(|m| m.entity_type == entity_type)
            .map(|m| m.target_field.as_str())
            .collect();

        let missing_required: Vec<String> = field_catalog::required_fields(entity_type)
            .filter(|f| !covered.contains(f.name))
            .map(|f| format!("{}.{}", entity_type, f.name))
            .collect();

        let warnings = field_catalog::important_fields(entity_type)
            .filter(|f| !covered.contains(f.name))
            .map(|f| format!("Recommended field {}.{} is not mapped", entity_type, f.name))
            .collect();

        MappingCompleteness {
            is_complete: missing_required.is_empty(),
            missing_required,
            warnings,
        }
    }

    fn score_header(&self, header_idx: usize, header: &str) -> Vec<Scored> {
        let key = header_key(header);
        let mut scored = Vec::new();

        for entity_type in EntityType::ALL {
            for field in field_catalog::fields(entity_type) {
                let best = std::iter::once(field.name)
                    .chain(field.aliases.iter().copied())
                    .map(|name| (name, similarity(&key, &header_key(name))))
                    .max_by(|a, b| a.1.total_cmp(&b.1));

                if let Some((matched, sim)) = best {
                    if sim > self.similarity_floor {
                        scored.push(Scored {
                            header_idx,
                            entity_type,
                            field,
                            similarity: sim,
                            matched,
                        });
                    }
                }
            }
        }

        scored
    }
}

/// Sum of each header's best similarity, per entity type
fn dominance(per_header: &[Vec<Scored>]) -> BTreeMap<EntityType, f64> {
    let mut totals: BTreeMap<EntityType, f64> = BTreeMap::new();
    for candidates in per_header {
        let mut best: BTreeMap<EntityType, f64> = BTreeMap::new();
        for c in candidates {
            let entry = best.entry(c.entity_type).or_insert(0.0);
            *entry = entry.max(c.similarity);
        }
        for (entity_type, sim) in best {
            *totals.entry(entity_type).or_insert(0.0) += sim;
        }
    }
    totals
}

fn rank(a: &Scored, b: &Scored, dominance: &BTreeMap<EntityType, f64>) -> Ordering {
    let weight = |s: &Scored| dominance.get(&s.entity_type).copied().unwrap_or(0.0);
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| weight(b).total_cmp(&weight(a)))
        .then_with(|| a.header_idx.cmp(&b.header_idx))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

fn reasoning(header: &str, chosen: &Scored) -> String {
    let target = format!("{}.{}", chosen.entity_type, chosen.field.name);
    if chosen.matched == chosen.field.name {
        format!(
            "'{}' matches field {} (similarity {:.2})",
            header, target, chosen.similarity
        )
    } else {
        format!(
            "'{}' matches {} via alias '{}' (similarity {:.2})",
            header, target, chosen.matched, chosen.similarity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::column_mapping::Transformation;

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("capacity", "capacity"), 1.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_header_key() {
        assert_eq!(header_key("Room Name"), "roomname");
        assert_eq!(header_key(" Day-of-Week! "), "dayofweek");
    }

    #[test]
    fn test_room_name_and_capacity_map_to_venue() {
        let result = ColumnMappingResolver::new().detect_column_mappings(&["Room Name", "Capacity"]);
        assert_eq!(result.suggestions.len(), 2);

        let name = &result.suggestions[0].mapping;
        assert_eq!((name.entity_type, name.target_field.as_str()), (EntityType::Venue, "name"));
        assert!(name.confidence > 0.8);

        let capacity = &result.suggestions[1].mapping;
        assert_eq!(
            (capacity.entity_type, capacity.target_field.as_str()),
            (EntityType::Venue, "capacity")
        );
        assert!(capacity.confidence > 0.8);
        assert_eq!(capacity.transformation, Transformation::NumberParse);
        assert!(result.missing_required_fields.is_empty());
    }

    #[test]
    fn test_empty_headers() {
        let headers: [&str; 0] = [];
        let result = ColumnMappingResolver::new().detect_column_mappings(&headers);
        assert!(result.suggestions.is_empty());
        assert!(result.unmapped_columns.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_schedule_headers_resolve_to_schedule_fields() {
        let headers = ["Course Name", "Lecturer Name", "Venue", "Day of Week", "Start Time", "End Time"];
        let result = ColumnMappingResolver::new().detect_column_mappings(&headers);

        assert!(result.unmapped_columns.is_empty());
        assert!(result.missing_required_fields.is_empty());
        let fields: Vec<String> = result.suggestions.iter().map(|s| s.mapping.qualified_field()).collect();
        assert_eq!(
            fields,
            vec![
                "schedule.course_name",
                "schedule.lecturer_name",
                "schedule.venue_name",
                "schedule.day_of_week",
                "schedule.start_time",
                "schedule.end_time",
            ]
        );
        assert!(result.suggestions.iter().all(|s| s.mapping.required));
    }

    #[test]
    fn test_gibberish_is_unmapped() {
        let result = ColumnMappingResolver::new().detect_column_mappings(&["zzzzqqqqxxxx"]);
        assert!(result.suggestions.is_empty());
        assert_eq!(result.unmapped_columns, vec!["zzzzqqqqxxxx".to_string()]);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_missing_required_reported_for_present_entity() {
        let result = ColumnMappingResolver::new().detect_column_mappings(&["Seats"]);
        assert_eq!(result.suggestions[0].mapping.qualified_field(), "venue.capacity");
        assert_eq!(result.missing_required_fields, vec!["venue.name".to_string()]);
    }

    #[test]
    fn test_two_headers_never_share_a_field() {
        let result = ColumnMappingResolver::new().detect_column_mappings(&["Room", "Room Name"]);
        let targets: BTreeSet<String> =
            result.suggestions.iter().map(|s| s.mapping.qualified_field()).collect();
        assert_eq!(targets.len(), result.suggestions.len());
    }

    #[test]
    fn test_outbid_header_is_conflicting_not_unmapped() {
        let result = ColumnMappingResolver::with_similarity_floor(0.99)
            .detect_column_mappings(&["Seats", "seats"]);

        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.suggestions[0].mapping.qualified_field(), "venue.capacity");
        assert!(result.unmapped_columns.is_empty());

        assert_eq!(result.conflicting_columns.len(), 1);
        let conflict = &result.conflicting_columns[0];
        assert_ne!(conflict.source_column, result.suggestions[0].mapping.source_column);
        assert_eq!(conflict.candidates[0].entity_type, EntityType::Venue);
        assert_eq!(conflict.candidates[0].target_field, "capacity");
    }

    #[test]
    fn test_completeness_warnings() {
        let resolver = ColumnMappingResolver::new();
        let mappings = resolver.detect_column_mappings(&["Room Name"]).suggestions;
        let mappings: Vec<ColumnMapping> = mappings.into_iter().map(|s| s.mapping).collect();

        let venue = resolver.validate_mapping_completeness(&mappings, EntityType::Venue);
        assert!(venue.is_complete);
        assert!(venue.warnings.iter().any(|w| w.contains("venue.capacity")));

        let course = resolver.validate_mapping_completeness(&mappings, EntityType::Course);
        assert!(!course.is_complete);
        assert_eq!(course.missing_required, vec!["course.code", "course.name"]);
    }
}
