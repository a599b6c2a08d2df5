//! Column → target field mappings
//!
//! A `MappingSet` is the editable working copy (resolver output plus human
//! overrides). Freezing it checks required-field coverage; only a
//! `FrozenMappingSet` can be applied to row data.

use crate::models::parsed_data::{CellValue, Row};
use crate::models::validation::{IssueSeverity, RowIssue};
use crate::services::field_catalog;
use crate::utils::value_parsing;
use serde::{Deserialize, Serialize};
use sked_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Target entity categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Venue,
    Lecturer,
    Course,
    StudentGroup,
    Schedule,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Venue,
        EntityType::Lecturer,
        EntityType::Course,
        EntityType::StudentGroup,
        EntityType::Schedule,
    ];

    /// Entity types that exist as standalone records (everything but schedule)
    pub const REFERENCED: [EntityType; 4] = [
        EntityType::Venue,
        EntityType::Lecturer,
        EntityType::Course,
        EntityType::StudentGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Venue => "venue",
            EntityType::Lecturer => "lecturer",
            EntityType::Course => "course",
            EntityType::StudentGroup => "studentGroup",
            EntityType::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value transformation applied when a mapped column is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transformation {
    #[default]
    None,
    Uppercase,
    Lowercase,
    Trim,
    DateParse,
    NumberParse,
    BooleanParse,
    SplitArray,
}

impl Transformation {
    /// Apply to one cell; nulls pass through untouched
    ///
    /// `DateParse` yields `HH:MM` for clock times and `YYYY-MM-DD` for dates.
    pub fn apply(&self, value: &CellValue) -> std::result::Result<CellValue, String> {
        if value.is_null() {
            return Ok(CellValue::Null);
        }

        match self {
            Transformation::None => Ok(value.clone()),
            Transformation::Uppercase => Ok(map_text(value, |s| s.trim().to_uppercase())),
            Transformation::Lowercase => Ok(map_text(value, |s| s.trim().to_lowercase())),
            Transformation::Trim => Ok(map_text(value, |s| s.trim().to_string())),
            Transformation::DateParse => match value {
                CellValue::Number(n) => value_parsing::time_from_number(*n)
                    .map(|t| CellValue::Text(t.format("%H:%M").to_string()))
                    .ok_or_else(|| format!("'{}' is not a time of day", value)),
                other => {
                    let text = other.to_string();
                    if let Some(t) = value_parsing::parse_time(&text) {
                        Ok(CellValue::Text(t.format("%H:%M").to_string()))
                    } else if let Some(d) = value_parsing::parse_date(&text) {
                        Ok(CellValue::Text(d.format("%Y-%m-%d").to_string()))
                    } else {
                        Err(format!("'{}' is not a recognizable date or time", text))
                    }
                }
            },
            Transformation::NumberParse => match value {
                CellValue::Number(n) => Ok(CellValue::Number(*n)),
                other => value_parsing::parse_number(&other.to_string())
                    .map(CellValue::Number)
                    .ok_or_else(|| format!("'{}' is not a number", other)),
            },
            Transformation::BooleanParse => match value {
                CellValue::Boolean(b) => Ok(CellValue::Boolean(*b)),
                other => value_parsing::parse_boolean(&other.to_string())
                    .map(CellValue::Boolean)
                    .ok_or_else(|| format!("'{}' is not a yes/no value", other)),
            },
            Transformation::SplitArray => match value {
                CellValue::List(items) => Ok(CellValue::List(items.clone())),
                other => Ok(CellValue::List(
                    other
                        .to_string()
                        .split([',', ';', '|'])
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                )),
            },
        }
    }
}

fn map_text(value: &CellValue, f: impl Fn(&str) -> String) -> CellValue {
    match value {
        CellValue::Text(s) => CellValue::Text(f(s)),
        CellValue::List(items) => CellValue::List(items.iter().map(|s| f(s)).collect()),
        other => CellValue::Text(f(&other.to_string())),
    }
}

/// One source column bound to one target field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_field: String,
    pub entity_type: EntityType,
    /// Similarity of the column name to the target field (0.0 - 1.0)
    pub confidence: f64,
    pub required: bool,
    #[serde(default)]
    pub transformation: Transformation,
}

impl ColumnMapping {
    /// Dotted `entityType.fieldName` form
    pub fn qualified_field(&self) -> String {
        format!("{}.{}", self.entity_type, self.target_field)
    }
}

/// A ranked alternative target for a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub entity_type: EntityType,
    pub target_field: String,
    pub confidence: f64,
}

/// Resolver output for one header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub mapping: ColumnMapping,
    /// Remaining candidates above the similarity floor, best first
    pub alternatives: Vec<FieldCandidate>,
    pub reasoning: String,
}

/// A header left without a field because other headers claimed its candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConflict {
    pub source_column: String,
    /// Candidates above the floor, best first, each already taken
    pub candidates: Vec<FieldCandidate>,
}

/// Result of `detect_column_mappings`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDetectionResult {
    pub suggestions: Vec<MappingSuggestion>,
    /// Headers with no candidate above the similarity floor
    pub unmapped_columns: Vec<String>,
    /// Headers whose every candidate went to a better-matching header
    #[serde(default)]
    pub conflicting_columns: Vec<ColumnConflict>,
    /// `entityType.fieldName` entries
    pub missing_required_fields: Vec<String>,
    /// Mean suggestion confidence, 0 when there are no suggestions
    pub confidence: f64,
}

impl MappingDetectionResult {
    /// Accepted mappings in header order
    pub fn mappings(&self) -> Vec<ColumnMapping> {
        self.suggestions.iter().map(|s| s.mapping.clone()).collect()
    }
}

/// Result of `validate_mapping_completeness`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingCompleteness {
    pub is_complete: bool,
    pub missing_required: Vec<String>,
    pub warnings: Vec<String>,
}

/// Editable mapping set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSet {
    pub mappings: Vec<ColumnMapping>,
}

impl MappingSet {
    pub fn new(mappings: Vec<ColumnMapping>) -> Self {
        Self { mappings }
    }

    /// Human override: bind `source_column` to a different field
    ///
    /// Overrides carry confidence 1.0 and the catalog's transformation for
    /// the new field.
    pub fn override_mapping(
        &mut self,
        source_column: &str,
        entity_type: EntityType,
        target_field: &str,
    ) -> Result<()> {
        let field = field_catalog::field(entity_type, target_field).ok_or_else(|| {
            Error::Validation(format!("Unknown target field {}.{}", entity_type, target_field))
        })?;

        let mapping = ColumnMapping {
            source_column: source_column.to_string(),
            target_field: field.name.to_string(),
            entity_type,
            confidence: 1.0,
            required: field.required,
            transformation: field_catalog::infer_transformation(field.name),
        };

        match self.mappings.iter_mut().find(|m| m.source_column == source_column) {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
        Ok(())
    }

    /// Drop the mapping for a column (column becomes unmapped)
    pub fn remove(&mut self, source_column: &str) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.source_column != source_column);
        before != self.mappings.len()
    }

    /// Entity types with at least one mapped column
    pub fn entity_types(&self) -> BTreeSet<EntityType> {
        self.mappings.iter().map(|m| m.entity_type).collect()
    }

    /// `entityType.fieldName` for every required field not covered
    pub fn missing_required_fields(&self) -> Vec<String> {
        let covered: BTreeSet<(EntityType, &str)> = self
            .mappings
            .iter()
            .map(|m| (m.entity_type, m.target_field.as_str()))
            .collect();

        self.entity_types()
            .into_iter()
            .flat_map(|entity_type| {
                field_catalog::required_fields(entity_type)
                    .filter(|f| !covered.contains(&(entity_type, f.name)))
                    .map(move |f| format!("{}.{}", entity_type, f.name))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Freeze for execution
    ///
    /// Fails with a Validation error naming every uncovered required field,
    /// or when two columns feed the same target field.
    pub fn freeze(self) -> Result<FrozenMappingSet> {
        FrozenMappingSet::try_from(self.mappings)
    }
}

/// Immutable, coverage-checked mapping set used by the job orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ColumnMapping>", into = "Vec<ColumnMapping>")]
pub struct FrozenMappingSet {
    mappings: Vec<ColumnMapping>,
}

impl TryFrom<Vec<ColumnMapping>> for FrozenMappingSet {
    type Error = Error;

    fn try_from(mappings: Vec<ColumnMapping>) -> Result<Self> {
        if mappings.is_empty() {
            return Err(Error::Validation("No column mappings supplied".to_string()));
        }

        let mut seen = BTreeSet::new();
        for m in &mappings {
            if field_catalog::field(m.entity_type, &m.target_field).is_none() {
                return Err(Error::Validation(format!(
                    "Unknown target field {}",
                    m.qualified_field()
                )));
            }
            if !seen.insert((m.entity_type, m.target_field.clone())) {
                return Err(Error::Validation(format!(
                    "Target field {} is mapped more than once",
                    m.qualified_field()
                )));
            }
        }

        let set = MappingSet { mappings };
        let missing = set.missing_required_fields();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "Required fields not mapped: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            mappings: set.mappings,
        })
    }
}

impl From<FrozenMappingSet> for Vec<ColumnMapping> {
    fn from(set: FrozenMappingSet) -> Self {
        set.mappings
    }
}

impl FrozenMappingSet {
    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    pub fn entity_types(&self) -> BTreeSet<EntityType> {
        self.mappings.iter().map(|m| m.entity_type).collect()
    }

    pub fn has_schedule(&self) -> bool {
        self.mappings.iter().any(|m| m.entity_type == EntityType::Schedule)
    }

    /// Project one source row onto target records, one per entity type
    ///
    /// Transformation failures become error-severity issues; the offending
    /// field is left null in the record.
    pub fn apply_row(&self, row_index: usize, row: &Row) -> MappedRow {
        let mut records: BTreeMap<EntityType, MappedRecord> = BTreeMap::new();
        let mut issues = Vec::new();

        for mapping in &self.mappings {
            let raw = row.get(&mapping.source_column).cloned().unwrap_or(CellValue::Null);
            let value = match mapping.transformation.apply(&raw) {
                Ok(v) => v,
                Err(message) => {
                    issues.push(RowIssue {
                        row_index,
                        field: mapping.qualified_field(),
                        message,
                        severity: IssueSeverity::Error,
                    });
                    CellValue::Null
                }
            };

            records
                .entry(mapping.entity_type)
                .or_insert_with(|| MappedRecord::new(mapping.entity_type, row_index))
                .fields
                .insert(mapping.target_field.clone(), value);
        }

        MappedRow {
            row_index,
            records,
            issues,
        }
    }
}

/// Target-shaped values for one entity type from one source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    pub entity_type: EntityType,
    pub row_index: usize,
    pub fields: BTreeMap<String, CellValue>,
}

impl MappedRecord {
    pub fn new(entity_type: EntityType, row_index: usize) -> Self {
        Self {
            entity_type,
            row_index,
            fields: BTreeMap::new(),
        }
    }

    /// Non-blank text of a field
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_string().trim().to_string())
    }
}

/// All records derived from one source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRow {
    pub row_index: usize,
    pub records: BTreeMap<EntityType, MappedRecord>,
    pub issues: Vec<RowIssue>,
}
