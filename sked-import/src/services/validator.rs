//! Row validation
//!
//! Applies a frozen mapping set to every row and checks the mapped values:
//! - required fields are non-empty
//! - numeric fields parse and are non-negative
//! - time fields parse; end time is after start time
//! - day of week is recognized
//! - email fields are well-formed (warning only)

use crate::models::column_mapping::{EntityType, FrozenMappingSet, MappedRow};
use crate::models::parsed_data::{CellValue, ParsedData};
use crate::models::validation::{IssueSeverity, RowIssue, ValidationResult};
use crate::services::field_catalog::{self, FieldKind};
use crate::services::type_detector;
use crate::utils::value_parsing;
use std::collections::BTreeSet;
use tracing::info;

/// Validate every row of `data` against `mappings`
pub fn validate_rows(data: &ParsedData, mappings: &FrozenMappingSet) -> ValidationResult {
    let issues: Vec<RowIssue> = data
        .rows
        .iter()
        .enumerate()
        .flat_map(|(idx, row)| validate_mapped_row(&mappings.apply_row(idx, row)))
        .collect();

    let result = ValidationResult::from_issues(data.rows.len(), issues);
    info!(
        total_rows = result.total_rows,
        valid_rows = result.valid_rows,
        invalid_rows = result.invalid_rows,
        warnings = result.warning_count(),
        "Row validation complete"
    );
    result
}

/// Issues for one mapped row, transformation failures included
pub fn validate_mapped_row(mapped: &MappedRow) -> Vec<RowIssue> {
    let mut issues = mapped.issues.clone();
    let already_flagged: BTreeSet<String> = issues.iter().map(|i| i.field.clone()).collect();

    for (entity_type, record) in &mapped.records {
        for (name, value) in &record.fields {
            let qualified = format!("{}.{}", entity_type, name);
            if already_flagged.contains(&qualified) {
                continue;
            }
            let Some(spec) = field_catalog::field(*entity_type, name) else {
                continue;
            };

            let issue = |message: String, severity: IssueSeverity| RowIssue {
                row_index: mapped.row_index,
                field: qualified.clone(),
                message,
                severity,
            };

            if value.is_blank() {
                if spec.required {
                    issues.push(issue("Required value is empty".to_string(), IssueSeverity::Error));
                }
                continue;
            }

            if let Some((message, severity)) = check_kind(spec.kind, value) {
                issues.push(issue(message, severity));
            }
        }

        if *entity_type == EntityType::Schedule {
            if let Some(issue) = check_time_order(mapped.row_index, record.fields.get("start_time"), record.fields.get("end_time")) {
                if !already_flagged.contains(&issue.field) {
                    issues.push(issue);
                }
            }
        }
    }

    issues
}

fn check_kind(kind: FieldKind, value: &CellValue) -> Option<(String, IssueSeverity)> {
    match kind {
        FieldKind::Number => {
            let number = match value {
                CellValue::Number(n) => Some(*n),
                other => value_parsing::parse_number(&other.to_string()),
            };
            match number {
                None => Some((format!("'{}' is not a number", value), IssueSeverity::Error)),
                Some(n) if n < 0.0 => Some((format!("{} must not be negative", n), IssueSeverity::Error)),
                Some(_) => None,
            }
        }
        FieldKind::Time => {
            if cell_time(value).is_some() {
                None
            } else {
                Some((format!("'{}' is not a valid time", value), IssueSeverity::Error))
            }
        }
        FieldKind::DayOfWeek => {
            if value_parsing::parse_day_of_week(&value.to_string()).is_some() {
                None
            } else {
                Some((format!("'{}' is not a day of the week", value), IssueSeverity::Error))
            }
        }
        FieldKind::Email => {
            if type_detector::is_email(&value.to_string()) {
                None
            } else {
                Some((format!("'{}' is not a valid email address", value), IssueSeverity::Warning))
            }
        }
        FieldKind::Text | FieldKind::Code => None,
    }
}

fn cell_time(value: &CellValue) -> Option<chrono::NaiveTime> {
    match value {
        CellValue::Number(n) => value_parsing::time_from_number(*n),
        other => value_parsing::parse_time(&other.to_string()),
    }
}

fn check_time_order(
    row_index: usize,
    start: Option<&CellValue>,
    end: Option<&CellValue>,
) -> Option<RowIssue> {
    let start_time = cell_time(start?)?;
    let end_time = cell_time(end?)?;
    if end_time > start_time {
        return None;
    }
    Some(RowIssue {
        row_index,
        field: "schedule.end_time".to_string(),
        message: format!(
            "End time {} is not after start time {}",
            end_time.format("%H:%M"),
            start_time.format("%H:%M")
        ),
        severity: IssueSeverity::Error,
    })
}
