//! Row validation results
//!
//! Produced by the validator before a job is committed and frozen into the
//! job record alongside the mapping set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Issue severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueSeverity {
    /// Reported, row still imported
    Warning,
    /// Row cannot be imported
    Error,
}

/// One problem found in one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row_index: usize,
    /// `entityType.fieldName` the issue concerns
    pub field: String,
    pub message: String,
    pub severity: IssueSeverity,
}

/// Outcome of validating mapped rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// At least one row is importable
    pub is_valid: bool,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub issues: Vec<RowIssue>,
    /// Rows carrying at least one error-severity issue
    pub invalid_row_indices: BTreeSet<usize>,
}

impl ValidationResult {
    /// Build from a row count and the collected issues
    pub fn from_issues(total_rows: usize, issues: Vec<RowIssue>) -> Self {
        let invalid_row_indices: BTreeSet<usize> = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .map(|i| i.row_index)
            .collect();
        let invalid_rows = invalid_row_indices.len();
        let valid_rows = total_rows.saturating_sub(invalid_rows);

        Self {
            is_valid: total_rows > 0 && valid_rows > 0,
            total_rows,
            valid_rows,
            invalid_rows,
            issues,
            invalid_row_indices,
        }
    }

    pub fn is_row_valid(&self, row_index: usize) -> bool {
        !self.invalid_row_indices.contains(&row_index)
    }

    /// Error messages for one row, joined for a failure record
    pub fn row_errors(&self, row_index: usize) -> Vec<&RowIssue> {
        self.issues
            .iter()
            .filter(|i| i.row_index == row_index && i.severity == IssueSeverity::Error)
            .collect()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(row_index: usize, severity: IssueSeverity) -> RowIssue {
        RowIssue {
            row_index,
            field: "schedule.start_time".to_string(),
            message: "bad".to_string(),
            severity,
        }
    }

    #[test]
    fn test_counts_distinct_error_rows() {
        let result = ValidationResult::from_issues(
            4,
            vec![
                issue(1, IssueSeverity::Error),
                issue(1, IssueSeverity::Error),
                issue(2, IssueSeverity::Warning),
            ],
        );
        assert!(result.is_valid);
        assert_eq!(result.invalid_rows, 1);
        assert_eq!(result.valid_rows, 3);
        assert!(!result.is_row_valid(1));
        assert!(result.is_row_valid(2));
        assert_eq!(result.row_errors(1).len(), 2);
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_empty_or_all_invalid_is_not_valid() {
        assert!(!ValidationResult::from_issues(0, vec![]).is_valid);
        assert!(!ValidationResult::from_issues(1, vec![issue(0, IssueSeverity::Error)]).is_valid);
    }
}
