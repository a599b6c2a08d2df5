//! Data quality scoring
//!
//! Score starts at 100 and loses up to 30 points for empty rows, 20 for
//! duplicate rows, 25 for null density and 25 for type mismatches.

use crate::models::normalization::{ColumnTypes, DataQualityReport, DataType};
use crate::models::parsed_data::ParsedData;
use crate::services::type_detector;

const EMPTY_ROW_WEIGHT: f64 = 30.0;
const DUPLICATE_ROW_WEIGHT: f64 = 20.0;
const NULL_DENSITY_WEIGHT: f64 = 25.0;
const TYPE_MISMATCH_WEIGHT: f64 = 25.0;

/// Null density above which values should be checked at the source
const NULL_DENSITY_WARNING: f64 = 0.10;
const TYPE_MISMATCH_WARNING: f64 = 0.05;
/// Scores below this need a human look before import
pub const MANUAL_REVIEW_SCORE: u8 = 70;

/// Row counts observed before cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub original_rows: usize,
    pub empty_rows: usize,
    pub duplicate_rows: usize,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Non-null cells that fail their column's detected type
pub fn count_type_mismatches(data: &ParsedData, column_types: &ColumnTypes) -> usize {
    column_types
        .iter()
        .filter(|(_, ct)| ct.data_type != DataType::String)
        .map(|(header, ct)| {
            data.column(header)
                .filter(|v| !v.is_blank() && !type_detector::matches_type(v, ct.data_type))
                .count()
        })
        .sum()
}

/// 0 - 100, rounded
pub fn quality_score(
    empty_ratio: f64,
    duplicate_ratio: f64,
    null_density: f64,
    mismatch_density: f64,
) -> u8 {
    let score = 100.0
        - EMPTY_ROW_WEIGHT * empty_ratio.clamp(0.0, 1.0)
        - DUPLICATE_ROW_WEIGHT * duplicate_ratio.clamp(0.0, 1.0)
        - NULL_DENSITY_WEIGHT * null_density.clamp(0.0, 1.0)
        - TYPE_MISMATCH_WEIGHT * mismatch_density.clamp(0.0, 1.0);
    score.clamp(0.0, 100.0).round() as u8
}

/// Build the quality report for normalized data
pub fn assess(data: &ParsedData, column_types: &ColumnTypes, counts: RowCounts) -> DataQualityReport {
    let total_cells = data.rows.len() * data.headers.len();
    let null_values = data
        .headers
        .iter()
        .map(|h| data.column(h).filter(|v| v.is_blank()).count())
        .sum::<usize>();
    let type_mismatches = count_type_mismatches(data, column_types);

    let null_density = ratio(null_values, total_cells);
    let mismatch_density = ratio(type_mismatches, total_cells.saturating_sub(null_values));

    let quality_score = quality_score(
        ratio(counts.empty_rows, counts.original_rows),
        ratio(counts.duplicate_rows, counts.original_rows),
        null_density,
        mismatch_density,
    );

    let mut recommendations = Vec::new();
    if null_density > NULL_DENSITY_WARNING {
        recommendations.push(format!(
            "{:.0}% of values are empty; validate the data at its source before importing",
            null_density * 100.0
        ));
    }
    if counts.duplicate_rows > 0 {
        recommendations.push(format!(
            "{} duplicate rows found; check the export for repeated records",
            counts.duplicate_rows
        ));
    }
    if counts.empty_rows > 0 {
        recommendations.push(format!("{} empty rows found", counts.empty_rows));
    }
    if mismatch_density > TYPE_MISMATCH_WARNING {
        recommendations.push(
            "Some columns mix value types; review the flagged columns for entry errors".to_string(),
        );
    }
    if quality_score < MANUAL_REVIEW_SCORE {
        recommendations.push(format!(
            "Quality score {} is below {}; manual review recommended before import",
            quality_score, MANUAL_REVIEW_SCORE
        ));
    }

    DataQualityReport {
        total_rows: data.rows.len(),
        total_cells,
        null_values,
        duplicate_rows: counts.duplicate_rows,
        empty_rows: counts.empty_rows,
        type_mismatches,
        quality_score,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_data_scores_100() {
        assert_eq!(quality_score(0.0, 0.0, 0.0, 0.0), 100);
    }

    #[test]
    fn test_worst_case_scores_zero() {
        assert_eq!(quality_score(1.0, 1.0, 1.0, 1.0), 0);
        assert_eq!(quality_score(5.0, 5.0, 5.0, 5.0), 0);
    }

    #[test]
    fn test_score_is_monotonic_in_each_factor() {
        let mut last = 100;
        for step in 0..=20 {
            let density = step as f64 / 20.0;
            let score = quality_score(density, 0.1, 0.1, 0.0);
            assert!(score <= last);
            last = score;
        }

        let mut last = 100;
        for step in 0..=20 {
            let density = step as f64 / 20.0;
            let score = quality_score(0.0, 0.0, density, 0.0);
            assert!(score <= last);
            last = score;
        }
    }

    #[test]
    fn test_high_null_density_recommendations() {
        let data = ParsedData::from_records(
            ["a", "b"],
            vec![vec!["x", ""], vec!["y", ""], vec!["z", ""]],
        );
        let report = assess(&data, &ColumnTypes::new(), RowCounts { original_rows: 3, ..Default::default() });
        assert_eq!(report.null_values, 3);
        assert_eq!(report.quality_score, 88); // 100 - 25 * 0.5, rounded
        assert!(report.recommendations.iter().any(|r| r.contains("validate")));
        assert!(!report.recommendations.iter().any(|r| r.contains("manual review")));
    }
}
