//! Data Normalizer
//!
//! Cleans parsed rows in a fixed order, logging each step that changed
//! anything:
//! 1. Header normalization
//! 2. Null coalescing
//! 3. Whitespace trim
//! 4. Empty-row removal
//! 5. Duplicate-row removal (whole-row equality, after trimming)
//! 6. Type conversion
//!
//! Every step is saturating, so normalizing normalized data changes nothing.

use crate::models::normalization::{
    DataTransformation, DataType, NormalizationOptions, NormalizationResult, TransformationType,
};
use crate::models::parsed_data::{CellValue, ParseMetadata, ParsedData, Row};
use crate::services::quality_scorer::{self, RowCounts};
use crate::services::type_detector;
use crate::utils::value_parsing;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Literals treated as null (compared trimmed and lower-cased)
pub const DEFAULT_NULL_VALUES: &[&str] = &[
    "", "null", "nil", "none", "n/a", "na", "n.a.", "#n/a", "-", "--", "nan", "undefined",
    "missing", "unknown", "?", "blank", "(blank)", "empty", "not available", "not applicable",
];

/// Minimum detection confidence before a column's cells are converted
const CONVERSION_CONFIDENCE: f64 = 0.8;

/// Data Normalizer
pub struct DataNormalizer {
    options: NormalizationOptions,
    null_values: BTreeSet<String>,
}

impl Default for DataNormalizer {
    fn default() -> Self {
        Self::new(NormalizationOptions::default())
    }
}

impl DataNormalizer {
    pub fn new(options: NormalizationOptions) -> Self {
        let null_values = DEFAULT_NULL_VALUES
            .iter()
            .map(|s| s.to_string())
            .chain(options.custom_null_values.iter().map(|s| s.trim().to_lowercase()))
            .collect();
        Self {
            options,
            null_values,
        }
    }

    pub fn options(&self) -> &NormalizationOptions {
        &self.options
    }

    /// Normalize one parsed file
    ///
    /// The input is not modified; the result carries the cleaned copy, the
    /// transformation log and the quality report.
    pub fn normalize(&self, data: &ParsedData) -> NormalizationResult {
        let mut headers = data.headers.clone();
        let mut rows = data.rows.clone();
        let mut log = Vec::new();
        let original_rows = rows.len();

        if self.options.normalize_headers {
            let (new_headers, renamed) = normalize_headers(&headers);
            rows = rows
                .into_iter()
                .map(|row| remap_row(&row, &headers, &new_headers))
                .collect();
            headers = new_headers;
            push(&mut log, TransformationType::HeaderNormalization, renamed, "headers renamed");
        }

        if self.options.handle_null_values {
            let coalesced = self.coalesce_nulls(&mut rows);
            push(&mut log, TransformationType::NullCoalescing, coalesced, "null-like values cleared");
        }

        if self.options.trim_whitespace {
            let trimmed = trim_whitespace(&mut rows);
            push(&mut log, TransformationType::WhitespaceTrim, trimmed, "values trimmed");
        }

        let empty_rows = rows.iter().filter(|r| is_empty_row(r)).count();
        if self.options.remove_empty_rows && empty_rows > 0 {
            rows.retain(|r| !is_empty_row(r));
            push(&mut log, TransformationType::EmptyRowRemoval, empty_rows, "empty rows removed");
        }

        let duplicate_rows = duplicate_indices(&rows);
        if self.options.remove_duplicate_rows && !duplicate_rows.is_empty() {
            let mut idx = 0;
            rows.retain(|_| {
                let keep = !duplicate_rows.contains(&idx);
                idx += 1;
                keep
            });
            push(
                &mut log,
                TransformationType::DuplicateRowRemoval,
                duplicate_rows.len(),
                "duplicate rows removed",
            );
        }

        let mut normalized = ParsedData {
            headers,
            rows,
            metadata: ParseMetadata {
                total_rows: 0,
                empty_rows,
                duplicate_rows: duplicate_rows.len(),
                encoding: data.metadata.encoding.clone(),
                delimiter: data.metadata.delimiter.clone(),
            },
        };

        let mut column_types = type_detector::detect_data_types(&normalized);
        if self.options.convert_data_types {
            let converted = convert_types(&mut normalized, &column_types);
            push(&mut log, TransformationType::TypeConversion, converted, "values converted");
            if converted > 0 {
                column_types = type_detector::detect_data_types(&normalized);
            }
        }
        normalized.metadata.total_rows = normalized.rows.len();

        let quality_report = quality_scorer::assess(
            &normalized,
            &column_types,
            RowCounts {
                original_rows,
                empty_rows,
                duplicate_rows: duplicate_rows.len(),
            },
        );

        info!(
            rows_in = original_rows,
            rows_out = normalized.rows.len(),
            steps = log.len(),
            quality_score = quality_report.quality_score,
            "Normalization complete"
        );

        NormalizationResult {
            data: normalized,
            transformations: log,
            column_types,
            quality_report,
        }
    }

    fn coalesce_nulls(&self, rows: &mut [Row]) -> usize {
        let mut affected = 0;
        for value in rows.iter_mut().flat_map(|r| r.values_mut()) {
            if let CellValue::Text(s) = &*value {
                if self.null_values.contains(&s.trim().to_lowercase()) {
                    *value = CellValue::Null;
                    affected += 1;
                }
            }
        }
        affected
    }
}

fn push(log: &mut Vec<DataTransformation>, kind: TransformationType, affected: usize, what: &str) {
    if affected == 0 {
        return;
    }
    debug!(step = ?kind, affected, "Normalization step applied");
    log.push(DataTransformation {
        kind,
        description: format!("{} {}", affected, what),
        rows_affected: affected,
    });
}

/// Lower-case, strip non-word characters, underscores for whitespace
pub fn normalize_header(header: &str) -> String {
    let cleaned: String = header
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string()
}

/// Normalize all headers, suffixing collisions `_2`, `_3`, ...
///
/// Returns the new headers and how many changed.
fn normalize_headers(headers: &[String]) -> (Vec<String>, usize) {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(headers.len());

    for (idx, header) in headers.iter().enumerate() {
        let mut base = normalize_header(header);
        if base.is_empty() {
            base = format!("column_{}", idx + 1);
        }
        let mut candidate = base.clone();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }

    let renamed = headers.iter().zip(&out).filter(|(a, b)| a != b).count();
    (out, renamed)
}

/// Re-key a row positionally: value under `old[i]` moves to `new[i]`
fn remap_row(row: &Row, old: &[String], new: &[String]) -> Row {
    old.iter()
        .zip(new)
        .map(|(o, n)| (n.clone(), row.get(o).cloned().unwrap_or(CellValue::Null)))
        .collect()
}

fn trim_whitespace(rows: &mut [Row]) -> usize {
    let mut affected = 0;
    for value in rows.iter_mut().flat_map(|r| r.values_mut()) {
        match value {
            CellValue::Text(s) if s.trim().len() != s.len() => {
                *s = s.trim().to_string();
                affected += 1;
            }
            CellValue::List(items) if items.iter().any(|i| i.trim().len() != i.len()) => {
                for item in items.iter_mut() {
                    *item = item.trim().to_string();
                }
                affected += 1;
            }
            _ => {}
        }
    }
    affected
}

fn is_empty_row(row: &Row) -> bool {
    row.values().all(CellValue::is_blank)
}

/// SHA-256 over a canonical rendering of the (sorted) row
fn row_fingerprint(row: &Row) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (key, value) in row {
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        let tagged = match value {
            CellValue::Null => "n:".to_string(),
            CellValue::Boolean(b) => format!("b:{}", b),
            CellValue::Number(n) => format!("f:{}", n),
            CellValue::Text(s) => format!("s:{}", s),
            CellValue::List(items) => format!("l:{}", items.join("\u{1f}")),
        };
        hasher.update(tagged.as_bytes());
        hasher.update([0x1e]);
    }
    hasher.finalize().into()
}

/// Indices of rows equal to an earlier row
fn duplicate_indices(rows: &[Row]) -> BTreeSet<usize> {
    let mut seen = HashSet::new();
    rows.iter()
        .enumerate()
        .filter(|(_, row)| !seen.insert(row_fingerprint(row)))
        .map(|(idx, _)| idx)
        .collect()
}

/// Convert text cells of confidently numeric or boolean columns
fn convert_types(data: &mut ParsedData, column_types: &crate::models::ColumnTypes) -> usize {
    let mut converted = 0;
    for (header, column_type) in column_types {
        if column_type.confidence < CONVERSION_CONFIDENCE {
            continue;
        }
        for row in data.rows.iter_mut() {
            let Some(value) = row.get_mut(header) else {
                continue;
            };
            let CellValue::Text(text) = &*value else {
                continue;
            };
            let replacement = match column_type.data_type {
                DataType::Number => value_parsing::parse_number(text).map(CellValue::Number),
                DataType::Boolean => value_parsing::parse_boolean(text).map(CellValue::Boolean),
                _ => None,
            };
            if let Some(replacement) = replacement {
                *value = replacement;
                converted += 1;
            }
        }
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::column_mapping::MappingSet;
    use crate::services::column_mapper::ColumnMappingResolver;
    use crate::services::validator::validate_rows;

    fn sample() -> ParsedData {
        ParsedData::from_records(
            ["Room Name", "Capacity!", "room name", ""],
            vec![
                vec![" Hall A ", "120", "x", "N/A"],
                vec!["Hall A", "120", "x", ""],
                vec!["", "null", "  ", "-"],
                vec!["Lab 2", "1,000", "y", "note"],
            ],
        )
    }

    #[test]
    fn test_header_normalization() {
        assert_eq!(normalize_header("  Room   Name! "), "room_name");
        assert_eq!(normalize_header("__Start-Time__"), "starttime");

        let (headers, renamed) = normalize_headers(&[
            "Room Name".to_string(),
            "room name".to_string(),
            "".to_string(),
        ]);
        assert_eq!(headers, vec!["room_name", "room_name_2", "column_3"]);
        assert_eq!(renamed, 3);
    }

    #[test]
    fn test_fixed_order_pipeline() {
        let result = DataNormalizer::default().normalize(&sample());
        let data = &result.data;

        assert_eq!(data.headers, vec!["room_name", "capacity", "room_name_2", "column_4"]);
        // " Hall A " trimmed before dedup, so rows 0 and 1 collapse; row 2 is all-null
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0]["room_name"], CellValue::text("Hall A"));
        assert_eq!(data.rows[0]["capacity"], CellValue::Number(120.0));
        assert_eq!(data.rows[1]["capacity"], CellValue::Number(1000.0));
        assert_eq!(data.metadata.empty_rows, 1);
        assert_eq!(data.metadata.duplicate_rows, 1);

        let kinds: Vec<TransformationType> = result.transformations.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransformationType::HeaderNormalization,
                TransformationType::NullCoalescing,
                TransformationType::WhitespaceTrim,
                TransformationType::EmptyRowRemoval,
                TransformationType::DuplicateRowRemoval,
                TransformationType::TypeConversion,
            ]
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let cases: Vec<(&str, ParsedData)> = vec![
            ("mixed sample", sample()),
            (
                "header collisions",
                ParsedData::from_records(
                    ["Name", "name", "NAME!", "", "name_2"],
                    vec![vec!["a", "b", "c", "d", "e"], vec!["f", "g", "h", "i", "j"]],
                ),
            ),
            (
                "null literals",
                ParsedData::from_records(
                    ["lecturer", "email"],
                    vec![
                        vec!["N/A", "none"],
                        vec!["Dr Ada", "-"],
                        vec![" unknown ", "ada@uni.edu"],
                    ],
                ),
            ),
            (
                "numbers and flags",
                ParsedData::from_records(
                    ["capacity", "accessible", "credits"],
                    vec![
                        vec!["1,200", "yes", "1"],
                        vec!["80", "no", "0"],
                        vec!["45", "Y", "3"],
                        vec!["45", "Y", "3"],
                    ],
                ),
            ),
            (
                "clock times",
                ParsedData::from_records(
                    ["start", "end", "slot"],
                    vec![
                        vec!["9.30", "11.00", "1000"],
                        vec!["0900", "1000", "1100"],
                        vec!["2pm", "14:30", "1400"],
                    ],
                ),
            ),
        ];

        let normalizer = DataNormalizer::default();
        for (name, input) in cases {
            let once = normalizer.normalize(&input);
            let twice = normalizer.normalize(&once.data);
            assert_eq!(twice.data.headers, once.data.headers, "{}", name);
            assert_eq!(twice.data.rows, once.data.rows, "{}", name);
            assert!(twice.transformations.is_empty(), "{}: {:?}", name, twice.transformations);
        }
    }

    #[test]
    fn test_clock_times_and_digit_flags_keep_their_meaning() {
        let data = ParsedData::from_records(
            ["start", "credits", "accessible"],
            vec![vec!["9.30", "1", "yes"], vec!["0900", "0", "no"], vec!["14.00", "1", "yes"]],
        );
        let result = DataNormalizer::default().normalize(&data);

        assert_eq!(result.data.rows[0]["start"], CellValue::text("9.30"));
        assert_eq!(result.data.rows[1]["start"], CellValue::text("0900"));
        assert_eq!(result.data.rows[0]["credits"], CellValue::Number(1.0));
        assert_eq!(result.data.rows[1]["credits"], CellValue::Number(0.0));
        assert_eq!(result.data.rows[0]["accessible"], CellValue::Boolean(true));
    }

    #[test]
    fn test_dotted_schedule_times_validate() {
        let data = ParsedData::from_records(
            ["Course Name", "Lecturer Name", "Venue", "Day of Week", "Start Time", "End Time"],
            vec![
                vec!["Algorithms", "Dr Ada", "Hall A", "Monday", "9.30", "11.00"],
                vec!["Databases", "Dr Codd", "Lab 2", "Tuesday", "10.30", "12.00"],
                vec!["Networks", "Dr Cerf", "Lab 3", "Friday", "0900", "1000"],
            ],
        );
        let result = DataNormalizer::default().normalize(&data);
        assert_eq!(result.data.rows[0]["start_time"], CellValue::text("9.30"));
        assert_eq!(result.data.rows[2]["start_time"], CellValue::text("0900"));

        let detected = ColumnMappingResolver::new().detect_column_mappings(&result.data.headers);
        let frozen = MappingSet::new(detected.mappings()).freeze().unwrap();
        let validation = validate_rows(&result.data, &frozen);
        assert_eq!(validation.valid_rows, 3, "{:?}", validation.issues);
        assert_eq!(validation.invalid_rows, 0);
    }

    #[test]
    fn test_custom_null_values() {
        let normalizer = DataNormalizer::new(NormalizationOptions {
            custom_null_values: vec!["TBA".to_string()],
            ..Default::default()
        });
        let data = ParsedData::from_records(["lecturer"], vec![vec!["tba"], vec!["Dr Smith"]]);
        let result = normalizer.normalize(&data);
        assert_eq!(result.data.rows.len(), 1);
        assert_eq!(result.data.rows[0]["lecturer"], CellValue::text("Dr Smith"));
    }

    #[test]
    fn test_disabled_steps_leave_data_alone() {
        let normalizer = DataNormalizer::new(NormalizationOptions {
            trim_whitespace: false,
            remove_empty_rows: false,
            remove_duplicate_rows: false,
            normalize_headers: false,
            convert_data_types: false,
            handle_null_values: false,
            custom_null_values: vec![],
        });
        let input = sample();
        let result = normalizer.normalize(&input);
        assert_eq!(result.data.rows, input.rows);
        assert_eq!(result.data.headers, input.headers);
        assert!(result.transformations.is_empty());
        // "null" and "-" stay text without coalescing, so no row is empty
        assert_eq!(result.quality_report.empty_rows, 0);
    }
}
