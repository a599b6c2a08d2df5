//! Column type detection
//!
//! Samples up to 10 non-null values per column and scores them against
//! ordered heuristics (email, phone, URL, boolean, number, date). The column
//! takes the type with the most hits; earlier heuristics win ties.
//!
//! Clock times (`9.30`, `14.00`) and zero-padded integers (`0900`) are not
//! numbers: converting them would lose digits. A column of bare `1`/`0`
//! reads as numbers unless some sampled value is a word literal (`yes`).

use crate::models::normalization::{ColumnType, ColumnTypes, DataType};
use crate::models::parsed_data::{CellValue, ParsedData};
use crate::utils::value_parsing;
use once_cell::sync::Lazy;
use regex::Regex;

/// Non-null values sampled per column
pub const SAMPLE_SIZE: usize = 10;

/// Heuristic order; also the tie-break order
const HEURISTICS: [DataType; 6] = [
    DataType::Email,
    DataType::Phone,
    DataType::Url,
    DataType::Boolean,
    DataType::Number,
    DataType::Date,
];

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s().\-]{7,20}$").expect("valid phone regex"));

pub fn is_email(text: &str) -> bool {
    EMAIL.is_match(text.trim())
}

/// Punctuated digit string of phone length that is not a date or time
pub fn is_phone(text: &str) -> bool {
    let trimmed = text.trim();
    if !PHONE.is_match(trimmed)
        || value_parsing::is_date_shaped(trimmed)
        || value_parsing::is_time_shaped(trimmed)
    {
        return false;
    }
    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    let punctuated = trimmed.chars().any(|c| matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    punctuated && (7..=15).contains(&digits)
}

pub fn is_url(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
}

/// Does one value satisfy the heuristic for `data_type`
///
/// `String` accepts everything.
pub fn matches_type(value: &CellValue, data_type: DataType) -> bool {
    match (value, data_type) {
        (_, DataType::String) => true,
        (CellValue::Null, _) => false,
        (CellValue::Number(_), DataType::Number) => true,
        (CellValue::Boolean(_), DataType::Boolean) => true,
        (CellValue::Number(_) | CellValue::Boolean(_), _) => false,
        (CellValue::List(_), _) => false,
        (CellValue::Text(s), ty) => match ty {
            DataType::Email => is_email(s),
            DataType::Phone => is_phone(s),
            DataType::Url => is_url(s),
            DataType::Boolean => value_parsing::parse_boolean(s).is_some(),
            DataType::Number => {
                !value_parsing::is_time_shaped(s)
                    && !value_parsing::has_leading_zero(s)
                    && value_parsing::parse_number(s).is_some()
            }
            DataType::Date => {
                value_parsing::is_date_shaped(s) || value_parsing::parse_date(s).is_some()
            }
            DataType::String => true,
        },
    }
}

/// Boolean literal that is not a bare digit
fn is_word_boolean(value: &CellValue) -> bool {
    match value {
        CellValue::Boolean(_) => true,
        CellValue::Text(s) => {
            value_parsing::parse_boolean(s).is_some() && !s.trim().chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

/// Detect the type of one column
pub fn detect_column_type<'a>(values: impl Iterator<Item = &'a CellValue>) -> ColumnType {
    let sample: Vec<&CellValue> = values.filter(|v| !v.is_blank()).take(SAMPLE_SIZE).collect();
    if sample.is_empty() {
        return ColumnType {
            data_type: DataType::String,
            confidence: 0.0,
            sample_size: 0,
        };
    }

    let word_booleans = sample.iter().any(|v| is_word_boolean(v));

    let mut hits = [0usize; HEURISTICS.len()];
    let mut unmatched = 0usize;
    for value in &sample {
        let mut any = false;
        for (i, ty) in HEURISTICS.iter().enumerate() {
            if *ty == DataType::Boolean && !word_booleans {
                continue;
            }
            if matches_type(value, *ty) {
                hits[i] += 1;
                any = true;
            }
        }
        if !any {
            unmatched += 1;
        }
    }

    // max_by keeps the last maximum; iterate in reverse so earlier heuristics win ties
    let (best_type, best_hits) = HEURISTICS
        .iter()
        .zip(hits.iter())
        .rev()
        .max_by_key(|(_, h)| **h)
        .map(|(t, h)| (*t, *h))
        .unwrap_or((DataType::String, 0));

    let (data_type, count) = if best_hits == 0 || unmatched > best_hits {
        (DataType::String, unmatched)
    } else {
        (best_type, best_hits)
    };

    ColumnType {
        data_type,
        confidence: count as f64 / sample.len() as f64,
        sample_size: sample.len(),
    }
}

/// Detect the type of every column
pub fn detect_data_types(data: &ParsedData) -> ColumnTypes {
    data.headers
        .iter()
        .map(|h| (h.clone(), detect_column_type(data.column(h))))
        .collect()
}
