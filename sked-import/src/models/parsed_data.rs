//! Parsed tabular data as handed over by the blob store
//!
//! Cell values are a closed enum rather than free-form JSON so every consumer
//! matches exhaustively on what a spreadsheet cell can hold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single spreadsheet / CSV cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
    /// Produced by the split-array transformation
    List(Vec<String>),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null, or text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::List(items) => items.is_empty(),
            CellValue::Boolean(_) | CellValue::Number(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Display form used for similarity scoring and type detection
    ///
    /// Returns `None` for null cells.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            CellValue::Text(s) => f.write_str(s),
            CellValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

/// One data row: column name → value
///
/// A sorted map, so two rows compare equal regardless of key insertion order.
pub type Row = BTreeMap<String, CellValue>;

/// Metadata recorded by the parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub total_rows: usize,
    pub empty_rows: usize,
    pub duplicate_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

/// Headers plus rows of one uploaded file
///
/// Never mutated after parsing; normalization produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedData {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub metadata: ParseMetadata,
}

impl ParsedData {
    /// Build from header names and positional row values
    ///
    /// Short rows are padded with nulls, extra trailing values are dropped.
    pub fn from_records<H, R, C>(headers: H, records: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator<Item = Vec<C>>,
        C: Into<CellValue>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let rows: Vec<Row> = records
            .into_iter()
            .map(|values| {
                let mut values = values.into_iter().map(Into::into);
                headers
                    .iter()
                    .map(|h| (h.clone(), values.next().unwrap_or(CellValue::Null)))
                    .collect()
            })
            .collect();

        let metadata = ParseMetadata {
            total_rows: rows.len(),
            ..Default::default()
        };

        Self {
            headers,
            rows,
            metadata,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Values of one column in row order (missing keys read as null)
    pub fn column<'a>(&'a self, header: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
        static NULL: CellValue = CellValue::Null;
        self.rows.iter().map(move |row| row.get(header).unwrap_or(&NULL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_records_pads_short_rows() {
        let data = ParsedData::from_records(["a", "b", "c"], vec![vec!["1", "2"]]);
        assert_eq!(data.rows[0].get("c"), Some(&CellValue::Null));
        assert_eq!(data.metadata.total_rows, 1);
    }

    #[test]
    fn test_row_equality_ignores_insertion_order() {
        let mut a = Row::new();
        a.insert("x".into(), CellValue::text("1"));
        a.insert("y".into(), CellValue::text("2"));
        let mut b = Row::new();
        b.insert("y".into(), CellValue::text("2"));
        b.insert("x".into(), CellValue::text("1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cell_value_untagged_json() {
        let cells: Vec<CellValue> = serde_json::from_str(r#"[null, true, 42, "Room A", ["a","b"]]"#).unwrap();
        assert_eq!(cells[0], CellValue::Null);
        assert_eq!(cells[1], CellValue::Boolean(true));
        assert_eq!(cells[2], CellValue::Number(42.0));
        assert_eq!(cells[3], CellValue::text("Room A"));
        assert_eq!(cells[4], CellValue::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(CellValue::Number(120.0).to_string(), "120");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");
        assert!(CellValue::text("   ").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }
}
