//! Normalizer options, transformation log and quality report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Normalization switches
///
/// Deserializes from the `[normalization]` config section; every switch
/// defaults to on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationOptions {
    pub trim_whitespace: bool,
    pub remove_empty_rows: bool,
    pub remove_duplicate_rows: bool,
    pub normalize_headers: bool,
    pub convert_data_types: bool,
    pub handle_null_values: bool,
    /// Extra literals treated as null, merged with the default lexicon
    pub custom_null_values: Vec<String>,
}

impl Default for NormalizationOptions {
    fn default() -> Self {
        Self {
            trim_whitespace: true,
            remove_empty_rows: true,
            remove_duplicate_rows: true,
            normalize_headers: true,
            convert_data_types: true,
            handle_null_values: true,
            custom_null_values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    HeaderNormalization,
    NullCoalescing,
    WhitespaceTrim,
    EmptyRowRemoval,
    DuplicateRowRemoval,
    TypeConversion,
}

/// Log entry for one applied normalization step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformation {
    #[serde(rename = "type")]
    pub kind: TransformationType,
    pub description: String,
    pub rows_affected: usize,
}

/// Detected column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Date,
    Boolean,
    Email,
    Phone,
    Url,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Url => "url",
        };
        f.write_str(name)
    }
}

/// Per-column type detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnType {
    pub data_type: DataType,
    /// Hits for `data_type` divided by sampled non-null values
    pub confidence: f64,
    pub sample_size: usize,
}

pub type ColumnTypes = BTreeMap<String, ColumnType>;

/// Quality summary of a normalization pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub total_rows: usize,
    pub total_cells: usize,
    pub null_values: usize,
    pub duplicate_rows: usize,
    pub empty_rows: usize,
    pub type_mismatches: usize,
    /// 0 - 100
    pub quality_score: u8,
    pub recommendations: Vec<String>,
}

/// Normalizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub data: crate::models::ParsedData,
    pub transformations: Vec<DataTransformation>,
    pub column_types: ColumnTypes,
    pub quality_report: DataQualityReport,
}
