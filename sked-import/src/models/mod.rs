//! Data models for sked-import

pub mod column_mapping;
pub mod import_job;
pub mod normalization;
pub mod parsed_data;
pub mod review;
pub mod validation;

pub use column_mapping::{
    ColumnMapping, EntityType, FieldCandidate, FrozenMappingSet, MappedRecord, MappedRow,
    MappingCompleteness, MappingDetectionResult, MappingSet, MappingSuggestion, Transformation,
};
pub use import_job::{
    AttemptRecord, ImportJob, ImportJobSpec, ImportProgress, ResolvedEntities, RowFailure,
};
pub use normalization::{
    ColumnType, ColumnTypes, DataQualityReport, DataTransformation, DataType,
    NormalizationOptions, NormalizationResult, TransformationType,
};
pub use parsed_data::{CellValue, ParseMetadata, ParsedData, Row};
pub use review::{
    BatchItemOutcome, BatchReviewRequest, BatchReviewResult, BatchSummary, CandidateMatch,
    ConfidenceThresholds, DecisionCounts, EntityMatches, ManualVerdict, MatchDecision,
    MatchResult, MatchType, ReviewDecision, ReviewItem, ReviewOutcome, ReviewRequest,
    ReviewSession, ReviewStatistics, ThresholdUpdate,
};
pub use validation::{IssueSeverity, RowIssue, ValidationResult};
