//! Service modules for the import pipeline
//!
//! Leaves first: normalizer (with type detection and quality scoring),
//! column mapping resolver over the field catalog, row validator, entity
//! matcher and review engine, then the progress tracker and job
//! orchestrator that execute committed imports.

pub mod column_mapper;
pub mod entity_matcher;
pub mod field_catalog;
pub mod import_pipeline;
pub mod job_orchestrator;
pub mod normalizer;
pub mod progress_tracker;
pub mod quality_scorer;
pub mod review_engine;
pub mod type_detector;
pub mod validator;

pub use column_mapper::ColumnMappingResolver;
pub use entity_matcher::EntityMatcher;
pub use import_pipeline::{ImportPipeline, PreparedImport};
pub use job_orchestrator::{JobOrchestrator, OrchestratorSettings};
pub use normalizer::DataNormalizer;
pub use progress_tracker::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use review_engine::ReviewEngine;
