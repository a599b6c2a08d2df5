//! External collaborator interfaces
//!
//! The import core consumes parsed files, writes entities and schedule
//! entries, and looks up existing entities through these traits. Concrete
//! implementations are injected; [`local`] holds the ones the service binary
//! runs with and tests use in-memory fakes.
//!
//! Every call made from a job stage goes through [`with_timeout`] so a slow
//! dependency surfaces as a `Transient` error instead of pinning a worker.

use crate::models::column_mapping::{EntityType, MappedRecord};
use crate::models::parsed_data::ParsedData;
use serde::{Deserialize, Serialize};
use sked_common::{Error, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod local;

pub use local::{JsonDirBlobStore, KvCatalog};

/// Existing domain entity as seen by the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingEntity {
    pub id: String,
    /// Catalog field name → display value
    pub fields: BTreeMap<String, String>,
}

impl ExistingEntity {
    pub fn new(id: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// One schedule row with its references resolved to entity ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub row_index: usize,
    pub course_id: String,
    pub lecturer_id: String,
    pub venue_id: String,
    pub student_group_id: Option<String>,
    /// 1 (Monday) ..= 7 (Sunday)
    pub day_of_week: u8,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
}

/// Source of uploaded file contents
///
/// # Errors
/// `NotFound` for an unknown file id; `Transient` when storage is unavailable.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Headers and rows for a previously uploaded file
    async fn fetch(&self, file_id: &str) -> Result<ParsedData>;
}

/// Destination for imported records
///
/// `Conflict` and `Validation` results fail only the row being written;
/// `Transient` results fail the whole stage and are retried.
#[async_trait::async_trait]
pub trait ImportSink: Send + Sync {
    /// Create a venue, lecturer, course or student group; returns its id
    async fn create_entity(&self, entity_type: EntityType, record: &MappedRecord) -> Result<String>;

    /// Commit one schedule entry; returns its id
    async fn import_schedule_entry(&self, entry: &ScheduleEntry) -> Result<String>;
}

/// Read access to entities that already exist
#[async_trait::async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn existing(&self, entity_type: EntityType) -> Result<Vec<ExistingEntity>>;
}

/// The collaborator set handed to the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub blob_store: Arc<dyn BlobStore>,
    pub sink: Arc<dyn ImportSink>,
    pub directory: Arc<dyn EntityDirectory>,
}

/// Await a collaborator call, mapping an elapsed timeout to `Transient`
///
/// # Arguments
/// * `operation` - Name for the error message and logs
/// * `timeout` - Upper bound for the call
/// * `future` - The collaborator call
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "Dependency call timed out");
            Err(Error::Transient(format!(
                "{} timed out after {} ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_transient() {
        let result: Result<()> = with_timeout("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow call"));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout("call", Duration::from_secs(1), async {
            Err(Error::Conflict("duplicate".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }
}
