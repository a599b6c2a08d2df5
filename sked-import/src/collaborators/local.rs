//! Standalone collaborator implementations for the service binary
//!
//! - [`JsonDirBlobStore`] reads `<dir>/<file_id>.json` files holding a
//!   serialized [`ParsedData`], as dropped by an upstream parser
//! - [`KvCatalog`] keeps entities and schedule entries in the same key/value
//!   store as jobs and sessions
//!
//! Both are idempotent on retry: re-creating an entity with a known name or
//! re-committing an identical schedule entry returns the existing id.

use super::{BlobStore, EntityDirectory, ExistingEntity, ImportSink, ScheduleEntry};
use crate::db::kv::KvStore;
use crate::models::column_mapping::{EntityType, MappedRecord};
use crate::models::parsed_data::ParsedData;
use crate::services::entity_matcher::normalize_name;
use sked_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct JsonDirBlobStore {
    dir: PathBuf,
}

impl JsonDirBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl BlobStore for JsonDirBlobStore {
    async fn fetch(&self, file_id: &str) -> Result<ParsedData> {
        if file_id.is_empty()
            || file_id.contains(['/', '\\'])
            || file_id.starts_with('.')
        {
            return Err(Error::Validation(format!("Invalid file id '{}'", file_id)));
        }

        let path = self.dir.join(format!("{}.json", file_id));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("File {}", file_id)));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Validation(format!("File {} is not parsed data: {}", file_id, e)))
    }
}

fn entity_prefix(entity_type: EntityType) -> String {
    format!("entity:{}:", entity_type)
}

fn slot_key(entry: &ScheduleEntry) -> String {
    format!(
        "schedule:{}:{}:{}",
        entry.venue_id, entry.day_of_week, entry.start_time
    )
}

/// Entity and schedule storage on a [`KvStore`]
pub struct KvCatalog {
    store: Arc<dyn KvStore>,
    /// Serializes check-then-insert
    write_lock: Mutex<()>,
}

impl KvCatalog {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl EntityDirectory for KvCatalog {
    async fn existing(&self, entity_type: EntityType) -> Result<Vec<ExistingEntity>> {
        self.store
            .scan_prefix(&entity_prefix(entity_type))
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(Error::from))
            .collect()
    }
}

#[async_trait::async_trait]
impl ImportSink for KvCatalog {
    async fn create_entity(&self, entity_type: EntityType, record: &MappedRecord) -> Result<String> {
        let name = record
            .text("name")
            .ok_or_else(|| Error::Validation(format!("{} record has no name", entity_type)))?;
        let normalized = normalize_name(&name);

        let _guard = self.write_lock.lock().await;
        if let Some(found) = self
            .existing(entity_type)
            .await?
            .into_iter()
            .find(|e| e.field("name").is_some_and(|n| normalize_name(n) == normalized))
        {
            tracing::debug!(entity_type = %entity_type, id = %found.id, "Entity already exists");
            return Ok(found.id);
        }

        let entity = ExistingEntity {
            id: Uuid::new_v4().to_string(),
            fields: record
                .fields
                .iter()
                .filter(|(_, v)| !v.is_blank())
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        };
        let key = format!("{}{}", entity_prefix(entity_type), entity.id);
        self.store.put(&key, serde_json::to_value(&entity)?, None).await?;
        Ok(entity.id)
    }

    async fn import_schedule_entry(&self, entry: &ScheduleEntry) -> Result<String> {
        let key = slot_key(entry);

        let _guard = self.write_lock.lock().await;
        if let Some(value) = self.store.get(&key).await? {
            let (id, booked): (String, ScheduleEntry) = serde_json::from_value(value)?;
            let same_booking = booked.course_id == entry.course_id
                && booked.lecturer_id == entry.lecturer_id
                && booked.end_time == entry.end_time;
            if same_booking {
                return Ok(id);
            }
            return Err(Error::Conflict(format!(
                "Venue {} is already booked on day {} at {}",
                entry.venue_id, entry.day_of_week, entry.start_time
            )));
        }

        let id = Uuid::new_v4().to_string();
        self.store
            .put(&key, serde_json::to_value((&id, entry))?, None)
            .await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;
    use crate::models::parsed_data::CellValue;

    fn record(entity_type: EntityType, name: &str) -> MappedRecord {
        let mut record = MappedRecord::new(entity_type, 0);
        record.fields.insert("name".to_string(), CellValue::text(name));
        record
    }

    fn entry(course: &str) -> ScheduleEntry {
        ScheduleEntry {
            row_index: 0,
            course_id: course.to_string(),
            lecturer_id: "l1".to_string(),
            venue_id: "v1".to_string(),
            student_group_id: None,
            day_of_week: 1,
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_entity_creation_is_idempotent_by_name() {
        let catalog = KvCatalog::new(Arc::new(MemoryStore::new()));

        let first = catalog
            .create_entity(EntityType::Venue, &record(EntityType::Venue, "Hall A"))
            .await
            .unwrap();
        let again = catalog
            .create_entity(EntityType::Venue, &record(EntityType::Venue, "  hall a "))
            .await
            .unwrap();
        assert_eq!(first, again);

        let venues = catalog.existing(EntityType::Venue).await.unwrap();
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].field("name"), Some("Hall A"));
        assert!(catalog.existing(EntityType::Course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nameless_entity_rejected() {
        let catalog = KvCatalog::new(Arc::new(MemoryStore::new()));
        let result = catalog
            .create_entity(EntityType::Lecturer, &MappedRecord::new(EntityType::Lecturer, 0))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_schedule_slot_conflicts() {
        let catalog = KvCatalog::new(Arc::new(MemoryStore::new()));

        let id = catalog.import_schedule_entry(&entry("c1")).await.unwrap();
        assert_eq!(catalog.import_schedule_entry(&entry("c1")).await.unwrap(), id);

        let clash = catalog.import_schedule_entry(&entry("c2")).await;
        assert!(matches!(clash, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_blob_store_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = ParsedData::from_records(["Room Name", "Capacity"], vec![vec!["Hall A", "120"]]);
        std::fs::write(
            dir.path().join("upload-1.json"),
            serde_json::to_string(&data).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();

        let store = JsonDirBlobStore::new(dir.path());
        assert_eq!(store.fetch("upload-1").await.unwrap(), data);
        assert!(matches!(store.fetch("missing").await, Err(Error::NotFound(_))));
        assert!(matches!(store.fetch("broken").await, Err(Error::Validation(_))));
        assert!(matches!(store.fetch("../etc/passwd").await, Err(Error::Validation(_))));
    }
}
