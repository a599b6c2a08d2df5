//! In-memory collaborators with failure injection

use sked_common::{Error, Result};
use sked_import::collaborators::{BlobStore, EntityDirectory, ExistingEntity, ImportSink, ScheduleEntry};
use sked_import::models::{EntityType, MappedRecord, ParsedData};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Files keyed by id
#[derive(Default)]
pub struct FakeBlobStore {
    files: Mutex<HashMap<String, ParsedData>>,
    fetches: AtomicUsize,
}

impl FakeBlobStore {
    pub fn insert(&self, file_id: &str, data: ParsedData) {
        self.files.lock().unwrap().insert(file_id.to_string(), data);
    }

    pub fn remove(&self, file_id: &str) {
        self.files.lock().unwrap().remove(file_id);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BlobStore for FakeBlobStore {
    async fn fetch(&self, file_id: &str) -> Result<ParsedData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File {}", file_id)))
    }
}

/// How the sink answers
#[derive(Debug, Clone, Default)]
pub struct SinkBehavior {
    /// Every call fails with `Transient`
    pub always_transient: bool,
    /// Entity names answered with `Conflict`
    pub conflicting_names: HashSet<String>,
    /// Sleep before answering
    pub delay: Option<Duration>,
}

/// Records what was written
#[derive(Default)]
pub struct FakeSink {
    behavior: Mutex<SinkBehavior>,
    entities: Mutex<Vec<(EntityType, String, String)>>,
    schedule: Mutex<Vec<ScheduleEntry>>,
    calls: AtomicUsize,
}

impl FakeSink {
    pub fn with_behavior(behavior: SinkBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            ..Default::default()
        }
    }

    pub fn set_behavior(&self, behavior: SinkBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (type, name, id) of every created entity
    pub fn entities(&self) -> Vec<(EntityType, String, String)> {
        self.entities.lock().unwrap().clone()
    }

    pub fn schedule_entries(&self) -> Vec<ScheduleEntry> {
        self.schedule.lock().unwrap().clone()
    }

    async fn gate(&self, name: Option<&str>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }
        if behavior.always_transient {
            return Err(Error::Transient("sink unavailable".into()));
        }
        if let Some(name) = name {
            if behavior.conflicting_names.contains(name) {
                return Err(Error::Conflict(format!("{} already exists", name)));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImportSink for FakeSink {
    async fn create_entity(&self, entity_type: EntityType, record: &MappedRecord) -> Result<String> {
        let name = record.text("name").unwrap_or_default();
        self.gate(Some(&name)).await?;

        let mut entities = self.entities.lock().unwrap();
        let id = format!("{}-{}", entity_type, entities.len() + 1);
        entities.push((entity_type, name, id.clone()));
        Ok(id)
    }

    async fn import_schedule_entry(&self, entry: &ScheduleEntry) -> Result<String> {
        self.gate(None).await?;

        let mut schedule = self.schedule.lock().unwrap();
        schedule.push(entry.clone());
        Ok(format!("entry-{}", schedule.len()))
    }
}

/// Fixed existing entities per type
#[derive(Default)]
pub struct FakeDirectory {
    entities: Mutex<HashMap<EntityType, Vec<ExistingEntity>>>,
}

impl FakeDirectory {
    pub fn add(&self, entity_type: EntityType, entity: ExistingEntity) {
        self.entities
            .lock()
            .unwrap()
            .entry(entity_type)
            .or_default()
            .push(entity);
    }
}

#[async_trait::async_trait]
impl EntityDirectory for FakeDirectory {
    async fn existing(&self, entity_type: EntityType) -> Result<Vec<ExistingEntity>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&entity_type)
            .cloned()
            .unwrap_or_default())
    }
}
