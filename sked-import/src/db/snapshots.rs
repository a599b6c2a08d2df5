//! Retained progress snapshots
//!
//! The latest snapshot per job is kept under `progress:{job_id}` for a short
//! TTL so late subscribers can catch up.

use crate::db::kv::KvStore;
use sked_common::events::ProgressSnapshot;
use sked_common::Result;
use std::sync::Arc;
use std::time::Duration;

pub fn snapshot_key(job_id: &str) -> String {
    format!("progress:{}", job_id)
}

pub struct SnapshotRepository {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SnapshotRepository {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.store
            .put(
                &snapshot_key(&snapshot.job_id),
                serde_json::to_value(snapshot)?,
                Some(self.ttl),
            )
            .await
    }

    pub async fn latest(&self, job_id: &str) -> Result<Option<ProgressSnapshot>> {
        match self.store.get(&snapshot_key(job_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
