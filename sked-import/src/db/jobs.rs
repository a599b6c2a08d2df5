//! Import job persistence
//!
//! Jobs live under `job:{id}`. Every read-modify-write goes through
//! [`JobRepository::update`], serialized by a repository-wide lock so the
//! orchestrator, workers and progress tracker never interleave writes to
//! the same record.

use crate::db::kv::KvStore;
use crate::models::import_job::ImportJob;
use sked_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const JOB_PREFIX: &str = "job:";

pub fn job_key(job_id: &str) -> String {
    format!("{}{}", JOB_PREFIX, job_id)
}

pub struct JobRepository {
    store: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
    /// TTL applied once a job reaches a terminal state
    terminal_ttl: Option<Duration>,
}

impl JobRepository {
    pub fn new(store: Arc<dyn KvStore>, terminal_ttl: Option<Duration>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            terminal_ttl,
        }
    }

    async fn put(&self, job: &ImportJob) -> Result<()> {
        let ttl = if job.status.is_terminal() {
            self.terminal_ttl
        } else {
            None
        };
        self.store
            .put(&job_key(&job.id), serde_json::to_value(job)?, ttl)
            .await
    }

    /// Insert or overwrite a job record
    pub async fn save(&self, job: &ImportJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.put(job).await
    }

    pub async fn load(&self, job_id: &str) -> Result<Option<ImportJob>> {
        match self.store.get(&job_key(job_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Job by id, `NotFound` when absent or expired
    pub async fn get(&self, job_id: &str) -> Result<ImportJob> {
        self.load(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Import job {}", job_id)))
    }

    /// Read-modify-write under the repository lock
    ///
    /// Nothing is written when `f` returns an error.
    ///
    /// # Returns
    /// The updated job and the closure's result
    pub async fn update<R, F>(&self, job_id: &str, f: F) -> Result<(ImportJob, R)>
    where
        F: FnOnce(&mut ImportJob) -> Result<R>,
    {
        let _guard = self.write_lock.lock().await;
        let mut job = self.get(job_id).await?;
        let out = f(&mut job)?;
        self.put(&job).await?;
        Ok((job, out))
    }

    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&job_key(job_id)).await
    }

    /// Every live job, oldest first
    pub async fn list_all(&self) -> Result<Vec<ImportJob>> {
        let mut jobs = self
            .store
            .scan_prefix(JOB_PREFIX)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value::<ImportJob>(value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
