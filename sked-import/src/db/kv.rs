//! Key/value persistence interface
//!
//! Jobs, review sessions and progress snapshots are stored as JSON values
//! under opaque string keys with an optional time-to-live. Expiry is passive:
//! an entry past its TTL is invisible to reads and purged lazily.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sked_common::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or replace; `ttl = None` never expires
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Live value under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Returns whether a live entry was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Live entries whose key starts with `prefix`, sorted by key
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// Absolute expiry for a TTL measured from `now`
pub fn expiry_from(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| now + chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64))
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store for tests and embedded use
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged
    pub async fn raw_len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = expiry_from(Utc::now(), ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: purge under the write lock, re-checking in case it was replaced
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));

        let mut out: Vec<(String, Value)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
