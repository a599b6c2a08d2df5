//! SQLite-backed key/value store
//!
//! One `kv_entries` table; values are JSON text, `expires_at` is epoch
//! milliseconds (NULL = never). Writes go through `retry_on_lock`.

use crate::db::kv::{expiry_from, KvStore};
use crate::utils::retry_on_lock;
use chrono::Utc;
use serde_json::Value;
use sked_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::time::Duration;

/// Default total retry budget for lock contention
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    /// Wrap an existing pool, creating the table if needed
    pub async fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            max_lock_wait_ms,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Delete every expired entry; returns how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let pool = &self.pool;
        let removed = retry_on_lock("kv purge", self.max_lock_wait_ms, || async move {
            sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now)
                .execute(pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(Error::Database)
        })
        .await?;

        if removed > 0 {
            tracing::debug!(removed, "Purged expired kv entries");
        }
        Ok(removed)
    }
}

/// Create the key/value table
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries(expires_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (kv_entries)");
    Ok(())
}

#[async_trait::async_trait]
impl KvStore for SqliteStore {
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        // Prepare everything before touching the pool
        let text = serde_json::to_string(&value)?;
        let expires_at = expiry_from(Utc::now(), ttl).map(|at| at.timestamp_millis());
        let pool = &self.pool;
        let text = &text;

        retry_on_lock("kv put", self.max_lock_wait_ms, || async move {
            sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(key)
            .bind(text)
            .bind(expires_at)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let text: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let pool = &self.pool;
        let live = retry_on_lock("kv delete", self.max_lock_wait_ms, || async move {
            let live: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
            )
            .bind(key)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(Error::Database)?;

            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(pool)
                .await
                .map_err(Error::Database)?;
            Ok(live.is_some())
        })
        .await?;
        Ok(live)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let now = Utc::now().timestamp_millis();
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM kv_entries
            WHERE substr(key, 1, ?) = ? AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY key
            "#,
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, Value)> {
                let key: String = row.try_get("key")?;
                let text: String = row.try_get("value")?;
                Ok((key, serde_json::from_str(&text)?))
            })
            .collect()
    }
}
