//! Persistence for sked-import
//!
//! Everything is stored through the [`kv::KvStore`] interface: SQLite in the
//! service binary, [`kv::MemoryStore`] in tests.

pub mod jobs;
pub mod kv;
pub mod sessions;
pub mod snapshots;
pub mod sqlite;

pub use jobs::JobRepository;
pub use kv::{KvStore, MemoryStore};
pub use sessions::SessionRepository;
pub use snapshots::SnapshotRepository;
pub use sqlite::SqliteStore;

use sked_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing, then
/// ensures the key/value table exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    sqlite::init_tables(&pool).await?;

    Ok(pool)
}
