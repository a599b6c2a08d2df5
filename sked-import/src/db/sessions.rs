//! Review session persistence
//!
//! Sessions live under `review:{id}` with a TTL running to `expires_at`.
//! Expiry is also checked at read time, so a session is gone the moment it
//! expires even if the backing store keeps the row a little longer.

use crate::db::kv::KvStore;
use crate::models::review::ReviewSession;
use chrono::{DateTime, Utc};
use sked_common::{Error, Result};
use std::sync::Arc;

const SESSION_PREFIX: &str = "review:";

pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

pub struct SessionRepository {
    store: Arc<dyn KvStore>,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Save a session; an already expired session is rejected as `NotFound`
    pub async fn save(&self, session: &ReviewSession) -> Result<()> {
        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .map_err(|_| Error::NotFound(format!("Review session {} has expired", session.session_id)))?;

        self.store
            .put(
                &session_key(&session.session_id),
                serde_json::to_value(session)?,
                Some(remaining),
            )
            .await
    }

    /// Live session by id
    ///
    /// `NotFound` when absent or expired; expired sessions are deleted.
    pub async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<ReviewSession> {
        let key = session_key(session_id);
        let not_found = || Error::NotFound(format!("Review session {}", session_id));

        let value = self.store.get(&key).await?.ok_or_else(not_found)?;
        let session: ReviewSession = serde_json::from_value(value)?;

        if session.is_expired(now) {
            tracing::debug!(session_id, "Review session expired at read");
            self.store.delete(&key).await?;
            return Err(not_found());
        }
        Ok(session)
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.store.delete(&session_key(session_id)).await
    }
}
