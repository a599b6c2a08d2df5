//! Entity match review engine
//!
//! Owns review sessions: creation with a fixed expiry horizon, manual and
//! batch decisions, confidence-threshold sweeps, statistics, and the final
//! resolution map handed to the job orchestrator.
//!
//! Sessions belong to the user who created them. Any lookup by another user,
//! of an unknown id, or of an expired session fails with `NotFound`.

use crate::db::kv::KvStore;
use crate::db::sessions::SessionRepository;
use crate::models::column_mapping::EntityType;
use crate::models::import_job::ResolvedEntities;
use crate::models::review::{
    BatchItemOutcome, BatchReviewRequest, BatchReviewResult, BatchSummary, ConfidenceThresholds,
    DecisionCounts, EntityMatches, ManualVerdict, MatchDecision, MatchResult, ReviewDecision,
    ReviewItem, ReviewOutcome, ReviewRequest, ReviewSession, ReviewStatistics, ThresholdUpdate,
};
use chrono::{DateTime, Utc};
use sked_common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default session lifetime
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct ReviewEngine {
    sessions: SessionRepository,
    session_ttl: Duration,
    default_thresholds: ConfidenceThresholds,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl ReviewEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        session_ttl: Duration,
        default_thresholds: ConfidenceThresholds,
    ) -> Self {
        Self {
            sessions: SessionRepository::new(store),
            session_ttl,
            default_thresholds,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a review session for one import attempt
    ///
    /// Thresholds are validated before anything is stored. The owner may
    /// replace their own live session; an expired one is replaced freely.
    ///
    /// # Errors
    /// `Conflict` when a live session with this id belongs to another user
    pub async fn create_review_session(
        &self,
        session_id: &str,
        user_id: &str,
        entity_matches: EntityMatches,
        thresholds: Option<ConfidenceThresholds>,
    ) -> Result<ReviewSession> {
        let thresholds = thresholds.unwrap_or(self.default_thresholds);
        thresholds.validate()?;

        let created_at = Utc::now();
        let ttl = chrono::Duration::milliseconds(self.session_ttl.as_millis().min(i64::MAX as u128) as i64);

        // Rows without any candidate carry nothing to review
        let entity_matches: EntityMatches = entity_matches
            .into_iter()
            .map(|(entity_type, rows)| {
                let rows: BTreeMap<usize, MatchResult> =
                    rows.into_iter().filter(|(_, m)| m.is_ambiguous()).collect();
                (entity_type, rows)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect();

        let session = ReviewSession {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            entity_matches,
            decisions: Default::default(),
            thresholds,
            created_at,
            expires_at: created_at + ttl,
        };

        let _guard = self.write_lock.lock().await;
        match self.sessions.get(session_id, created_at).await {
            Ok(existing) if existing.user_id != user_id => {
                tracing::warn!(session_id, user_id, "Session id already owned by another user");
                return Err(Error::Conflict(format!("Review session {} already exists", session_id)));
            }
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.sessions.save(&session).await?;

        tracing::info!(
            session_id,
            user_id,
            matches = session.total_matches(),
            "Review session created"
        );
        Ok(session)
    }

    /// Live session owned by `user_id`
    pub async fn get_session(&self, session_id: &str, user_id: &str) -> Result<ReviewSession> {
        let session = self.sessions.get(session_id, Utc::now()).await?;
        if session.user_id != user_id {
            // Indistinguishable from absent for anyone but the owner
            return Err(Error::NotFound(format!("Review session {}", session_id)));
        }
        Ok(session)
    }

    /// Record one manual decision
    ///
    /// # Errors
    /// `NotFound` when the session is absent, expired or owned by someone
    /// else; `Validation` when the `(entity type, row)` pair has no match or
    /// an approval names no usable entity.
    pub async fn review_match(&self, request: &ReviewRequest, user_id: &str) -> Result<ReviewOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(&request.session_id, user_id).await?;

        let message = apply_review(&mut session, &request.item, user_id, Utc::now())?;
        self.sessions.save(&session).await?;

        tracing::debug!(
            session_id = %request.session_id,
            entity_type = %request.item.entity_type,
            row_index = request.item.row_index,
            "{}",
            message
        );
        Ok(ReviewOutcome {
            success: true,
            message,
        })
    }

    /// Apply a list of manual decisions; each item succeeds or fails alone
    pub async fn batch_review_matches(
        &self,
        request: &BatchReviewRequest,
        user_id: &str,
    ) -> Result<BatchReviewResult> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(&request.session_id, user_id).await?;
        let now = Utc::now();

        let results: Vec<BatchItemOutcome> = request
            .reviews
            .iter()
            .map(|item| {
                let (success, message) = match apply_review(&mut session, item, user_id, now) {
                    Ok(message) => (true, message),
                    Err(e) => (false, e.to_string()),
                };
                BatchItemOutcome {
                    entity_type: item.entity_type,
                    row_index: item.row_index,
                    success,
                    message,
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        if succeeded > 0 {
            self.sessions.save(&session).await?;
        }

        let summary = BatchSummary {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        };
        tracing::info!(
            session_id = %request.session_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch review applied"
        );
        Ok(BatchReviewResult { results, summary })
    }

    /// Auto-decide every undecided match by the session thresholds
    ///
    /// Matches between the thresholds stay pending. Manual and earlier
    /// automatic decisions are never touched, so a second sweep is a no-op.
    ///
    /// # Returns
    /// Number of decisions recorded by this sweep
    pub async fn apply_automatic_approvals(&self, session_id: &str, user_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(session_id, user_id).await?;
        let now = Utc::now();
        let thresholds = session.thresholds;

        let mut auto: Vec<(EntityType, usize, ReviewDecision)> = Vec::new();
        for (entity_type, rows) in &session.entity_matches {
            for (row_index, result) in rows {
                if session.decision_for(*entity_type, *row_index) != MatchDecision::Pending {
                    continue;
                }
                let decision = thresholds.classify(result.confidence);
                let entity_id = match decision {
                    MatchDecision::AutoApproved => match &result.entity_id {
                        Some(id) => Some(id.clone()),
                        // Nothing to approve onto
                        None => continue,
                    },
                    MatchDecision::AutoRejected => None,
                    _ => continue,
                };
                auto.push((
                    *entity_type,
                    *row_index,
                    ReviewDecision {
                        decision,
                        entity_id,
                        reviewed_by: None,
                        reviewed_at: now,
                        notes: None,
                    },
                ));
            }
        }

        let applied = auto.len();
        if applied > 0 {
            for (entity_type, row_index, decision) in auto {
                session.record_decision(entity_type, row_index, decision);
            }
            self.sessions.save(&session).await?;
        }

        tracing::info!(session_id, applied, "Automatic approvals applied");
        Ok(applied)
    }

    /// Decision counts per entity type and overall
    pub async fn get_review_statistics(&self, session_id: &str, user_id: &str) -> Result<ReviewStatistics> {
        let session = self.get_session(session_id, user_id).await?;
        Ok(statistics(&session))
    }

    /// Change session thresholds; only future sweeps see the new values
    ///
    /// The merged thresholds are validated before the session is touched.
    pub async fn update_confidence_thresholds(
        &self,
        session_id: &str,
        user_id: &str,
        update: ThresholdUpdate,
    ) -> Result<ConfidenceThresholds> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.get_session(session_id, user_id).await?;

        let thresholds = update.apply_to(session.thresholds);
        thresholds.validate()?;
        session.thresholds = thresholds;
        self.sessions.save(&session).await?;

        tracing::info!(
            session_id,
            auto_approve = thresholds.auto_approve,
            require_review = thresholds.require_review,
            auto_reject = thresholds.auto_reject,
            "Confidence thresholds updated"
        );
        Ok(thresholds)
    }

    /// Finish the session: return its resolutions and delete it
    pub async fn complete_session(&self, session_id: &str, user_id: &str) -> Result<ResolvedEntities> {
        let _guard = self.write_lock.lock().await;
        let session = self.get_session(session_id, user_id).await?;
        let resolved = resolved_entities(&session);
        self.sessions.delete(session_id).await?;

        tracing::info!(
            session_id,
            resolved = resolved.values().map(|rows| rows.len()).sum::<usize>(),
            "Review session completed"
        );
        Ok(resolved)
    }
}

/// Apply one manual verdict to an in-memory session
fn apply_review(
    session: &mut ReviewSession,
    item: &ReviewItem,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let result = session.match_for(item.entity_type, item.row_index).ok_or_else(|| {
        Error::Validation(format!(
            "No {} match recorded for row {}",
            item.entity_type, item.row_index
        ))
    })?;

    let (decision, entity_id) = match item.verdict {
        ManualVerdict::Approve => {
            let entity_id = match &item.selected_entity_id {
                Some(selected) => {
                    let known = result.entity_id.as_deref() == Some(selected.as_str())
                        || result
                            .suggested_matches
                            .iter()
                            .any(|c| &c.candidate_id == selected);
                    if !known {
                        return Err(Error::Validation(format!(
                            "Entity {} is not a candidate for {} row {}",
                            selected, item.entity_type, item.row_index
                        )));
                    }
                    selected.clone()
                }
                None => result.entity_id.clone().ok_or_else(|| {
                    Error::Validation(format!(
                        "No candidate entity to approve for {} row {}",
                        item.entity_type, item.row_index
                    ))
                })?,
            };
            (MatchDecision::Approved, Some(entity_id))
        }
        ManualVerdict::Reject => (MatchDecision::Rejected, None),
    };

    let message = match &entity_id {
        Some(id) => format!("{} row {} approved as {}", item.entity_type, item.row_index, id),
        None => format!("{} row {} rejected", item.entity_type, item.row_index),
    };

    session.record_decision(
        item.entity_type,
        item.row_index,
        ReviewDecision {
            decision,
            entity_id,
            reviewed_by: Some(user_id.to_string()),
            reviewed_at: now,
            notes: item.notes.clone(),
        },
    );
    Ok(message)
}

/// Count decisions in a session
pub fn statistics(session: &ReviewSession) -> ReviewStatistics {
    let mut stats = ReviewStatistics::default();

    for (entity_type, rows) in &session.entity_matches {
        let mut counts = DecisionCounts::default();
        for (row_index, result) in rows {
            counts.total += 1;
            match session.decision_for(*entity_type, *row_index) {
                MatchDecision::Approved => counts.approved += 1,
                MatchDecision::Rejected => counts.rejected += 1,
                MatchDecision::AutoApproved => counts.auto_approved += 1,
                MatchDecision::AutoRejected => counts.auto_rejected += 1,
                MatchDecision::Pending if result.confidence >= session.thresholds.require_review => {
                    counts.pending += 1
                }
                MatchDecision::Pending => counts.low_confidence += 1,
            }
        }
        stats.totals.add(&counts);
        stats.by_entity_type.insert(*entity_type, counts);
    }

    stats.requires_manual_review = stats.totals.undecided() > 0;
    stats
}

/// Rows resolved onto existing entities by an approval
pub fn resolved_entities(session: &ReviewSession) -> ResolvedEntities {
    let mut resolved = ResolvedEntities::new();
    for (entity_type, rows) in &session.decisions {
        for (row_index, decision) in rows {
            if let (true, Some(entity_id)) = (decision.decision.is_approval(), &decision.entity_id) {
                resolved
                    .entry(*entity_type)
                    .or_default()
                    .insert(*row_index, entity_id.clone());
            }
        }
    }
    resolved
}
