//! Entity match review session
//!
//! A session holds, per entity type, the match result for every ambiguous
//! source row plus the decision taken on it. Decisions are a closed enum;
//! a row with no entry in `decisions` is pending.

use crate::models::column_mapping::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sked_common::{Error, Result};
use std::collections::BTreeMap;

/// How a match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    None,
}

/// An existing entity a source row may refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub candidate_id: String,
    pub confidence: f64,
    /// Fields that contributed to the score
    pub matching_fields: Vec<String>,
}

/// Match outcome for one source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Best existing entity, if any
    pub entity_id: Option<String>,
    pub confidence: f64,
    pub match_type: MatchType,
    /// Candidates best first
    pub suggested_matches: Vec<CandidateMatch>,
    /// Source value the match was computed for (display only)
    #[serde(default)]
    pub source_value: String,
}

impl MatchResult {
    pub fn no_match(source_value: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            confidence: 0.0,
            match_type: MatchType::None,
            suggested_matches: Vec::new(),
            source_value: source_value.into(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.match_type != MatchType::None
    }
}

/// Decision state of one match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchDecision {
    Pending,
    Approved,
    Rejected,
    AutoApproved,
    AutoRejected,
}

impl MatchDecision {
    /// Taken by a human (never overwritten by automatic sweeps)
    pub fn is_manual(&self) -> bool {
        matches!(self, MatchDecision::Approved | MatchDecision::Rejected)
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, MatchDecision::Approved | MatchDecision::AutoApproved)
    }
}

/// Recorded decision for one `(entity type, row)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub decision: MatchDecision,
    /// Entity the row resolves to when approved
    pub entity_id: Option<String>,
    /// `None` for automatic decisions
    pub reviewed_by: Option<String>,
    pub reviewed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Per-session decision thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub auto_approve: f64,
    pub require_review: f64,
    pub auto_reject: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            auto_approve: 0.9,
            require_review: 0.7,
            auto_reject: 0.3,
        }
    }
}

impl ConfidenceThresholds {
    /// Each threshold in `[0,1]`, and `auto_reject <= auto_approve`
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("auto_approve", self.auto_approve),
            ("require_review", self.require_review),
            ("auto_reject", self.auto_reject),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!(
                    "Threshold {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.auto_reject > self.auto_approve {
            return Err(Error::Validation(format!(
                "auto_reject ({}) must not exceed auto_approve ({})",
                self.auto_reject, self.auto_approve
            )));
        }
        Ok(())
    }

    /// Automatic decision for a confidence; both boundaries are inclusive
    pub fn classify(&self, confidence: f64) -> MatchDecision {
        if confidence >= self.auto_approve {
            MatchDecision::AutoApproved
        } else if confidence <= self.auto_reject {
            MatchDecision::AutoRejected
        } else {
            MatchDecision::Pending
        }
    }
}

/// Partial threshold update; absent fields keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    pub auto_approve: Option<f64>,
    pub require_review: Option<f64>,
    pub auto_reject: Option<f64>,
}

impl ThresholdUpdate {
    pub fn apply_to(&self, current: ConfidenceThresholds) -> ConfidenceThresholds {
        ConfidenceThresholds {
            auto_approve: self.auto_approve.unwrap_or(current.auto_approve),
            require_review: self.require_review.unwrap_or(current.require_review),
            auto_reject: self.auto_reject.unwrap_or(current.auto_reject),
        }
    }
}

pub type EntityMatches = BTreeMap<EntityType, BTreeMap<usize, MatchResult>>;

/// Review session for one import attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub session_id: String,
    pub user_id: String,
    pub entity_matches: EntityMatches,
    /// Rows without an entry are pending
    pub decisions: BTreeMap<EntityType, BTreeMap<usize, ReviewDecision>>,
    pub thresholds: ConfidenceThresholds,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReviewSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn match_for(&self, entity_type: EntityType, row_index: usize) -> Option<&MatchResult> {
        self.entity_matches.get(&entity_type)?.get(&row_index)
    }

    pub fn decision_for(&self, entity_type: EntityType, row_index: usize) -> MatchDecision {
        self.decisions
            .get(&entity_type)
            .and_then(|rows| rows.get(&row_index))
            .map(|d| d.decision)
            .unwrap_or(MatchDecision::Pending)
    }

    pub fn record_decision(
        &mut self,
        entity_type: EntityType,
        row_index: usize,
        decision: ReviewDecision,
    ) {
        self.decisions
            .entry(entity_type)
            .or_default()
            .insert(row_index, decision);
    }

    pub fn total_matches(&self) -> usize {
        self.entity_matches.values().map(BTreeMap::len).sum()
    }
}

/// Manual verdict on a single match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualVerdict {
    Approve,
    Reject,
}

/// One manual review action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub entity_type: EntityType,
    pub row_index: usize,
    pub verdict: ManualVerdict,
    /// Overrides the best candidate when approving
    #[serde(default)]
    pub selected_entity_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub item: ReviewItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReviewRequest {
    pub session_id: String,
    pub reviews: Vec<ReviewItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    pub entity_type: EntityType,
    pub row_index: usize,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReviewResult {
    pub results: Vec<BatchItemOutcome>,
    pub summary: BatchSummary,
}

/// Decision counts for one entity type (or the whole session)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub auto_approved: usize,
    pub auto_rejected: usize,
    /// Undecided, confidence at or above `require_review`
    pub pending: usize,
    /// Undecided, confidence below `require_review`
    pub low_confidence: usize,
}

impl DecisionCounts {
    pub fn undecided(&self) -> usize {
        self.pending + self.low_confidence
    }

    pub(crate) fn add(&mut self, other: &DecisionCounts) {
        self.total += other.total;
        self.approved += other.approved;
        self.rejected += other.rejected;
        self.auto_approved += other.auto_approved;
        self.auto_rejected += other.auto_rejected;
        self.pending += other.pending;
        self.low_confidence += other.low_confidence;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewStatistics {
    pub by_entity_type: BTreeMap<EntityType, DecisionCounts>,
    pub totals: DecisionCounts,
    /// Undecided matches remain; commit should wait for a human
    pub requires_manual_review: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_partition_is_inclusive() {
        let t = ConfidenceThresholds::default();
        assert_eq!(t.classify(0.9), MatchDecision::AutoApproved);
        assert_eq!(t.classify(0.3), MatchDecision::AutoRejected);
        assert_eq!(t.classify(0.5), MatchDecision::Pending);
        assert_eq!(t.classify(0.899), MatchDecision::Pending);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ConfidenceThresholds::default().validate().is_ok());

        let out_of_range = ConfidenceThresholds {
            auto_approve: 1.2,
            ..Default::default()
        };
        assert!(matches!(out_of_range.validate(), Err(Error::Validation(_))));

        let inverted = ConfidenceThresholds {
            auto_approve: 0.2,
            require_review: 0.3,
            auto_reject: 0.5,
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_partial_update_keeps_other_values() {
        let updated = ThresholdUpdate {
            auto_approve: Some(0.95),
            ..Default::default()
        }
        .apply_to(ConfidenceThresholds::default());
        assert_eq!(updated.auto_approve, 0.95);
        assert_eq!(updated.auto_reject, 0.3);
    }

    #[test]
    fn test_review_request_flattens_item() {
        let json = serde_json::json!({
            "session_id": "s1",
            "entity_type": "studentGroup",
            "row_index": 4,
            "verdict": "approve"
        });
        let request: ReviewRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.item.entity_type, EntityType::StudentGroup);
        assert_eq!(request.item.verdict, ManualVerdict::Approve);
        assert_eq!(request.item.selected_entity_id, None);
    }
}
