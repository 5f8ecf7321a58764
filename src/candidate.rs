//! Merge candidates.
//!
//! A `MergeCandidate` is a proposed equivalence between two profiles that
//! were not already linked by a shared identifier. Candidates are explicit
//! objects, not hidden errors: the detector records why it thinks the pair
//! matches and where the profiles disagree, and whoever approves the merge
//! sees both. A candidate is consumed exactly once — accepted by the merge
//! engine or rejected — and is never mutated in place beyond that terminal
//! transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::ProfileId;
use crate::tenant::TenantId;

/// Unique identifier for a merge candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(Uuid);

impl CandidateId {
    /// Creates a new random candidate ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One named signal that contributed to a candidate's score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReason {
    /// Human-readable description, e.g. "exact email match".
    pub reason: String,
    /// This signal's contribution to the total score.
    pub score: u8,
}

impl MatchReason {
    /// Creates a reason with its score contribution.
    #[must_use]
    pub fn new(reason: impl Into<String>, score: u8) -> Self {
        Self {
            reason: reason.into(),
            score,
        }
    }
}

/// A field where the two profiles disagree and a merge needs a decision.
///
/// The detector never silently picks a winner; every disagreement is
/// surfaced here for the approver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictField {
    /// Field name, e.g. "email" or "company_name".
    pub field: String,
    /// The first profile's value.
    pub profile1_value: String,
    /// The second profile's value.
    pub profile2_value: String,
}

impl ConflictField {
    /// Creates a conflict field.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        profile1_value: impl Into<String>,
        profile2_value: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            profile1_value: profile1_value.into(),
            profile2_value: profile2_value.into(),
        }
    }
}

/// Lifecycle of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Awaiting an accept/reject decision.
    Pending,
    /// Consumed by the merge engine.
    Accepted,
    /// Discarded without merging.
    Rejected,
}

impl Default for CandidateStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A proposed, unapplied equivalence between two profiles.
///
/// Holds weak references by id; the merge engine re-validates both
/// profiles at merge time since they may have changed since detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    /// Unique id of this proposal.
    pub id: CandidateId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// First profile; the survivor if the candidate is accepted.
    pub profile1_id: ProfileId,
    /// Second profile; retired if the candidate is accepted.
    pub profile2_id: ProfileId,
    /// Total match score, 0-100.
    pub score: u8,
    /// Named signals behind the score.
    pub reasons: Vec<MatchReason>,
    /// Fields needing a resolution decision.
    pub conflicts: Vec<ConflictField>,
    /// Lifecycle state.
    pub status: CandidateStatus,
    /// When the detector produced this proposal.
    pub detected_at: DateTime<Utc>,
}

impl MergeCandidate {
    /// Creates a pending candidate.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        profile1_id: ProfileId,
        profile2_id: ProfileId,
        score: u8,
        reasons: Vec<MatchReason>,
        conflicts: Vec<ConflictField>,
    ) -> Self {
        Self {
            id: CandidateId::new(),
            tenant_id,
            profile1_id,
            profile2_id,
            score: score.min(100),
            reasons,
            conflicts,
            status: CandidateStatus::Pending,
            detected_at: Utc::now(),
        }
    }

    /// Returns true if the candidate proposes the same unordered pair.
    #[must_use]
    pub fn covers_pair(&self, a: ProfileId, b: ProfileId) -> bool {
        (self.profile1_id == a && self.profile2_id == b)
            || (self.profile1_id == b && self.profile2_id == a)
    }

    /// Names of all conflict fields.
    #[must_use]
    pub fn conflict_fields(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.field.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> MergeCandidate {
        MergeCandidate::new(
            TenantId::new(),
            ProfileId::new(),
            ProfileId::new(),
            120,
            vec![MatchReason::new("exact email match", 40)],
            vec![ConflictField::new("phone", "+66111", "+66222")],
        )
    }

    #[test]
    fn test_new_candidate_is_pending_and_clamped() {
        let c = candidate();
        assert_eq!(c.status, CandidateStatus::Pending);
        assert_eq!(c.score, 100);
    }

    #[test]
    fn test_covers_pair_is_unordered() {
        let c = candidate();
        assert!(c.covers_pair(c.profile1_id, c.profile2_id));
        assert!(c.covers_pair(c.profile2_id, c.profile1_id));
        assert!(!c.covers_pair(c.profile1_id, ProfileId::new()));
    }

    #[test]
    fn test_conflict_fields() {
        let c = candidate();
        assert_eq!(c.conflict_fields(), vec!["phone"]);
    }

    #[test]
    fn test_candidate_serialization() {
        let c = candidate();
        let json = serde_json::to_string(&c).unwrap();
        let back: MergeCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(c.id, back.id);
        assert_eq!(back.reasons[0].reason, "exact email match");
    }
}
