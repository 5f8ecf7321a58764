//! Error types for unify.
//!
//! All errors are strongly typed using thiserror. The external layer
//! (HTTP, UI, schedulers) pattern-matches on these to produce user
//! messages; batch and sync operations report per-record failures in
//! their results instead of raising them.

use thiserror::Error;

use crate::candidate::CandidateId;
use crate::identifier::IdentifierId;
use crate::profile::ProfileId;
use crate::storage::StorageError;

/// Validation errors raised before any store mutation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The record has no usable field at all.
    #[error("Record carries no usable field")]
    EmptyRecord,

    /// Match quality outside the 0-100 scale.
    #[error("Match quality {value} is out of range [0, 100]")]
    MatchQualityOutOfRange {
        /// The rejected value.
        value: u8,
    },

    /// The identifier source string matched no known system.
    #[error("Unknown identifier source: {value}")]
    UnknownSource {
        /// The rejected value.
        value: String,
    },

    /// A source type is required when an external id is present.
    #[error("Source type cannot be empty")]
    EmptySourceType,

    /// External ids cannot be empty or whitespace.
    #[error("External id cannot be empty")]
    EmptyExternalId,
}

/// Top-level error type for unify operations.
#[derive(Debug, Error)]
pub enum UnifyError {
    /// Input rejected before any store mutation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No profile with this id in the tenant.
    #[error("Profile not found: {id}")]
    ProfileNotFound {
        /// The missing profile id.
        id: ProfileId,
    },

    /// No identifier with this id in the tenant.
    #[error("Identifier not found: {id}")]
    IdentifierNotFound {
        /// The missing identifier id.
        id: IdentifierId,
    },

    /// No merge candidate with this id in the tenant.
    #[error("Merge candidate not found: {id}")]
    CandidateNotFound {
        /// The missing candidate id.
        id: CandidateId,
    },

    /// The identifier key is already claimed by a different live profile.
    /// Re-linking is an explicit operator decision, never automatic.
    #[error("Identifier {key} is already attached to profile {held_by}")]
    IdentifierConflict {
        /// Display form of the conflicting key.
        key: String,
        /// The profile currently holding the key.
        held_by: ProfileId,
    },

    /// The candidate no longer describes reality: one of its profiles was
    /// merged or deactivated after detection, or the candidate was already
    /// consumed.
    #[error("Merge candidate {id} is stale: {reason}")]
    StaleCandidate {
        /// The stale candidate.
        id: CandidateId,
        /// What invalidated it.
        reason: String,
    },

    /// A MANUAL merge did not resolve every reported conflict field.
    #[error("Manual merge is missing resolutions for: {}", missing.join(", "))]
    IncompleteResolution {
        /// Conflict fields without a supplied resolution.
        missing: Vec<String>,
    },

    /// The remote sync endpoint was unreachable or returned a failure.
    /// Fatal for the whole sync call; already-committed records stay.
    #[error("Upstream fetch failed: {message}")]
    UpstreamFetch {
        /// Description of the failure.
        message: String,
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
    },

    /// Backend failure not expressible as a domain error.
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for UnifyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ProfileNotFound(id) => Self::ProfileNotFound { id },
            StorageError::IdentifierNotFound(id) => Self::IdentifierNotFound { id },
            StorageError::CandidateNotFound(id) => Self::CandidateNotFound { id },
            StorageError::IdentifierConflict { key, held_by } => {
                Self::IdentifierConflict { key, held_by }
            }
            other => Self::Storage(other),
        }
    }
}

impl UnifyError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a conflict on an identifier key.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::IdentifierConflict { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// Only upstream fetch failures are worth retrying: the ingestion
    /// chain is idempotent, so a re-run of the same sync is safe.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamFetch { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true, // unreachable endpoint
            },
            _ => false,
        }
    }
}

/// Result type alias for unify operations.
pub type UnifyResult<T> = Result<T, UnifyError>;
