//! Abstract storage traits.
//!
//! These traits define the contract that storage backends must implement.
//! Backends must be safe for concurrent use; every individual operation
//! is atomic from the caller's point of view. Multi-step protocols
//! (ingestion, merge) are serialized above the stores by the engine.
//!
//! Every operation is tenant-scoped. Implementations must key their
//! indexes by tenant so cross-tenant reads are impossible, not merely
//! filtered out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::candidate::{CandidateId, MergeCandidate};
use crate::identifier::{IdentifierId, IdentifierKey, ProfileIdentifier};
use crate::profile::{Profile, ProfileId};
use crate::tenant::TenantId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Profile not found.
    #[error("Profile not found: {0}")]
    ProfileNotFound(ProfileId),

    /// Identifier not found.
    #[error("Identifier not found: {0}")]
    IdentifierNotFound(IdentifierId),

    /// Merge candidate not found.
    #[error("Merge candidate not found: {0}")]
    CandidateNotFound(CandidateId),

    /// An active identifier with this key already denotes another profile.
    #[error("Identifier {key} is already attached to profile {held_by}")]
    IdentifierConflict {
        /// Display form of the conflicting key.
        key: String,
        /// The profile currently holding the key.
        held_by: ProfileId,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// What kind of dependent record hangs off a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentKind {
    /// Behavioral event (page view, message, visit).
    Event,
    /// Sales deal.
    Deal,
    /// Logged activity or note.
    Activity,
    /// Quotation document.
    Quotation,
    /// Billing document.
    Billing,
    /// Tag-to-profile relation row.
    TagRelation,
}

/// A record owned by a profile that must follow it through merges.
///
/// The payload is opaque to the resolution core; only the owning
/// reference matters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentRecord {
    /// Unique id of the dependent row.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The profile this record belongs to.
    pub profile_id: ProfileId,
    /// Record kind.
    pub kind: DependentKind,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl DependentRecord {
    /// Creates a dependent record owned by the given profile.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        profile_id: ProfileId,
        kind: DependentKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            profile_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Storage trait for canonical profiles and their dependent records.
pub trait ProfileStore: Send + Sync {
    /// Insert a new profile. Returns error if the ID already exists.
    fn insert(&self, profile: Profile) -> Result<(), StorageError>;

    /// Get a profile by ID. Merged profiles remain resolvable.
    fn get(&self, tenant: TenantId, id: ProfileId) -> Result<Option<Profile>, StorageError>;

    /// Update an existing profile. Returns error if not found.
    fn update(&self, profile: Profile) -> Result<(), StorageError>;

    /// Find an ACTIVE profile by email (case-insensitive exact match).
    fn find_by_email(&self, tenant: TenantId, email: &str)
        -> Result<Option<Profile>, StorageError>;

    /// Find an ACTIVE profile by phone (exact match on the normalized
    /// value the resolver indexed).
    fn find_by_phone(&self, tenant: TenantId, phone: &str)
        -> Result<Option<Profile>, StorageError>;

    /// All ACTIVE profiles in the tenant.
    fn list_active(&self, tenant: TenantId) -> Result<Vec<Profile>, StorageError>;

    /// All profiles in the tenant regardless of status.
    fn list_all(&self, tenant: TenantId) -> Result<Vec<Profile>, StorageError>;

    /// Add a dependent record under its profile.
    fn add_dependent(&self, record: DependentRecord) -> Result<(), StorageError>;

    /// All dependent records of a profile.
    fn dependents_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> Result<Vec<DependentRecord>, StorageError>;

    /// Re-point every dependent record from one profile to another.
    /// Returns the number of records moved. Atomic.
    fn repoint_dependents(
        &self,
        tenant: TenantId,
        from: ProfileId,
        to: ProfileId,
    ) -> Result<usize, StorageError>;
}

/// Storage trait for the external-identifier graph.
pub trait IdentifierStore: Send + Sync {
    /// Resolve an identifier key to its profile, if an active identifier
    /// holds it. O(1). Case-sensitive; callers apply no normalization.
    fn lookup(&self, tenant: TenantId, key: &IdentifierKey)
        -> Result<Option<ProfileId>, StorageError>;

    /// Attach an identifier to its profile.
    ///
    /// Conditional write: fails with [`StorageError::IdentifierConflict`]
    /// if an active identifier with the same key maps to a different
    /// profile. Re-attaching the same key to the same profile is
    /// idempotent and refreshes match quality, external ref, and the
    /// active flag. If the identifier is primary, other primaries from
    /// the same source on that profile are cleared in the same write.
    fn attach(&self, identifier: ProfileIdentifier)
        -> Result<ProfileIdentifier, StorageError>;

    /// Soft-disable an identifier. Never physically removes (audit).
    /// Fails if the identifier does not belong to the profile/tenant.
    fn detach(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        identifier_id: IdentifierId,
    ) -> Result<ProfileIdentifier, StorageError>;

    /// All identifiers of a profile, active and inactive.
    fn identifiers_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> Result<Vec<ProfileIdentifier>, StorageError>;

    /// Move every identifier from one profile to another (merge support).
    /// Demotes moved primaries when the survivor already has a primary
    /// for that source. Returns the number moved. Atomic.
    fn repoint(
        &self,
        tenant: TenantId,
        from: ProfileId,
        to: ProfileId,
    ) -> Result<usize, StorageError>;
}

/// Storage trait for merge candidates.
pub trait CandidateStore: Send + Sync {
    /// Insert a new candidate.
    fn insert(&self, candidate: MergeCandidate) -> Result<(), StorageError>;

    /// Get a candidate by ID.
    fn get(&self, tenant: TenantId, id: CandidateId)
        -> Result<Option<MergeCandidate>, StorageError>;

    /// Update a candidate (terminal status transition only).
    fn update(&self, candidate: MergeCandidate) -> Result<(), StorageError>;

    /// All pending candidates in the tenant.
    fn list_pending(&self, tenant: TenantId) -> Result<Vec<MergeCandidate>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_profile_store_object_safe(_: &dyn ProfileStore) {}
    fn _assert_identifier_store_object_safe(_: &dyn IdentifierStore) {}
    fn _assert_candidate_store_object_safe(_: &dyn CandidateStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ProfileNotFound(ProfileId::new());
        assert!(err.to_string().contains("Profile not found"));

        let err = StorageError::IdentifierConflict {
            key: "erp/customer/C100".to_string(),
            held_by: ProfileId::new(),
        };
        assert!(err.to_string().contains("erp/customer/C100"));

        let err = StorageError::Backend("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_dependent_record_construction() {
        let record = DependentRecord::new(
            TenantId::new(),
            ProfileId::new(),
            DependentKind::Deal,
            serde_json::json!({"amount": 1200}),
        );
        assert_eq!(record.kind, DependentKind::Deal);
        assert!(!record.id.is_nil());
    }
}
