//! In-memory storage backend.
//!
//! Thread-safe reference implementation of the storage traits, intended
//! for embedded usage and tests. State is partitioned by tenant before
//! any index is consulted, so a lookup can never leak across tenants.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use crate::candidate::{CandidateId, CandidateStatus, MergeCandidate};
use crate::identifier::{IdentifierId, IdentifierKey, ProfileIdentifier};
use crate::profile::{Profile, ProfileId};
use crate::storage::traits::{
    CandidateStore, DependentRecord, IdentifierStore, ProfileStore, StorageError,
};
use crate::tenant::TenantId;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Debug, Default)]
struct TenantProfiles {
    by_id: HashMap<ProfileId, Profile>,
    // Normalized email/phone → active profile ids. A key can map to more
    // than one profile while duplicates await merging.
    by_email: HashMap<String, BTreeSet<ProfileId>>,
    by_phone: HashMap<String, BTreeSet<ProfileId>>,
    dependents: HashMap<ProfileId, Vec<DependentRecord>>,
}

impl TenantProfiles {
    fn index(&mut self, profile: &Profile) {
        if !profile.is_active() {
            return;
        }
        if let Some(email) = profile.email.as_deref() {
            self.by_email
                .entry(normalize_key(email))
                .or_default()
                .insert(profile.id);
        }
        if let Some(phone) = profile.phone.as_deref() {
            self.by_phone
                .entry(normalize_key(phone))
                .or_default()
                .insert(profile.id);
        }
    }

    fn unindex(&mut self, profile: &Profile) {
        if let Some(email) = profile.email.as_deref() {
            let key = normalize_key(email);
            if let Some(set) = self.by_email.get_mut(&key) {
                set.remove(&profile.id);
                if set.is_empty() {
                    self.by_email.remove(&key);
                }
            }
        }
        if let Some(phone) = profile.phone.as_deref() {
            let key = normalize_key(phone);
            if let Some(set) = self.by_phone.get_mut(&key) {
                set.remove(&profile.id);
                if set.is_empty() {
                    self.by_phone.remove(&key);
                }
            }
        }
    }

    // When duplicates share a key, resolve to the oldest active profile
    // so repeated lookups are deterministic.
    fn pick_active(&self, ids: Option<&BTreeSet<ProfileId>>) -> Option<Profile> {
        let ids = ids?;
        ids.iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|p| p.is_active())
            .min_by_key(|p| (p.created_at, p.id))
            .cloned()
    }
}

/// Thread-safe in-memory profile store.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    state: RwLock<HashMap<TenantId, TenantProfiles>>,
}

impl InMemoryProfileStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn insert(&self, profile: Profile) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("profile.insert"))?;
        let tenant = state.entry(profile.tenant_id).or_default();
        if tenant.by_id.contains_key(&profile.id) {
            return Err(StorageError::DuplicateKey(profile.id.to_string()));
        }
        tenant.index(&profile);
        tenant.by_id.insert(profile.id, profile);
        Ok(())
    }

    fn get(&self, tenant: TenantId, id: ProfileId) -> Result<Option<Profile>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.get"))?;
        Ok(state.get(&tenant).and_then(|t| t.by_id.get(&id)).cloned())
    }

    fn update(&self, profile: Profile) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("profile.update"))?;
        let tenant = state.entry(profile.tenant_id).or_default();
        let prev = tenant
            .by_id
            .get(&profile.id)
            .cloned()
            .ok_or(StorageError::ProfileNotFound(profile.id))?;

        tenant.unindex(&prev);
        tenant.index(&profile);
        tenant.by_id.insert(profile.id, profile);
        Ok(())
    }

    fn find_by_email(
        &self,
        tenant: TenantId,
        email: &str,
    ) -> Result<Option<Profile>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.find_by_email"))?;
        let Some(t) = state.get(&tenant) else {
            return Ok(None);
        };
        Ok(t.pick_active(t.by_email.get(&normalize_key(email))))
    }

    fn find_by_phone(
        &self,
        tenant: TenantId,
        phone: &str,
    ) -> Result<Option<Profile>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.find_by_phone"))?;
        let Some(t) = state.get(&tenant) else {
            return Ok(None);
        };
        Ok(t.pick_active(t.by_phone.get(&normalize_key(phone))))
    }

    fn list_active(&self, tenant: TenantId) -> Result<Vec<Profile>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.list_active"))?;
        Ok(state
            .get(&tenant)
            .map(|t| t.by_id.values().filter(|p| p.is_active()).cloned().collect())
            .unwrap_or_default())
    }

    fn list_all(&self, tenant: TenantId) -> Result<Vec<Profile>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.list_all"))?;
        Ok(state
            .get(&tenant)
            .map(|t| t.by_id.values().cloned().collect())
            .unwrap_or_default())
    }

    fn add_dependent(&self, record: DependentRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("profile.add_dependent"))?;
        let tenant = state.entry(record.tenant_id).or_default();
        if !tenant.by_id.contains_key(&record.profile_id) {
            return Err(StorageError::ProfileNotFound(record.profile_id));
        }
        tenant.dependents.entry(record.profile_id).or_default().push(record);
        Ok(())
    }

    fn dependents_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> Result<Vec<DependentRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("profile.dependents_of"))?;
        Ok(state
            .get(&tenant)
            .and_then(|t| t.dependents.get(&profile_id))
            .cloned()
            .unwrap_or_default())
    }

    fn repoint_dependents(
        &self,
        tenant: TenantId,
        from: ProfileId,
        to: ProfileId,
    ) -> Result<usize, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("profile.repoint_dependents"))?;
        let tenant = state.entry(tenant).or_default();
        if !tenant.by_id.contains_key(&to) {
            return Err(StorageError::ProfileNotFound(to));
        }
        let Some(mut moved) = tenant.dependents.remove(&from) else {
            return Ok(0);
        };
        let count = moved.len();
        for record in &mut moved {
            record.profile_id = to;
        }
        tenant.dependents.entry(to).or_default().extend(moved);
        Ok(count)
    }
}

#[derive(Debug, Default)]
struct TenantIdentifiers {
    by_id: HashMap<IdentifierId, ProfileIdentifier>,
    // Uniqueness index: only ACTIVE identifiers occupy a key slot.
    active_by_key: HashMap<IdentifierKey, IdentifierId>,
    by_profile: HashMap<ProfileId, HashSet<IdentifierId>>,
}

impl TenantIdentifiers {
    fn clear_other_primaries(&mut self, identifier: &ProfileIdentifier) {
        let Some(ids) = self.by_profile.get(&identifier.profile_id) else {
            return;
        };
        let siblings: Vec<IdentifierId> = ids.iter().copied().collect();
        for sibling_id in siblings {
            if sibling_id == identifier.id {
                continue;
            }
            if let Some(sibling) = self.by_id.get_mut(&sibling_id) {
                if sibling.is_active && sibling.is_primary && sibling.source == identifier.source {
                    sibling.is_primary = false;
                    sibling.updated_at = chrono::Utc::now();
                }
            }
        }
    }

    fn has_active_primary(&self, profile: ProfileId, source: crate::identifier::IdentifierSource) -> bool {
        self.by_profile
            .get(&profile)
            .map(|ids| {
                ids.iter().any(|id| {
                    self.by_id
                        .get(id)
                        .is_some_and(|i| i.is_active && i.is_primary && i.source == source)
                })
            })
            .unwrap_or(false)
    }
}

/// Thread-safe in-memory identifier store.
///
/// The uniqueness check and insert on `attach` happen under one write
/// lock, so concurrent attaches of the same key cannot both win.
#[derive(Debug, Default)]
pub struct InMemoryIdentifierStore {
    state: RwLock<HashMap<TenantId, TenantIdentifiers>>,
}

impl InMemoryIdentifierStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentifierStore for InMemoryIdentifierStore {
    fn lookup(
        &self,
        tenant: TenantId,
        key: &IdentifierKey,
    ) -> Result<Option<ProfileId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier.lookup"))?;
        let Some(t) = state.get(&tenant) else {
            return Ok(None);
        };
        Ok(t.active_by_key
            .get(key)
            .and_then(|id| t.by_id.get(id))
            .map(|i| i.profile_id))
    }

    fn attach(&self, identifier: ProfileIdentifier) -> Result<ProfileIdentifier, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier.attach"))?;
        let t = state.entry(identifier.tenant_id).or_default();
        let key = identifier.key();

        // Conditional write: at most one active holder per key.
        if let Some(&holder_id) = t.active_by_key.get(&key) {
            let held_by = t
                .by_id
                .get(&holder_id)
                .map(|i| i.profile_id)
                .ok_or_else(|| StorageError::Backend("identifier key index out of sync".to_string()))?;
            if held_by != identifier.profile_id {
                return Err(StorageError::IdentifierConflict {
                    key: key.to_string(),
                    held_by,
                });
            }
            // Same profile: idempotent refresh of metadata.
            if identifier.is_primary {
                let probe = ProfileIdentifier {
                    id: holder_id,
                    ..identifier.clone()
                };
                t.clear_other_primaries(&probe);
            }
            let stored = t
                .by_id
                .get_mut(&holder_id)
                .ok_or_else(|| StorageError::Backend("identifier key index out of sync".to_string()))?;
            stored.match_quality = identifier.match_quality;
            if identifier.external_ref.is_some() {
                stored.external_ref = identifier.external_ref;
            }
            stored.is_primary = stored.is_primary || identifier.is_primary;
            stored.updated_at = chrono::Utc::now();
            return Ok(stored.clone());
        }

        // An inactive identifier for the same (profile, key) is revived
        // instead of duplicated, keeping the audit trail to one row.
        let revived = t
            .by_profile
            .get(&identifier.profile_id)
            .into_iter()
            .flatten()
            .copied()
            .find(|id| t.by_id.get(id).is_some_and(|i| !i.is_active && i.key() == key));
        if let Some(existing_id) = revived {
            if identifier.is_primary {
                t.clear_other_primaries(&identifier);
            }
            let stored = t
                .by_id
                .get_mut(&existing_id)
                .ok_or_else(|| StorageError::Backend("identifier profile index out of sync".to_string()))?;
            stored.is_active = true;
            stored.match_quality = identifier.match_quality;
            if identifier.external_ref.is_some() {
                stored.external_ref = identifier.external_ref;
            }
            stored.is_primary = identifier.is_primary;
            stored.updated_at = chrono::Utc::now();
            let result = stored.clone();
            t.active_by_key.insert(key, existing_id);
            return Ok(result);
        }

        if identifier.is_primary {
            t.clear_other_primaries(&identifier);
        }
        t.active_by_key.insert(key, identifier.id);
        t.by_profile
            .entry(identifier.profile_id)
            .or_default()
            .insert(identifier.id);
        t.by_id.insert(identifier.id, identifier.clone());
        Ok(identifier)
    }

    fn detach(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        identifier_id: IdentifierId,
    ) -> Result<ProfileIdentifier, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier.detach"))?;
        let t = state
            .get_mut(&tenant)
            .ok_or(StorageError::IdentifierNotFound(identifier_id))?;
        let stored = t
            .by_id
            .get_mut(&identifier_id)
            .filter(|i| i.profile_id == profile_id)
            .ok_or(StorageError::IdentifierNotFound(identifier_id))?;

        stored.is_active = false;
        stored.is_primary = false;
        stored.updated_at = chrono::Utc::now();
        let detached = stored.clone();
        let key = detached.key();
        if t.active_by_key.get(&key) == Some(&identifier_id) {
            t.active_by_key.remove(&key);
        }
        Ok(detached)
    }

    fn identifiers_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> Result<Vec<ProfileIdentifier>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("identifier.identifiers_of"))?;
        let Some(t) = state.get(&tenant) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<ProfileIdentifier> = t
            .by_profile
            .get(&profile_id)
            .into_iter()
            .flatten()
            .filter_map(|id| t.by_id.get(id))
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }

    fn repoint(
        &self,
        tenant: TenantId,
        from: ProfileId,
        to: ProfileId,
    ) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("identifier.repoint"))?;
        let Some(t) = state.get_mut(&tenant) else {
            return Ok(0);
        };
        let Some(moved_ids) = t.by_profile.remove(&from) else {
            return Ok(0);
        };
        let count = moved_ids.len();
        for id in &moved_ids {
            // Survivor keeps its own primary per source; moved primaries
            // are demoted when that would break the invariant.
            let demote = {
                let Some(identifier) = t.by_id.get(id) else { continue };
                identifier.is_active
                    && identifier.is_primary
                    && t.has_active_primary(to, identifier.source)
            };
            if let Some(identifier) = t.by_id.get_mut(id) {
                identifier.profile_id = to;
                if demote {
                    identifier.is_primary = false;
                }
                identifier.updated_at = chrono::Utc::now();
            }
        }
        t.by_profile.entry(to).or_default().extend(moved_ids);
        Ok(count)
    }
}

/// Thread-safe in-memory merge-candidate store.
#[derive(Debug, Default)]
pub struct InMemoryCandidateStore {
    state: RwLock<HashMap<TenantId, HashMap<CandidateId, MergeCandidate>>>,
}

impl InMemoryCandidateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateStore for InMemoryCandidateStore {
    fn insert(&self, candidate: MergeCandidate) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("candidate.insert"))?;
        let t = state.entry(candidate.tenant_id).or_default();
        if t.contains_key(&candidate.id) {
            return Err(StorageError::DuplicateKey(candidate.id.to_string()));
        }
        t.insert(candidate.id, candidate);
        Ok(())
    }

    fn get(
        &self,
        tenant: TenantId,
        id: CandidateId,
    ) -> Result<Option<MergeCandidate>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("candidate.get"))?;
        Ok(state.get(&tenant).and_then(|t| t.get(&id)).cloned())
    }

    fn update(&self, candidate: MergeCandidate) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("candidate.update"))?;
        let t = state.entry(candidate.tenant_id).or_default();
        if !t.contains_key(&candidate.id) {
            return Err(StorageError::CandidateNotFound(candidate.id));
        }
        t.insert(candidate.id, candidate);
        Ok(())
    }

    fn list_pending(&self, tenant: TenantId) -> Result<Vec<MergeCandidate>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("candidate.list_pending"))?;
        let mut out: Vec<MergeCandidate> = state
            .get(&tenant)
            .map(|t| {
                t.values()
                    .filter(|c| c.status == CandidateStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|c| c.detected_at);
        Ok(out)
    }
}
