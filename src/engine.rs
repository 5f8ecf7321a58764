//! The unify engine.
//!
//! `UnifyEngine` is the operation surface the external layers (HTTP, UI,
//! schedulers) call into. It composes the stores behind trait objects so
//! backends are swappable, and serializes mutations per tenant: the
//! identifier uniqueness check and the merge's multi-step application are
//! the only places that need exclusion, and a tenant-wide mutation lock
//! covers both without cross-tenant contention.
//!
//! Reads (lookups, statistics, duplicate detection) take no tenant lock.
//! Detection in particular is a long scan that never mutates profile
//! state, so cancelling it mid-flight leaves the stores untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::{CandidateId, CandidateStatus, MergeCandidate};
use crate::dedup::{self, DetectorConfig};
use crate::error::{UnifyError, UnifyResult, ValidationError};
use crate::identifier::{IdentifierId, IdentifierKey, IdentifierSource, ProfileIdentifier};
use crate::merge::{self, MergeStrategy, ResolvedConflicts};
use crate::profile::{Profile, ProfileId};
use crate::record::IncomingRecord;
use crate::resolver::{self, Disposition, ResolutionOutcome};
use crate::stats::{self, CompletionWeights, ProfileStatistics};
use crate::storage::{
    CandidateStore, DependentKind, DependentRecord, IdentifierStore, InMemoryCandidateStore,
    InMemoryIdentifierStore, InMemoryProfileStore, ProfileStore, StorageError,
};
use crate::sync::{RecordFetcher, SyncReport, SyncRequest};
use crate::tenant::TenantId;

const MERGE_CHAIN_HOP_LIMIT: usize = 64;

/// Tunable policy for an engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Duplicate-detection weights and thresholds.
    pub detector: DetectorConfig,
    /// Completion-score weights.
    pub completion: CompletionWeights,
}

/// Outcome of a batch import.
///
/// "Skipped" records matched an existing profile and were merged into it
/// — a normal outcome, not a defect. Per-record failures never abort the
/// batch; they are counted and reported here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Records that created a new profile.
    pub success: usize,
    /// Records that failed validation or storage.
    pub failed: usize,
    /// Records absorbed by an existing profile.
    pub skipped: usize,
    /// One message per failed record.
    pub errors: Vec<String>,
}

/// Input for attaching an identifier through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierDraft {
    /// Origin system.
    pub source: IdentifierSource,
    /// Free-form sub-classification within the source.
    pub source_type: String,
    /// The record id in the external system.
    pub external_id: String,
    /// Opaque secondary reference, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Confidence 0-100; defaults to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_quality: Option<u8>,
    /// Whether this becomes the primary identifier for its source.
    #[serde(default)]
    pub is_primary: bool,
}

/// Profile identity resolution engine.
#[derive(Clone)]
pub struct UnifyEngine {
    profiles: Arc<dyn ProfileStore>,
    identifiers: Arc<dyn IdentifierStore>,
    candidates: Arc<dyn CandidateStore>,
    config: EngineConfig,
    tenant_locks: Arc<Mutex<HashMap<TenantId, Arc<Mutex<()>>>>>,
}

impl UnifyEngine {
    /// Create a new engine over the given stores with default policy.
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        identifiers: Arc<dyn IdentifierStore>,
        candidates: Arc<dyn CandidateStore>,
    ) -> Self {
        Self::with_config(profiles, identifiers, candidates, EngineConfig::default())
    }

    /// Create a new engine with explicit policy.
    #[must_use]
    pub fn with_config(
        profiles: Arc<dyn ProfileStore>,
        identifiers: Arc<dyn IdentifierStore>,
        candidates: Arc<dyn CandidateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            profiles,
            identifiers,
            candidates,
            config,
            tenant_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create an engine backed by fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryIdentifierStore::new()),
            Arc::new(InMemoryCandidateStore::new()),
        )
    }

    /// Get a reference to the profile store.
    pub fn profile_store(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    /// Get a reference to the identifier store.
    pub fn identifier_store(&self) -> &Arc<dyn IdentifierStore> {
        &self.identifiers
    }

    fn tenant_mutex(&self, tenant: TenantId) -> UnifyResult<Arc<Mutex<()>>> {
        let mut registry = self
            .tenant_locks
            .lock()
            .map_err(|_| StorageError::Backend("tenant lock registry poisoned".to_string()))?;
        // Evict mutexes nobody holds so the registry does not grow with
        // every tenant ever touched. Holders clone the Arc before the
        // registry lock is released, so strong_count 1 means unreferenced.
        registry.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        Ok(Arc::clone(registry.entry(tenant).or_default()))
    }

    fn hold_tenant_lock(mutex: &Mutex<()>) -> UnifyResult<MutexGuard<'_, ()>> {
        mutex
            .lock()
            .map_err(|_| StorageError::Backend("tenant mutation lock poisoned".to_string()).into())
    }

    /// Follows merged-into pointers to the live profile. Bounded so a
    /// corrupted chain cannot loop forever.
    fn resolve_forward(&self, tenant: TenantId, id: ProfileId) -> UnifyResult<Profile> {
        let mut current = self
            .profiles
            .get(tenant, id)?
            .ok_or(UnifyError::ProfileNotFound { id })?;
        for _ in 0..MERGE_CHAIN_HOP_LIMIT {
            match current.merged_into() {
                Some(next) if next != current.id => {
                    current = self
                        .profiles
                        .get(tenant, next)?
                        .ok_or(UnifyError::ProfileNotFound { id: next })?;
                }
                _ => return Ok(current),
            }
        }
        Err(StorageError::Backend("merge chain exceeded hop limit".to_string()).into())
    }

    /// Resolves one incoming record to a profile, creating one if no
    /// precedence step hits, and returns the written profile.
    pub fn resolve_and_upsert(
        &self,
        tenant: TenantId,
        source: IdentifierSource,
        source_type: &str,
        record: &IncomingRecord,
    ) -> UnifyResult<Profile> {
        Ok(self.resolve_record(tenant, source, source_type, record)?.profile)
    }

    /// Like [`Self::resolve_and_upsert`] but also reports which
    /// precedence step produced the target.
    pub fn resolve_record(
        &self,
        tenant: TenantId,
        source: IdentifierSource,
        source_type: &str,
        record: &IncomingRecord,
    ) -> UnifyResult<ResolutionOutcome> {
        record.validate()?;
        let external_id = record
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if external_id.is_some() && source_type.trim().is_empty() {
            return Err(ValidationError::EmptySourceType.into());
        }

        let mutex = self.tenant_mutex(tenant)?;
        let _guard = Self::hold_tenant_lock(&mutex)?;

        // Step 1: known external id.
        let mut outcome: Option<(Profile, Disposition)> = None;
        let mut key_holder: Option<ProfileId> = None;
        if let Some(external_id) = external_id {
            let key = IdentifierKey::new(source, source_type.trim(), external_id);
            if let Some(profile_id) = self.identifiers.lookup(tenant, &key)? {
                key_holder = Some(profile_id);
                let profile = self.resolve_forward(tenant, profile_id)?;
                outcome = Some((profile, Disposition::MatchedByIdentifier));
            }
        }

        // Step 2: email.
        if outcome.is_none() {
            if let Some(email) = record.email.as_deref().filter(|e| resolver::looks_like_email(e)) {
                if let Some(profile) = self.profiles.find_by_email(tenant, email)? {
                    outcome = Some((profile, Disposition::MatchedByEmail));
                }
            }
        }

        // Step 3: phone.
        if outcome.is_none() {
            if let Some(phone) = record.phone.as_deref() {
                let normalized = resolver::normalize_phone(phone);
                if !normalized.is_empty() {
                    if let Some(profile) = self.profiles.find_by_phone(tenant, &normalized)? {
                        outcome = Some((profile, Disposition::MatchedByPhone));
                    }
                }
            }
        }

        let (mut profile, disposition) = match outcome {
            Some((mut profile, disposition)) => {
                resolver::apply_record(&mut profile, record, source);
                self.profiles.update(profile.clone())?;
                (profile, disposition)
            }
            None => {
                let profile = resolver::new_profile_from(tenant, source, record);
                self.profiles.insert(profile.clone())?;
                (profile, Disposition::Created)
            }
        };

        // Attach (or refresh) the identifier, unless the key is still held
        // by an earlier link in a merge chain; re-linking a stale key is an
        // operator decision, not something ingestion does silently.
        let key_is_free_or_ours = key_holder.map_or(true, |holder| holder == profile.id);
        if let (Some(external_id), true) = (external_id, key_is_free_or_ours) {
            let attached = self.attach_locked(
                tenant,
                profile.id,
                &IdentifierDraft {
                    source,
                    source_type: source_type.trim().to_string(),
                    external_id: external_id.to_string(),
                    external_ref: record.external_ref.clone(),
                    match_quality: record.match_quality,
                    is_primary: false,
                },
            )?;
            debug!(
                profile = %profile.id,
                identifier = %attached.id,
                key = %attached.key(),
                "identifier attached during resolution"
            );
            profile = self
                .profiles
                .get(tenant, profile.id)?
                .ok_or(UnifyError::ProfileNotFound { id: profile.id })?;
        }

        debug!(tenant = %tenant, profile = %profile.id, disposition = %disposition, "record resolved");
        Ok(ResolutionOutcome { profile, disposition })
    }

    /// Imports a batch of records from one source.
    ///
    /// Records are processed independently; the batch is not a
    /// transaction. A failed record is counted and reported, and the
    /// rest of the batch continues.
    pub fn import_batch(
        &self,
        tenant: TenantId,
        source: IdentifierSource,
        source_type: &str,
        records: &[IncomingRecord],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, record) in records.iter().enumerate() {
            match self.resolve_record(tenant, source, source_type, record) {
                Ok(outcome) if outcome.disposition.matched_existing() => report.skipped += 1,
                Ok(_) => report.success += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(format!("record {index}: {err}"));
                }
            }
        }
        info!(
            tenant = %tenant,
            source = %source,
            success = report.success,
            skipped = report.skipped,
            failed = report.failed,
            "batch import finished"
        );
        report
    }

    /// Pulls records from a remote endpoint and imports them.
    ///
    /// The fetch is all-or-nothing: an unreachable or failing endpoint
    /// surfaces as [`UnifyError::UpstreamFetch`] and nothing is imported
    /// in that call. The call as a whole is not atomic across retries —
    /// records committed by an earlier attempt stay, and re-running is
    /// safe because resolution is idempotent.
    pub fn sync_from_api(
        &self,
        tenant: TenantId,
        source: IdentifierSource,
        source_type: &str,
        fetcher: &dyn RecordFetcher,
        request: &SyncRequest,
    ) -> UnifyResult<SyncReport> {
        let records = fetcher
            .fetch(&request.api_url, &request.api_key)
            .map_err(|err| UnifyError::UpstreamFetch {
                status: err.status(),
                message: err.to_string(),
            })?;
        let total_fetched = records.len();
        let batch = self.import_batch(tenant, source, source_type, &records);
        Ok(SyncReport {
            batch,
            total_fetched,
            synced_at: chrono::Utc::now(),
        })
    }

    /// Scans the tenant for duplicate profiles and persists new pending
    /// candidates.
    ///
    /// Returns the candidates produced by this scan; pairs that already
    /// have a pending candidate are not proposed again (see
    /// [`Self::pending_candidates`] for the full queue). Detection reads
    /// a snapshot and writes only candidates, so a cancelled or crashed
    /// scan leaves profile and identifier state untouched.
    pub fn detect_duplicates(&self, tenant: TenantId) -> UnifyResult<Vec<MergeCandidate>> {
        let profiles = self.profiles.list_active(tenant)?;
        let mut identifiers = HashMap::new();
        for profile in &profiles {
            identifiers.insert(profile.id, self.identifiers.identifiers_of(tenant, profile.id)?);
        }

        let detected = dedup::detect(&profiles, &identifiers, &self.config.detector);
        let pending = self.candidates.list_pending(tenant)?;

        let mut stored = Vec::new();
        for candidate in detected {
            let already_proposed = pending
                .iter()
                .any(|p| p.covers_pair(candidate.profile1_id, candidate.profile2_id));
            if already_proposed {
                continue;
            }
            self.candidates.insert(candidate.clone())?;
            stored.push(candidate);
        }
        info!(tenant = %tenant, proposed = stored.len(), "duplicate detection finished");
        Ok(stored)
    }

    /// All pending merge candidates for the tenant.
    pub fn pending_candidates(&self, tenant: TenantId) -> UnifyResult<Vec<MergeCandidate>> {
        Ok(self.candidates.list_pending(tenant)?)
    }

    /// Applies an approved merge candidate and returns the survivor.
    ///
    /// The survivor's fields are computed and fully validated before the
    /// first mutation, and the re-pointing of identifiers and dependent
    /// records plus the loser's retirement run under the tenant's
    /// exclusive mutation lock, so no other operation can observe a
    /// half-merged pair.
    pub fn merge(
        &self,
        tenant: TenantId,
        candidate_id: CandidateId,
        strategy: MergeStrategy,
        resolved: Option<&ResolvedConflicts>,
    ) -> UnifyResult<Profile> {
        let mutex = self.tenant_mutex(tenant)?;
        let _guard = Self::hold_tenant_lock(&mutex)?;

        let mut candidate = self
            .candidates
            .get(tenant, candidate_id)?
            .ok_or(UnifyError::CandidateNotFound { id: candidate_id })?;
        if candidate.status != CandidateStatus::Pending {
            return Err(UnifyError::StaleCandidate {
                id: candidate_id,
                reason: format!("already {}", candidate.status),
            });
        }

        let load_live = |id: ProfileId, side: &str| -> UnifyResult<Profile> {
            let profile = self
                .profiles
                .get(tenant, id)?
                .ok_or_else(|| UnifyError::StaleCandidate {
                    id: candidate_id,
                    reason: format!("{side} no longer exists"),
                })?;
            if profile.tenant_id != tenant {
                return Err(UnifyError::StaleCandidate {
                    id: candidate_id,
                    reason: format!("{side} belongs to another tenant"),
                });
            }
            if !profile.is_active() {
                return Err(UnifyError::StaleCandidate {
                    id: candidate_id,
                    reason: format!("{side} is {}", profile.status),
                });
            }
            Ok(profile)
        };
        let p1 = load_live(candidate.profile1_id, "profile 1")?;
        let p2 = load_live(candidate.profile2_id, "profile 2")?;

        // Everything that can fail has now run; the mutations below are
        // plain writes applied under the tenant lock.
        let survivor = merge::compute_survivor(&candidate, &p1, &p2, strategy, resolved)?;

        self.identifiers.repoint(tenant, p2.id, survivor.id)?;
        self.profiles.repoint_dependents(tenant, p2.id, survivor.id)?;
        self.profiles.update(survivor.clone())?;

        let mut loser = p2;
        loser.retire_into(survivor.id);
        self.profiles.update(loser)?;

        candidate.status = CandidateStatus::Accepted;
        self.candidates.update(candidate)?;

        info!(
            tenant = %tenant,
            survivor = %survivor.id,
            candidate = %candidate_id,
            strategy = %strategy,
            "profiles merged"
        );
        Ok(survivor)
    }

    /// Discards a pending candidate without merging.
    pub fn reject_candidate(&self, tenant: TenantId, candidate_id: CandidateId) -> UnifyResult<()> {
        let mutex = self.tenant_mutex(tenant)?;
        let _guard = Self::hold_tenant_lock(&mutex)?;

        let mut candidate = self
            .candidates
            .get(tenant, candidate_id)?
            .ok_or(UnifyError::CandidateNotFound { id: candidate_id })?;
        if candidate.status != CandidateStatus::Pending {
            return Err(UnifyError::StaleCandidate {
                id: candidate_id,
                reason: format!("already {}", candidate.status),
            });
        }
        candidate.status = CandidateStatus::Rejected;
        self.candidates.update(candidate)?;
        Ok(())
    }

    fn attach_locked(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        draft: &IdentifierDraft,
    ) -> UnifyResult<ProfileIdentifier> {
        if draft.source_type.trim().is_empty() {
            return Err(ValidationError::EmptySourceType.into());
        }
        if draft.external_id.trim().is_empty() {
            return Err(ValidationError::EmptyExternalId.into());
        }
        if let Some(q) = draft.match_quality {
            if q > 100 {
                return Err(ValidationError::MatchQualityOutOfRange { value: q }.into());
            }
        }

        let mut identifier = ProfileIdentifier::new(
            tenant,
            profile_id,
            draft.source,
            draft.source_type.trim(),
            draft.external_id.trim(),
        )
        .with_match_quality(draft.match_quality.unwrap_or(100));
        if let Some(external_ref) = &draft.external_ref {
            identifier = identifier.with_external_ref(external_ref.clone());
        }

        // First identifier from a source becomes its primary; explicit
        // requests override.
        let has_primary = self
            .identifiers
            .identifiers_of(tenant, profile_id)?
            .iter()
            .any(|i| i.is_active && i.is_primary && i.source == draft.source);
        if draft.is_primary || !has_primary {
            identifier = identifier.primary();
        }

        Ok(self.identifiers.attach(identifier)?)
    }

    /// Attaches an identifier to a profile.
    ///
    /// Fails with [`UnifyError::IdentifierConflict`] when the key is held
    /// by a different live profile; re-attaching the same key to the same
    /// profile refreshes its metadata instead.
    pub fn attach_identifier(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        draft: &IdentifierDraft,
    ) -> UnifyResult<ProfileIdentifier> {
        let mutex = self.tenant_mutex(tenant)?;
        let _guard = Self::hold_tenant_lock(&mutex)?;

        self.profiles
            .get(tenant, profile_id)?
            .ok_or(UnifyError::ProfileNotFound { id: profile_id })?;
        self.attach_locked(tenant, profile_id, draft)
    }

    /// Soft-disables an identifier, keeping it for audit.
    pub fn detach_identifier(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        identifier_id: IdentifierId,
    ) -> UnifyResult<ProfileIdentifier> {
        let mutex = self.tenant_mutex(tenant)?;
        let _guard = Self::hold_tenant_lock(&mutex)?;
        Ok(self.identifiers.detach(tenant, profile_id, identifier_id)?)
    }

    /// All identifiers of a profile, active and inactive.
    pub fn identifiers_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> UnifyResult<Vec<ProfileIdentifier>> {
        Ok(self.identifiers.identifiers_of(tenant, profile_id)?)
    }

    /// Fetches a profile by id. Merged profiles remain resolvable.
    pub fn profile(&self, tenant: TenantId, id: ProfileId) -> UnifyResult<Profile> {
        self.profiles
            .get(tenant, id)?
            .ok_or(UnifyError::ProfileNotFound { id })
    }

    /// Adds a dependent record (event, deal, ...) under a profile.
    pub fn add_dependent(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
        kind: DependentKind,
        payload: serde_json::Value,
    ) -> UnifyResult<DependentRecord> {
        let record = DependentRecord::new(tenant, profile_id, kind, payload);
        self.profiles.add_dependent(record.clone())?;
        Ok(record)
    }

    /// All dependent records of a profile.
    pub fn dependents_of(
        &self,
        tenant: TenantId,
        profile_id: ProfileId,
    ) -> UnifyResult<Vec<DependentRecord>> {
        Ok(self.profiles.dependents_of(tenant, profile_id)?)
    }

    /// Completion score (0-100) for a profile.
    pub fn completion_score(&self, tenant: TenantId, profile_id: ProfileId) -> UnifyResult<u8> {
        let profile = self
            .profiles
            .get(tenant, profile_id)?
            .ok_or(UnifyError::ProfileNotFound { id: profile_id })?;
        let active_identifiers = self
            .identifiers
            .identifiers_of(tenant, profile_id)?
            .iter()
            .filter(|i| i.is_active)
            .count();
        Ok(stats::completion_score(
            &profile,
            active_identifiers,
            &self.config.completion,
        ))
    }

    /// Plain counts over the tenant's profiles.
    pub fn statistics(&self, tenant: TenantId) -> UnifyResult<ProfileStatistics> {
        let profiles = self.profiles.list_all(tenant)?;
        Ok(stats::statistics(&profiles))
    }
}
