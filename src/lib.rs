//! # Unify - One Row of Truth
//!
//! Unify is a multi-tenant profile identity resolution core. It takes
//! records arriving from many external systems (ERP, LINE, Facebook, CRM,
//! manual entry) and resolves each one to a single canonical profile, so
//! every downstream consumer sees one row of truth per real-world person
//! or company.
//!
//! ## Core Concepts
//!
//! - **Profile**: The canonical person or company record within a tenant
//! - **Identifier**: A `(source, source_type, external_id)` key linking a
//!   profile to its row in an external system
//! - **Resolution**: The identifier > email > phone > create precedence
//!   chain that maps an incoming record to a profile
//! - **Merge**: Collapsing two duplicate profiles into one survivor while
//!   re-pointing identifiers and dependent records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unify::{IdentifierSource, IncomingRecord, TenantId, UnifyEngine};
//!
//! let engine = UnifyEngine::in_memory();
//! let tenant = TenantId::new();
//!
//! // Ingest an ERP customer row; re-ingesting the same row is idempotent.
//! let record = IncomingRecord {
//!     external_id: Some("C100".to_string()),
//!     email: Some("ann@example.com".to_string()),
//!     first_name: Some("Ann".to_string()),
//!     ..Default::default()
//! };
//! let profile = engine.resolve_and_upsert(tenant, IdentifierSource::Erp, "customer", &record)?;
//!
//! // Scan for duplicates and merge an approved candidate.
//! let candidates = engine.detect_duplicates(tenant)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod candidate;
pub mod error;
pub mod identifier;
pub mod profile;
pub mod record;
pub mod tenant;

// Resolution, detection, and merge logic
pub mod dedup;
pub mod merge;
pub mod resolver;
pub mod stats;
pub mod sync;

// Storage and the operation surface
pub mod engine;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use candidate::{CandidateId, CandidateStatus, ConflictField, MatchReason, MergeCandidate};
pub use error::{UnifyError, UnifyResult, ValidationError};
pub use identifier::{IdentifierId, IdentifierKey, IdentifierSource, ProfileIdentifier};
pub use profile::{
    Address, CompanyInfo, ContactPoint, Profile, ProfileId, ProfileStatus, ProfileType,
};
pub use record::IncomingRecord;
pub use tenant::TenantId;

pub use dedup::{DetectorConfig, ScoreWeights};
pub use merge::{MergeStrategy, ResolvedConflicts};
pub use resolver::{Disposition, ResolutionOutcome};
pub use stats::{CompletionWeights, ProfileStatistics};
pub use sync::{FetchError, RecordFetcher, SyncReport, SyncRequest};

pub use engine::{BatchReport, EngineConfig, IdentifierDraft, UnifyEngine};
pub use storage::{
    CandidateStore, DependentKind, DependentRecord, IdentifierStore, InMemoryCandidateStore,
    InMemoryIdentifierStore, InMemoryProfileStore, ProfileStore, StorageError,
};
