//! External identifiers and their provenance.
//!
//! A `ProfileIdentifier` is a claim that a record in some external system
//! (ERP row, LINE user, CRM contact) denotes a given profile. Identifiers
//! are the strongest resolution signal and the audit trail for where a
//! profile's facts came from, so they are soft-disabled rather than
//! deleted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::ProfileId;
use crate::tenant::TenantId;

/// Unique identifier for a [`ProfileIdentifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierId(Uuid);

impl IdentifierId {
    /// Creates a new random identifier ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for IdentifierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin system of an identifier or profile fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierSource {
    /// Enterprise resource planning system.
    Erp,
    /// LINE messaging platform.
    Line,
    /// Facebook page or messenger.
    Facebook,
    /// CRM forms and pipelines.
    Crm,
    /// Manual entry by an operator.
    Manual,
    /// Website tracking or forms.
    Website,
    /// Generic API sync.
    Api,
}

impl IdentifierSource {
    /// All known sources, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Erp,
        Self::Line,
        Self::Facebook,
        Self::Crm,
        Self::Manual,
        Self::Website,
        Self::Api,
    ];

    /// Parses a source from its canonical lowercase name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "erp" => Some(Self::Erp),
            "line" => Some(Self::Line),
            "facebook" => Some(Self::Facebook),
            "crm" => Some(Self::Crm),
            "manual" => Some(Self::Manual),
            "website" => Some(Self::Website),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

impl std::str::FromStr for IdentifierSource {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::error::ValidationError::UnknownSource {
            value: s.to_string(),
        })
    }
}

impl fmt::Display for IdentifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erp => write!(f, "erp"),
            Self::Line => write!(f, "line"),
            Self::Facebook => write!(f, "facebook"),
            Self::Crm => write!(f, "crm"),
            Self::Manual => write!(f, "manual"),
            Self::Website => write!(f, "website"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// The lookup tuple that makes an identifier unique among active
/// identifiers within a tenant.
///
/// The external id is compared case-sensitively; any normalization is the
/// resolver's job, never the store's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierKey {
    /// Origin system.
    pub source: IdentifierSource,
    /// Free-form sub-classification within the source (e.g. "customer",
    /// "contact", "lead").
    pub source_type: String,
    /// The record id in the external system.
    pub external_id: String,
}

impl IdentifierKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(
        source: IdentifierSource,
        source_type: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_type: source_type.into(),
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.source_type, self.external_id)
    }
}

/// A claim that an external record equals a given profile.
///
/// An identifier belongs to exactly one profile at a time; a profile owns
/// many identifiers. Detaching sets `is_active = false` and never removes
/// the row, so the audit trail of past claims survives merges and
/// re-links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileIdentifier {
    /// Unique id of this claim.
    pub id: IdentifierId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The profile this identifier currently denotes.
    pub profile_id: ProfileId,
    /// Origin system.
    pub source: IdentifierSource,
    /// Free-form sub-classification within the source.
    pub source_type: String,
    /// The record id in the external system (case-sensitive).
    pub external_id: String,
    /// Opaque secondary reference in the external system, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Confidence (0-100) that this identifier correctly denotes the
    /// profile.
    pub match_quality: u8,
    /// At most one active primary identifier per (profile, source) pair.
    pub is_primary: bool,
    /// Soft-disable flag; inactive identifiers are kept for audit.
    pub is_active: bool,
    /// When the claim was first recorded.
    pub created_at: DateTime<Utc>,
    /// Last metadata refresh.
    pub updated_at: DateTime<Utc>,
}

impl ProfileIdentifier {
    /// Creates a new active, non-primary identifier with full confidence.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        profile_id: ProfileId,
        source: IdentifierSource,
        source_type: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: IdentifierId::new(),
            tenant_id,
            profile_id,
            source,
            source_type: source_type.into(),
            external_id: external_id.into(),
            external_ref: None,
            match_quality: 100,
            is_primary: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the external reference.
    #[must_use]
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    /// Sets the match quality (clamped to 100).
    #[must_use]
    pub fn with_match_quality(mut self, quality: u8) -> Self {
        self.match_quality = quality.min(100);
        self
    }

    /// Marks this identifier as the primary one for its source.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// The uniqueness key of this identifier.
    #[must_use]
    pub fn key(&self) -> IdentifierKey {
        IdentifierKey::new(self.source, self.source_type.clone(), self.external_id.clone())
    }
}

impl PartialEq for ProfileIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProfileIdentifier {}
