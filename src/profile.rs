//! Canonical profile records.
//!
//! A `Profile` is the one row of truth for a resolved real-world entity
//! inside a tenant. The resolution and merge protocols — not a uniqueness
//! constraint — keep it at exactly one active profile per entity: identity
//! is fuzzy, so the invariant is enforced behaviorally.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifier::IdentifierSource;
use crate::tenant::TenantId;

/// Metadata key under which a merged-away profile records its survivor.
pub const MERGED_INTO_KEY: &str = "merged_into";

/// Globally unique, stable profile identifier.
///
/// Once created, a `ProfileId` never changes. A profile that loses a merge
/// keeps its id and remains resolvable for historical lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Creates a new random profile ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a profile ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProfileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Whether a profile denotes a person or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileType {
    /// A human person.
    Individual,
    /// A company or organization.
    Company,
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Company => write!(f, "company"),
        }
    }
}

/// Lifecycle state of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    /// Live and resolvable.
    Active,
    /// Deactivated by an operator; excluded from resolution and detection.
    Inactive,
    /// Lost a merge. Never hard-deleted; metadata carries the survivor id.
    Merged,
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// An email or phone with its classification and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPoint {
    /// The address or number, as received.
    pub value: String,
    /// Free-form classification ("work", "mobile", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Which system contributed this contact point.
    pub source: IdentifierSource,
}

impl ContactPoint {
    /// Creates a contact point from a value and source.
    #[must_use]
    pub fn new(value: impl Into<String>, source: IdentifierSource) -> Self {
        Self {
            value: value.into(),
            kind: None,
            source,
        }
    }
}

/// Postal address. All fields optional; sources rarely send all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// First street line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    /// Second street line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    /// City or district.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// State or province.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Postal code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    /// Country.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line1.is_none()
            && self.line2.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

/// Company-specific attributes, present on `ProfileType::Company` profiles
/// and on individuals known to belong to a company.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    /// Government tax registration id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    /// Industry classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Headcount band or similar size label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Company website.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl CompanyInfo {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tax_id.is_none()
            && self.industry.is_none()
            && self.size.is_none()
            && self.website.is_none()
    }
}

/// The canonical entity record.
///
/// One active profile per tenant represents a given real-world entity at
/// any time. Scalar contact fields (`email`, `phone`) hold the current
/// best value; `emails`/`phones` accumulate every observed contact point
/// with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Globally unique identifier.
    pub id: ProfileId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Person or organization.
    pub profile_type: ProfileType,
    /// Lifecycle state.
    pub status: ProfileStatus,
    /// Human-readable name, seeded by the resolver's precedence chain.
    pub display_name: String,
    /// Given name, for individuals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name, for individuals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Current best email, as received from the most recent write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Current best phone, as received from the most recent write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Every observed email with provenance.
    #[serde(default)]
    pub emails: Vec<ContactPoint>,
    /// Every observed phone with provenance.
    #[serde(default)]
    pub phones: Vec<ContactPoint>,
    /// Postal address, when any source supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Employer or the organization itself, depending on profile type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Company-specific attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<CompanyInfo>,
    /// Free-form attributes contributed by sources.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Tag set; merged by union.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Segment memberships; merged by union.
    #[serde(default)]
    pub segments: BTreeSet<String>,
    /// The system that first created this profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_source: Option<IdentifierSource>,
    /// Arbitrary metadata; carries [`MERGED_INTO_KEY`] after losing a merge.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the profile was created.
    pub created_at: DateTime<Utc>,
    /// When the profile last changed.
    pub updated_at: DateTime<Utc>,
    /// Last time an ingestion or sync wrote to this profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Creates a new active profile.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        profile_type: ProfileType,
        display_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProfileId::new(),
            tenant_id,
            profile_type,
            status: ProfileStatus::Active,
            display_name: display_name.into(),
            first_name: None,
            last_name: None,
            email: None,
            phone: None,
            emails: Vec::new(),
            phones: Vec::new(),
            address: None,
            company_name: None,
            company: None,
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
            segments: BTreeSet::new(),
            primary_source: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_synced_at: None,
        }
    }

    /// Returns true if this profile participates in resolution and
    /// duplicate detection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ProfileStatus::Active
    }

    /// The survivor this profile was merged into, if it lost a merge.
    #[must_use]
    pub fn merged_into(&self) -> Option<ProfileId> {
        let value = self.metadata.get(MERGED_INTO_KEY)?;
        let uuid: Uuid = value.as_str()?.parse().ok()?;
        Some(ProfileId::from_uuid(uuid))
    }

    /// Retires this profile as the loser of a merge.
    ///
    /// The record stays resolvable; only its status and forward pointer
    /// change.
    pub fn retire_into(&mut self, survivor: ProfileId) {
        self.status = ProfileStatus::Merged;
        self.metadata.insert(
            MERGED_INTO_KEY.to_string(),
            serde_json::Value::String(survivor.to_string()),
        );
        self.touch();
    }

    /// Records an observed email, deduplicated case-insensitively, and
    /// makes it the current best email.
    pub fn record_email(&mut self, value: impl Into<String>, source: IdentifierSource) {
        let value = value.into();
        let lower = value.to_lowercase();
        if !self.emails.iter().any(|c| c.value.to_lowercase() == lower) {
            self.emails.push(ContactPoint::new(value.clone(), source));
        }
        self.email = Some(value);
        self.touch();
    }

    /// Records an observed phone, deduplicated on exact value, and makes
    /// it the current best phone.
    pub fn record_phone(&mut self, value: impl Into<String>, source: IdentifierSource) {
        let value = value.into();
        if !self.phones.iter().any(|c| c.value == value) {
            self.phones.push(ContactPoint::new(value.clone(), source));
        }
        self.phone = Some(value);
        self.touch();
    }

    /// Updates the `updated_at` timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Profile {}

impl std::hash::Hash for Profile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new(TenantId::new(), ProfileType::Individual, "Ann")
    }

    #[test]
    fn test_new_profile_is_active() {
        let p = profile();
        assert!(p.is_active());
        assert_eq!(p.display_name, "Ann");
        assert!(p.merged_into().is_none());
    }

    #[test]
    fn test_retire_into_sets_forward_pointer() {
        let mut p = profile();
        let survivor = ProfileId::new();
        p.retire_into(survivor);

        assert_eq!(p.status, ProfileStatus::Merged);
        assert!(!p.is_active());
        assert_eq!(p.merged_into(), Some(survivor));
    }

    #[test]
    fn test_record_email_dedupes_case_insensitively() {
        let mut p = profile();
        p.record_email("A@x.com", IdentifierSource::Erp);
        p.record_email("a@x.com", IdentifierSource::Line);

        assert_eq!(p.emails.len(), 1);
        assert_eq!(p.email.as_deref(), Some("a@x.com")); // last write wins
    }

    #[test]
    fn test_record_phone_appends_new_values() {
        let mut p = profile();
        p.record_phone("+66111", IdentifierSource::Erp);
        p.record_phone("+66222", IdentifierSource::Erp);
        p.record_phone("+66111", IdentifierSource::Crm);

        assert_eq!(p.phones.len(), 2);
        assert_eq!(p.phone.as_deref(), Some("+66111"));
    }

    #[test]
    fn test_profile_equality_is_id_based() {
        let id = ProfileId::new();
        let mut a = profile();
        let mut b = profile();
        a.id = id;
        b.id = id;
        b.display_name = "Different".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_profile_serialization_roundtrip() {
        let mut p = profile();
        p.tags.insert("vip".to_string());
        p.record_email("a@x.com", IdentifierSource::Erp);

        let json = serde_json::to_string(&p).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(p.id, back.id);
        assert_eq!(back.tags.len(), 1);
        assert_eq!(back.emails.len(), 1);
    }
}
