//! Ingestion resolution: mapping incoming records to profiles.
//!
//! The precedence chain is identifier > email > phone > create, each step
//! short-circuiting on the first hit. Normalization lives here — the
//! stores compare exactly what they are given.
//!
//! Field updates are last-write-wins at field granularity. That is the
//! platform's current policy, carried over knowingly: an out-of-order
//! late sync can overwrite newer data.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::identifier::IdentifierSource;
use crate::profile::Profile;
use crate::record::IncomingRecord;

static EMAIL_REGEX: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn cached_regex(pattern: &str) -> Option<regex::Regex> {
    let cache = EMAIL_REGEX.get_or_init(|| RwLock::new(HashMap::new()));
    {
        let guard = cache.read().ok()?;
        if let Some(re) = guard.get(pattern) {
            return Some(re.clone());
        }
    }
    let compiled = regex::Regex::new(pattern).ok()?;
    let mut guard = cache.write().ok()?;
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Some(compiled)
}

/// Lowercases and trims an email for matching. Matching is
/// case-insensitive exact, nothing fancier.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Reduces a phone number to a leading `+` (if present) and digits.
/// "+66 (0)81-111 2222" and "+66081 1112222" normalize identically.
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && i == 0) {
            out.push(c);
        }
    }
    out
}

/// Syntax screen for emails. Deliberately loose: the goal is to keep
/// garbage out of the email index, not to implement RFC 5322.
#[must_use]
pub fn looks_like_email(value: &str) -> bool {
    match cached_regex(EMAIL_PATTERN) {
        Some(re) => re.is_match(value.trim()),
        None => value.contains('@'),
    }
}

/// Which step of the precedence chain produced the target profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// No step hit; a new profile was created.
    Created,
    /// Step 1: the identifier store knew the external id.
    MatchedByIdentifier,
    /// Step 2: an active profile held the same email.
    MatchedByEmail,
    /// Step 3: an active profile held the same phone.
    MatchedByPhone,
}

impl Disposition {
    /// Returns true if an existing profile absorbed the record.
    #[must_use]
    pub const fn matched_existing(&self) -> bool {
        !matches!(self, Self::Created)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::MatchedByIdentifier => write!(f, "matched_by_identifier"),
            Self::MatchedByEmail => write!(f, "matched_by_email"),
            Self::MatchedByPhone => write!(f, "matched_by_phone"),
        }
    }
}

/// A resolved profile plus how it was found.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    /// The profile the record was written to.
    pub profile: Profile,
    /// Which precedence step hit.
    pub disposition: Disposition,
}

/// Overwrites profile fields with whatever the record carries.
///
/// Fields absent from the record are left alone; list-valued state
/// (contact points, tags, attributes) accumulates.
pub(crate) fn apply_record(
    profile: &mut Profile,
    record: &IncomingRecord,
    source: IdentifierSource,
) {
    if let Some(email) = non_empty(&record.email) {
        profile.record_email(email.trim(), source);
    }
    if let Some(phone) = non_empty(&record.phone) {
        profile.record_phone(normalize_phone(phone), source);
    }
    if let Some(v) = non_empty(&record.first_name) {
        profile.first_name = Some(v.trim().to_string());
    }
    if let Some(v) = non_empty(&record.last_name) {
        profile.last_name = Some(v.trim().to_string());
    }
    if let Some(v) = non_empty(&record.display_name) {
        profile.display_name = v.trim().to_string();
    }
    if let Some(v) = non_empty(&record.company_name) {
        profile.company_name = Some(v.trim().to_string());
    }
    if let Some(t) = record.profile_type {
        profile.profile_type = t;
    }

    if record.tax_id.is_some()
        || record.industry.is_some()
        || record.company_size.is_some()
        || record.website.is_some()
    {
        let company = profile.company.get_or_insert_with(Default::default);
        if let Some(v) = non_empty(&record.tax_id) {
            company.tax_id = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty(&record.industry) {
            company.industry = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty(&record.company_size) {
            company.size = Some(v.trim().to_string());
        }
        if let Some(v) = non_empty(&record.website) {
            company.website = Some(v.trim().to_string());
        }
    }

    for (key, value) in &record.attributes {
        profile.attributes.insert(key.clone(), value.clone());
    }
    for tag in &record.tags {
        let tag = tag.trim();
        if !tag.is_empty() {
            profile.tags.insert(tag.to_string());
        }
    }

    profile.last_synced_at = Some(chrono::Utc::now());
    profile.touch();
}

/// Builds a fresh profile from a record that matched nothing.
pub(crate) fn new_profile_from(
    tenant: crate::tenant::TenantId,
    source: IdentifierSource,
    record: &IncomingRecord,
) -> Profile {
    let mut profile = Profile::new(tenant, record.inferred_profile_type(), record.seed_display_name());
    profile.primary_source = Some(source);
    apply_record(&mut profile, record, source);
    profile
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|s| !s.trim().is_empty())
}
