//! Duplicate detection.
//!
//! Finds pairs of active profiles that are not linked by a shared
//! identifier but plausibly denote the same entity. Detection is a pure
//! read over a snapshot: it never mutates profile or identifier state, so
//! a cancelled scan leaves nothing behind.
//!
//! Candidate pairs come from blocking — profiles are grouped by
//! normalized email, normalized phone, company tax id, and a coarse name
//! key, and only profiles sharing a block are compared. Oversized blocks
//! are skipped to keep the scan off the O(n²) cliff on large tenants.
//!
//! Weights and thresholds are policy, not mechanism, and live in
//! [`DetectorConfig`]. The defaults are a reference tuning, not gospel.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{ConflictField, MatchReason, MergeCandidate};
use crate::identifier::{IdentifierSource, ProfileIdentifier};
use crate::profile::{Profile, ProfileId, ProfileType};
use crate::resolver::{normalize_email, normalize_phone};

/// Per-signal score contributions. All values are points on the 0-100
/// candidate scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Exact email match.
    pub exact_email: u8,
    /// Exact (normalized) phone match.
    pub exact_phone: u8,
    /// Company tax id or normalized company name match, both Company type.
    pub company_match: u8,
    /// Fuzzy name similarity above the configured threshold.
    pub fuzzy_name: u8,
    /// Both profiles carry identifiers from the same source with
    /// different ids. A weak hint, not proof.
    pub shared_source_family: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            exact_email: 40,
            exact_phone: 35,
            company_match: 35,
            fuzzy_name: 20,
            shared_source_family: 5,
        }
    }
}

/// Tunable duplicate-detection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Signal weights.
    pub weights: ScoreWeights,
    /// Minimum total score for a pair to become a candidate.
    pub score_threshold: u8,
    /// Minimum Jaro-Winkler similarity for the fuzzy-name signal.
    pub name_similarity_threshold: f64,
    /// Blocks larger than this are skipped entirely; a block this big is
    /// a degenerate key (e.g. a placeholder email), not a likely match.
    pub max_block_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            score_threshold: 40,
            name_similarity_threshold: 0.85,
            max_block_size: 100,
        }
    }
}

fn name_key(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    if cleaned.len() < 2 {
        return None;
    }
    Some(cleaned.chars().take(4).collect())
}

fn blocking_keys(profile: &Profile) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(email) = profile.email.as_deref() {
        keys.push(format!("email:{}", normalize_email(email)));
    }
    if let Some(phone) = profile.phone.as_deref() {
        let normalized = normalize_phone(phone);
        if !normalized.is_empty() {
            keys.push(format!("phone:{normalized}"));
        }
    }
    if let Some(tax_id) = profile.company.as_ref().and_then(|c| c.tax_id.as_deref()) {
        keys.push(format!("tax:{}", tax_id.trim()));
    }
    if let Some(key) = name_key(&profile.display_name) {
        keys.push(format!("name:{key}"));
    }
    keys
}

fn normalized_name(profile: &Profile) -> String {
    profile
        .display_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn active_keys(identifiers: &[ProfileIdentifier]) -> HashSet<(IdentifierSource, &str, &str)> {
    identifiers
        .iter()
        .filter(|i| i.is_active)
        .map(|i| (i.source, i.source_type.as_str(), i.external_id.as_str()))
        .collect()
}

fn active_sources(identifiers: &[ProfileIdentifier]) -> HashSet<IdentifierSource> {
    identifiers
        .iter()
        .filter(|i| i.is_active)
        .map(|i| i.source)
        .collect()
}

fn both<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<(&'a str, &'a str)> {
    match (a.as_deref(), b.as_deref()) {
        (Some(x), Some(y)) if !x.trim().is_empty() && !y.trim().is_empty() => Some((x, y)),
        _ => None,
    }
}

/// Collects every field present on both profiles with differing values.
/// The detector reports; it never picks a winner.
fn push_if_differs(out: &mut Vec<ConflictField>, field: &str, a: &Option<String>, b: &Option<String>) {
    if let Some((x, y)) = both(a, b) {
        if x != y {
            out.push(ConflictField::new(field, x, y));
        }
    }
}

fn conflict_fields(p1: &Profile, p2: &Profile) -> Vec<ConflictField> {
    let mut out = Vec::new();

    if p1.display_name != p2.display_name {
        out.push(ConflictField::new(
            "display_name",
            &p1.display_name,
            &p2.display_name,
        ));
    }
    push_if_differs(&mut out, "first_name", &p1.first_name, &p2.first_name);
    push_if_differs(&mut out, "last_name", &p1.last_name, &p2.last_name);
    push_if_differs(&mut out, "company_name", &p1.company_name, &p2.company_name);

    // Contact fields conflict on normalized inequality; "A@x.com" vs
    // "a@x.com" is the same address, not a decision to make.
    if let Some((x, y)) = both(&p1.email, &p2.email) {
        if normalize_email(x) != normalize_email(y) {
            out.push(ConflictField::new("email", x, y));
        }
    }
    if let Some((x, y)) = both(&p1.phone, &p2.phone) {
        if normalize_phone(x) != normalize_phone(y) {
            out.push(ConflictField::new("phone", x, y));
        }
    }

    let c1 = p1.company.clone().unwrap_or_default();
    let c2 = p2.company.clone().unwrap_or_default();
    push_if_differs(&mut out, "tax_id", &c1.tax_id, &c2.tax_id);
    push_if_differs(&mut out, "industry", &c1.industry, &c2.industry);
    push_if_differs(&mut out, "company_size", &c1.size, &c2.size);
    push_if_differs(&mut out, "website", &c1.website, &c2.website);

    let a1 = p1.address.clone().unwrap_or_default();
    let a2 = p2.address.clone().unwrap_or_default();
    push_if_differs(&mut out, "address_line1", &a1.line1, &a2.line1);
    push_if_differs(&mut out, "address_line2", &a1.line2, &a2.line2);
    push_if_differs(&mut out, "address_city", &a1.city, &a2.city);
    push_if_differs(&mut out, "address_state", &a1.state, &a2.state);
    push_if_differs(&mut out, "address_postal_code", &a1.postal_code, &a2.postal_code);
    push_if_differs(&mut out, "address_country", &a1.country, &a2.country);

    out
}

fn score_pair(
    p1: &Profile,
    p2: &Profile,
    ids1: &[ProfileIdentifier],
    ids2: &[ProfileIdentifier],
    config: &DetectorConfig,
) -> Option<(u8, Vec<MatchReason>)> {
    // Already linked by a shared active identifier: nothing to propose.
    // The attach invariant makes this unreachable, but the check is cheap
    // and detection must not rely on writer-side invariants.
    if !active_keys(ids1).is_disjoint(&active_keys(ids2)) {
        return None;
    }

    let weights = &config.weights;
    let mut reasons = Vec::new();
    let mut score: u32 = 0;

    if let Some((a, b)) = both(&p1.email, &p2.email) {
        if normalize_email(a) == normalize_email(b) {
            reasons.push(MatchReason::new("exact email match", weights.exact_email));
            score += u32::from(weights.exact_email);
        }
    }

    if let Some((a, b)) = both(&p1.phone, &p2.phone) {
        let (a, b) = (normalize_phone(a), normalize_phone(b));
        if !a.is_empty() && a == b {
            reasons.push(MatchReason::new("exact phone match", weights.exact_phone));
            score += u32::from(weights.exact_phone);
        }
    }

    if p1.profile_type == ProfileType::Company && p2.profile_type == ProfileType::Company {
        let tax1 = p1.company.as_ref().and_then(|c| c.tax_id.clone());
        let tax2 = p2.company.as_ref().and_then(|c| c.tax_id.clone());
        let tax_match = both(&tax1, &tax2).is_some_and(|(a, b)| a.trim() == b.trim());
        let name_match = both(&p1.company_name, &p2.company_name)
            .is_some_and(|(a, b)| a.trim().to_lowercase() == b.trim().to_lowercase());
        if tax_match {
            reasons.push(MatchReason::new("company tax id match", weights.company_match));
            score += u32::from(weights.company_match);
        } else if name_match {
            reasons.push(MatchReason::new("company name match", weights.company_match));
            score += u32::from(weights.company_match);
        }
    }

    let similarity = strsim::jaro_winkler(&normalized_name(p1), &normalized_name(p2));
    if similarity >= config.name_similarity_threshold {
        reasons.push(MatchReason::new(
            format!("name similarity {similarity:.2}"),
            weights.fuzzy_name,
        ));
        score += u32::from(weights.fuzzy_name);
    }

    if let Some(source) = active_sources(ids1)
        .intersection(&active_sources(ids2))
        .min()
    {
        reasons.push(MatchReason::new(
            format!("both hold a {source} identifier (different ids)"),
            weights.shared_source_family,
        ));
        score += u32::from(weights.shared_source_family);
    }

    let score = score.min(100) as u8;
    if score >= config.score_threshold && !reasons.is_empty() {
        Some((score, reasons))
    } else {
        None
    }
}

/// Scans a snapshot of active profiles for merge candidates.
///
/// `identifiers` maps each profile to its identifiers; profiles missing
/// from the map are treated as having none.
#[must_use]
pub fn detect(
    profiles: &[Profile],
    identifiers: &HashMap<ProfileId, Vec<ProfileIdentifier>>,
    config: &DetectorConfig,
) -> Vec<MergeCandidate> {
    let empty: Vec<ProfileIdentifier> = Vec::new();

    let mut blocks: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, profile) in profiles.iter().enumerate() {
        for key in blocking_keys(profile) {
            blocks.entry(key).or_default().push(idx);
        }
    }

    let mut seen: HashSet<(ProfileId, ProfileId)> = HashSet::new();
    let mut candidates = Vec::new();

    for (key, members) in &blocks {
        if members.len() < 2 {
            continue;
        }
        if members.len() > config.max_block_size {
            debug!(block = %key, size = members.len(), "skipping oversized block");
            continue;
        }
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                // Older profile first: it is the default survivor.
                let (p1, p2) = if profiles[a].created_at <= profiles[b].created_at {
                    (&profiles[a], &profiles[b])
                } else {
                    (&profiles[b], &profiles[a])
                };
                let pair = (p1.id.min(p2.id), p1.id.max(p2.id));
                if !seen.insert(pair) {
                    continue;
                }

                let ids1 = identifiers.get(&p1.id).unwrap_or(&empty);
                let ids2 = identifiers.get(&p2.id).unwrap_or(&empty);
                if let Some((score, reasons)) = score_pair(p1, p2, ids1, ids2, config) {
                    let conflicts = conflict_fields(p1, p2);
                    candidates.push(MergeCandidate::new(
                        p1.tenant_id,
                        p1.id,
                        p2.id,
                        score,
                        reasons,
                        conflicts,
                    ));
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.detected_at.cmp(&b.detected_at)));
    debug!(candidates = candidates.len(), "duplicate scan finished");
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ProfileIdentifier;
    use crate::profile::{Profile, ProfileType};
    use crate::tenant::TenantId;

    fn individual(tenant: TenantId, name: &str) -> Profile {
        Profile::new(tenant, ProfileType::Individual, name)
    }

    fn detect_simple(profiles: &[Profile]) -> Vec<MergeCandidate> {
        detect(profiles, &HashMap::new(), &DetectorConfig::default())
    }

    #[test]
    fn test_exact_email_produces_candidate_with_reason() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Bee");
        a.record_email("b@x.com", IdentifierSource::Erp);
        let mut b = individual(tenant, "Somchai");
        b.record_email("B@x.com", IdentifierSource::Crm);

        let candidates = detect_simple(&[a, b]);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert!(c.reasons.iter().any(|r| r.reason == "exact email match"));
        assert_eq!(c.score, 40);
    }

    #[test]
    fn test_no_shared_block_no_comparison() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Alpha");
        a.record_email("a@x.com", IdentifierSource::Erp);
        let mut b = individual(tenant, "Zeta");
        b.record_email("z@y.com", IdentifierSource::Erp);

        assert!(detect_simple(&[a, b]).is_empty());
    }

    #[test]
    fn test_fuzzy_name_signal() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Somchai Jaidee");
        a.record_phone("+66111", IdentifierSource::Erp);
        let mut b = individual(tenant, "Somchai Jaide");
        b.record_phone("+66111", IdentifierSource::Crm);

        let candidates = detect_simple(&[a, b]);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert!(c.reasons.iter().any(|r| r.reason == "exact phone match"));
        assert!(c.reasons.iter().any(|r| r.reason.starts_with("name similarity")));
        assert_eq!(c.score, 55);
    }

    #[test]
    fn test_company_tax_id_match() {
        let tenant = TenantId::new();
        let mut a = Profile::new(tenant, ProfileType::Company, "Acme Co Ltd");
        a.company = Some(crate::profile::CompanyInfo {
            tax_id: Some("0105551234567".to_string()),
            ..Default::default()
        });
        let mut b = Profile::new(tenant, ProfileType::Company, "ACME Company Limited");
        b.company = Some(crate::profile::CompanyInfo {
            tax_id: Some("0105551234567".to_string()),
            ..Default::default()
        });

        let candidates = detect_simple(&[a, b]);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0]
            .reasons
            .iter()
            .any(|r| r.reason == "company tax id match"));
    }

    #[test]
    fn test_below_threshold_is_dropped() {
        let tenant = TenantId::new();
        // Similar names only: 20 points, below the default threshold 40.
        let a = individual(tenant, "Somchai Jaidee");
        let b = individual(tenant, "Somchai Jaide");
        assert!(detect_simple(&[a, b]).is_empty());
    }

    #[test]
    fn test_conflicting_fields_are_reported_not_resolved() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Bee");
        a.record_email("b@x.com", IdentifierSource::Erp);
        a.record_phone("+66111", IdentifierSource::Erp);
        let mut b = individual(tenant, "Bee Srisuk");
        b.record_email("b@x.com", IdentifierSource::Crm);
        b.record_phone("+66222", IdentifierSource::Crm);

        let candidates = detect_simple(&[a, b]);
        assert_eq!(candidates.len(), 1);
        let conflicts = &candidates[0].conflicts;
        assert!(conflicts.iter().any(|c| c.field == "phone"));
        assert!(conflicts.iter().any(|c| c.field == "display_name"));
        assert!(!conflicts.iter().any(|c| c.field == "email"));
    }

    #[test]
    fn test_differing_addresses_are_reported() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Bee");
        a.record_email("b@x.com", IdentifierSource::Erp);
        a.address = Some(crate::profile::Address {
            city: Some("Bangkok".to_string()),
            country: Some("TH".to_string()),
            ..Default::default()
        });
        let mut b = individual(tenant, "Bee");
        b.record_email("b@x.com", IdentifierSource::Crm);
        b.address = Some(crate::profile::Address {
            city: Some("Chiang Mai".to_string()),
            country: Some("TH".to_string()),
            ..Default::default()
        });

        let candidates = detect_simple(&[a, b]);
        assert_eq!(candidates.len(), 1);
        let conflicts = &candidates[0].conflicts;
        assert!(conflicts.iter().any(|c| c.field == "address_city"));
        // Agreeing sub-fields are not conflicts.
        assert!(!conflicts.iter().any(|c| c.field == "address_country"));
    }

    #[test]
    fn test_shared_identifier_family_is_weak_signal() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Bee");
        a.record_email("b@x.com", IdentifierSource::Erp);
        let mut b = individual(tenant, "Malee");
        b.record_email("b@x.com", IdentifierSource::Line);

        let mut identifiers = HashMap::new();
        identifiers.insert(
            a.id,
            vec![ProfileIdentifier::new(tenant, a.id, IdentifierSource::Line, "user", "U1")],
        );
        identifiers.insert(
            b.id,
            vec![ProfileIdentifier::new(tenant, b.id, IdentifierSource::Line, "user", "U2")],
        );

        let candidates = detect(&[a, b], &identifiers, &DetectorConfig::default());
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.score, 45); // email 40 + shared family 5
        assert!(c
            .reasons
            .iter()
            .any(|r| r.reason.contains("line identifier")));
    }

    #[test]
    fn test_shared_exact_identifier_suppresses_pair() {
        let tenant = TenantId::new();
        let mut a = individual(tenant, "Bee");
        a.record_email("b@x.com", IdentifierSource::Erp);
        let mut b = individual(tenant, "Bee");
        b.record_email("b@x.com", IdentifierSource::Line);

        // Same key on both sides (cannot happen through attach, but the
        // detector checks anyway).
        let shared = |p: &Profile| {
            vec![ProfileIdentifier::new(tenant, p.id, IdentifierSource::Erp, "customer", "C1")]
        };
        let mut identifiers = HashMap::new();
        identifiers.insert(a.id, shared(&a));
        identifiers.insert(b.id, shared(&b));

        assert!(detect(&[a, b], &identifiers, &DetectorConfig::default()).is_empty());
    }

    #[test]
    fn test_oversized_block_is_skipped() {
        let tenant = TenantId::new();
        let config = DetectorConfig {
            max_block_size: 3,
            ..Default::default()
        };
        let profiles: Vec<Profile> = (0..5)
            .map(|i| {
                let mut p = individual(tenant, &format!("P{i}"));
                p.record_email("shared@x.com", IdentifierSource::Erp);
                p
            })
            .collect();

        assert!(detect(&profiles, &HashMap::new(), &config).is_empty());
    }

    #[test]
    fn test_older_profile_listed_first() {
        let tenant = TenantId::new();
        let mut older = individual(tenant, "Bee");
        older.record_email("b@x.com", IdentifierSource::Erp);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut newer = individual(tenant, "Bee");
        newer.record_email("b@x.com", IdentifierSource::Crm);

        // Order of the input slice must not matter.
        let candidates = detect_simple(&[newer.clone(), older.clone()]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].profile1_id, older.id);
        assert_eq!(candidates[0].profile2_id, newer.id);
    }
}
