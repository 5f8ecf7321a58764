//! Merge strategies and survivor computation.
//!
//! This module is the pure half of the merge engine: given a candidate,
//! the two live profiles, and a strategy, it computes the survivor's
//! field values — or fails before anything is mutated. The engine applies
//! the result atomically.
//!
//! The survivor's identity is always the candidate's first profile id;
//! the strategy only decides field values. List-valued state (tags,
//! segments, contact points, attributes, identifiers) is always unioned,
//! whichever strategy picks the scalars.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::candidate::MergeCandidate;
use crate::error::UnifyError;
use crate::identifier::IdentifierSource;
use crate::profile::Profile;

/// How field-level conflicts are resolved when two profiles merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Profile 1's scalar fields win; profile 2 fills gaps.
    Profile1Wins,
    /// Profile 2's scalar fields win; profile 1 fills gaps.
    Profile2Wins,
    /// Prefer non-null; on double non-null keep profile 1's value.
    MergeBoth,
    /// The caller supplies a chosen value for every conflict field.
    Manual,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile1Wins => write!(f, "profile1_wins"),
            Self::Profile2Wins => write!(f, "profile2_wins"),
            Self::MergeBoth => write!(f, "merge_both"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Field-name → chosen-value map for [`MergeStrategy::Manual`].
pub type ResolvedConflicts = BTreeMap<String, String>;

fn pick(strategy: MergeStrategy, a: &Option<String>, b: &Option<String>) -> Option<String> {
    let trimmed = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
    match strategy {
        MergeStrategy::Profile2Wins => trimmed(b).or_else(|| trimmed(a)),
        _ => trimmed(a).or_else(|| trimmed(b)),
    }
}

fn apply_resolved_field(survivor: &mut Profile, field: &str, value: &str) {
    let value = value.trim();
    match field {
        "display_name" => survivor.display_name = value.to_string(),
        "first_name" => survivor.first_name = Some(value.to_string()),
        "last_name" => survivor.last_name = Some(value.to_string()),
        "email" => survivor.record_email(value, IdentifierSource::Manual),
        "phone" => survivor.record_phone(value, IdentifierSource::Manual),
        "company_name" => survivor.company_name = Some(value.to_string()),
        "tax_id" | "industry" | "company_size" | "website" => {
            let company = survivor.company.get_or_insert_with(Default::default);
            match field {
                "tax_id" => company.tax_id = Some(value.to_string()),
                "industry" => company.industry = Some(value.to_string()),
                "company_size" => company.size = Some(value.to_string()),
                _ => company.website = Some(value.to_string()),
            }
        }
        "address_line1" | "address_line2" | "address_city" | "address_state"
        | "address_postal_code" | "address_country" => {
            let address = survivor.address.get_or_insert_with(Default::default);
            match field {
                "address_line1" => address.line1 = Some(value.to_string()),
                "address_line2" => address.line2 = Some(value.to_string()),
                "address_city" => address.city = Some(value.to_string()),
                "address_state" => address.state = Some(value.to_string()),
                "address_postal_code" => address.postal_code = Some(value.to_string()),
                _ => address.country = Some(value.to_string()),
            }
        }
        // Unknown field names resolve into the attribute map rather than
        // silently disappearing.
        other => {
            survivor.attributes.insert(
                other.to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }
}

/// Computes the survivor's field values for an approved candidate.
///
/// Pure: no store access, no mutation of the inputs. Fails with
/// [`UnifyError::IncompleteResolution`] if a MANUAL merge does not cover
/// every conflict field — before anything else is computed.
pub(crate) fn compute_survivor(
    candidate: &MergeCandidate,
    p1: &Profile,
    p2: &Profile,
    strategy: MergeStrategy,
    resolved: Option<&ResolvedConflicts>,
) -> Result<Profile, UnifyError> {
    let empty = ResolvedConflicts::new();
    let resolved = resolved.unwrap_or(&empty);

    if strategy == MergeStrategy::Manual {
        let missing: Vec<String> = candidate
            .conflicts
            .iter()
            .map(|c| c.field.clone())
            .filter(|f| !resolved.contains_key(f))
            .collect();
        if !missing.is_empty() {
            return Err(UnifyError::IncompleteResolution { missing });
        }
    }

    let mut survivor = p1.clone();

    if strategy == MergeStrategy::Profile2Wins {
        survivor.display_name = p2.display_name.clone();
        survivor.profile_type = p2.profile_type;
    }
    survivor.first_name = pick(strategy, &p1.first_name, &p2.first_name);
    survivor.last_name = pick(strategy, &p1.last_name, &p2.last_name);
    survivor.email = pick(strategy, &p1.email, &p2.email);
    survivor.phone = pick(strategy, &p1.phone, &p2.phone);
    survivor.company_name = pick(strategy, &p1.company_name, &p2.company_name);

    if p1.company.is_some() || p2.company.is_some() {
        let c1 = p1.company.clone().unwrap_or_default();
        let c2 = p2.company.clone().unwrap_or_default();
        survivor.company = Some(crate::profile::CompanyInfo {
            tax_id: pick(strategy, &c1.tax_id, &c2.tax_id),
            industry: pick(strategy, &c1.industry, &c2.industry),
            size: pick(strategy, &c1.size, &c2.size),
            website: pick(strategy, &c1.website, &c2.website),
        });
    }

    survivor.address = match strategy {
        MergeStrategy::Profile2Wins => p2.address.clone().or_else(|| p1.address.clone()),
        _ => p1.address.clone().or_else(|| p2.address.clone()),
    };

    // List-valued state is unioned under every strategy.
    for point in &p2.emails {
        let lower = point.value.to_lowercase();
        if !survivor.emails.iter().any(|c| c.value.to_lowercase() == lower) {
            survivor.emails.push(point.clone());
        }
    }
    for point in &p2.phones {
        if !survivor.phones.iter().any(|c| c.value == point.value) {
            survivor.phones.push(point.clone());
        }
    }
    survivor.tags.extend(p2.tags.iter().cloned());
    survivor.segments.extend(p2.segments.iter().cloned());

    // The strategy's winner keeps its attribute values on key clashes;
    // the loser fills the gaps.
    let (winner_attrs, loser_attrs) = if strategy == MergeStrategy::Profile2Wins {
        (&p2.attributes, &p1.attributes)
    } else {
        (&p1.attributes, &p2.attributes)
    };
    survivor.attributes = winner_attrs.clone();
    for (key, value) in loser_attrs {
        survivor.attributes.entry(key.clone()).or_insert_with(|| value.clone());
    }

    // Metadata: survivor's keys win, loser's fill.
    for (key, value) in &p2.metadata {
        survivor.metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }

    survivor.primary_source = survivor.primary_source.or(p2.primary_source);
    survivor.last_synced_at = match (p1.last_synced_at, p2.last_synced_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    if strategy == MergeStrategy::Manual {
        for (field, value) in resolved {
            apply_resolved_field(&mut survivor, field, value);
        }
    }

    survivor.touch();
    Ok(survivor)
}
