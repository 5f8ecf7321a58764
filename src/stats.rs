//! Completion scoring and tenant statistics.
//!
//! Pure read computations over profile state. Completion is a
//! fixed-weight presence sum: adding a qualifying field never lowers the
//! score.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::{Profile, ProfileStatus, ProfileType};

/// Points awarded per present field group. The defaults sum to 100; if a
/// deployment re-tunes them the score is normalized against the actual
/// total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionWeights {
    /// Any email present.
    pub email: u8,
    /// Any phone present.
    pub phone: u8,
    /// A real name (not the "Unknown" fallback).
    pub name: u8,
    /// Any address field present.
    pub address: u8,
    /// Type-specific fields: company info for companies, first and last
    /// name for individuals.
    pub type_specific: u8,
    /// At least one tag.
    pub tags: u8,
    /// At least one free-form attribute.
    pub attributes: u8,
    /// At least one active identifier.
    pub identifier: u8,
}

impl Default for CompletionWeights {
    fn default() -> Self {
        Self {
            email: 15,
            phone: 15,
            name: 10,
            address: 10,
            type_specific: 15,
            tags: 10,
            attributes: 10,
            identifier: 15,
        }
    }
}

impl CompletionWeights {
    fn total(&self) -> u32 {
        u32::from(self.email)
            + u32::from(self.phone)
            + u32::from(self.name)
            + u32::from(self.address)
            + u32::from(self.type_specific)
            + u32::from(self.tags)
            + u32::from(self.attributes)
            + u32::from(self.identifier)
    }
}

/// Computes the 0-100 completion score for a profile.
///
/// `active_identifier_count` is supplied by the caller so this stays a
/// pure function of its inputs.
#[must_use]
pub fn completion_score(
    profile: &Profile,
    active_identifier_count: usize,
    weights: &CompletionWeights,
) -> u8 {
    let total = weights.total();
    if total == 0 {
        return 0;
    }

    let mut earned: u32 = 0;
    if profile.email.as_deref().is_some_and(|v| !v.trim().is_empty()) {
        earned += u32::from(weights.email);
    }
    if profile.phone.as_deref().is_some_and(|v| !v.trim().is_empty()) {
        earned += u32::from(weights.phone);
    }
    if !profile.display_name.trim().is_empty() && profile.display_name != "Unknown" {
        earned += u32::from(weights.name);
    }
    if profile.address.as_ref().is_some_and(|a| !a.is_empty()) {
        earned += u32::from(weights.address);
    }
    let type_specific = match profile.profile_type {
        ProfileType::Company => profile.company.as_ref().is_some_and(|c| !c.is_empty()),
        ProfileType::Individual => profile.first_name.is_some() && profile.last_name.is_some(),
    };
    if type_specific {
        earned += u32::from(weights.type_specific);
    }
    if !profile.tags.is_empty() {
        earned += u32::from(weights.tags);
    }
    if !profile.attributes.is_empty() {
        earned += u32::from(weights.attributes);
    }
    if active_identifier_count > 0 {
        earned += u32::from(weights.identifier);
    }

    ((earned * 100) / total).min(100) as u8
}

/// Plain counts over a tenant's profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatistics {
    /// All profiles regardless of status.
    pub total: usize,
    /// Active profiles.
    pub active: usize,
    /// Operator-deactivated profiles.
    pub inactive: usize,
    /// Profiles retired by a merge.
    pub merged: usize,
    /// Individual-type profiles.
    pub individuals: usize,
    /// Company-type profiles.
    pub companies: usize,
    /// Profiles synced within the last 30 days.
    pub recently_synced: usize,
}

/// Aggregates statistics from a snapshot of all tenant profiles.
#[must_use]
pub fn statistics(profiles: &[Profile]) -> ProfileStatistics {
    let cutoff = Utc::now() - Duration::days(30);
    let mut stats = ProfileStatistics {
        total: profiles.len(),
        ..Default::default()
    };
    for profile in profiles {
        match profile.status {
            ProfileStatus::Active => stats.active += 1,
            ProfileStatus::Inactive => stats.inactive += 1,
            ProfileStatus::Merged => stats.merged += 1,
        }
        match profile.profile_type {
            ProfileType::Individual => stats.individuals += 1,
            ProfileType::Company => stats.companies += 1,
        }
        if profile.last_synced_at.is_some_and(|t| t >= cutoff) {
            stats.recently_synced += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::IdentifierSource;
    use crate::profile::{Address, CompanyInfo};
    use crate::tenant::TenantId;

    fn profile() -> Profile {
        Profile::new(TenantId::new(), ProfileType::Individual, "Unknown")
    }

    #[test]
    fn test_empty_profile_scores_zero() {
        let weights = CompletionWeights::default();
        assert_eq!(completion_score(&profile(), 0, &weights), 0);
    }

    #[test]
    fn test_score_is_monotonic_in_field_presence() {
        let weights = CompletionWeights::default();
        let mut p = profile();
        let mut last = completion_score(&p, 0, &weights);

        p.display_name = "Ann".to_string();
        let s = completion_score(&p, 0, &weights);
        assert!(s >= last);
        last = s;

        p.record_email("a@x.com", IdentifierSource::Erp);
        let s = completion_score(&p, 0, &weights);
        assert!(s >= last);
        last = s;

        p.record_phone("+66111", IdentifierSource::Erp);
        let s = completion_score(&p, 0, &weights);
        assert!(s >= last);
        last = s;

        p.first_name = Some("Ann".to_string());
        p.last_name = Some("Lee".to_string());
        p.tags.insert("vip".to_string());
        p.attributes.insert("k".to_string(), serde_json::json!(1));
        p.address = Some(Address {
            city: Some("Bangkok".to_string()),
            ..Default::default()
        });
        let s = completion_score(&p, 1, &weights);
        assert!(s >= last);
        assert_eq!(s, 100);
    }

    #[test]
    fn test_company_type_specific_fields() {
        let weights = CompletionWeights::default();
        let mut p = Profile::new(TenantId::new(), ProfileType::Company, "Acme");
        let without = completion_score(&p, 0, &weights);
        p.company = Some(CompanyInfo {
            tax_id: Some("0105551234567".to_string()),
            ..Default::default()
        });
        let with = completion_score(&p, 0, &weights);
        assert_eq!(with - without, 15);
    }

    #[test]
    fn test_identifier_presence_counts() {
        let weights = CompletionWeights::default();
        let p = profile();
        assert_eq!(
            completion_score(&p, 1, &weights) - completion_score(&p, 0, &weights),
            15
        );
    }

    #[test]
    fn test_statistics_counts() {
        let tenant = TenantId::new();
        let mut profiles = vec![
            Profile::new(tenant, ProfileType::Individual, "A"),
            Profile::new(tenant, ProfileType::Company, "B"),
            Profile::new(tenant, ProfileType::Individual, "C"),
        ];
        profiles[1].status = ProfileStatus::Inactive;
        let survivor = profiles[0].id;
        profiles[2].retire_into(survivor);
        profiles[0].last_synced_at = Some(Utc::now());

        let stats = statistics(&profiles);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.individuals, 2);
        assert_eq!(stats.companies, 1);
        assert_eq!(stats.recently_synced, 1);
    }
}
