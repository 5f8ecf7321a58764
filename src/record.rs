//! Incoming external records.
//!
//! An `IncomingRecord` is one unit of data pushed from a source system —
//! an ERP customer row, a LINE follower, a CRM form submission. Records
//! are deliberately loose: every field is optional, and the resolver
//! decides what to do with whatever is present.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::profile::ProfileType;

/// One external record to be resolved against the profile store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncomingRecord {
    /// The record's id in the source system, if it carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Opaque secondary reference into the source system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Email address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Phone number, any format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Given name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Display name as the source shows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Company or employer name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Company tax registration id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    /// Company industry label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Company size label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
    /// Company website.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Hint for the profile type when creating a new profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_type: Option<ProfileType>,
    /// Free-form attributes; merged into the profile's attribute map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Tags; unioned into the profile's tag set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Confidence for the attached identifier, 0-100. Defaults to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_quality: Option<u8>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl IncomingRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the record carries at least one field the resolver
    /// can key a profile on.
    #[must_use]
    pub fn has_usable_field(&self) -> bool {
        present(&self.external_id)
            || present(&self.email)
            || present(&self.phone)
            || present(&self.first_name)
            || present(&self.last_name)
            || present(&self.display_name)
            || present(&self.company_name)
            || present(&self.tax_id)
            || !self.attributes.is_empty()
            || !self.tags.is_empty()
    }

    /// Validates the record before ingestion.
    ///
    /// A record with literally nothing usable is rejected; a record that
    /// is merely missing matchable fields still ingests and falls through
    /// the display-name precedence chain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.has_usable_field() {
            return Err(ValidationError::EmptyRecord);
        }
        if let Some(q) = self.match_quality {
            if q > 100 {
                return Err(ValidationError::MatchQualityOutOfRange { value: q });
            }
        }
        Ok(())
    }

    /// Seeds a display name for a newly created profile.
    ///
    /// Precedence: explicit display name > company name > "first last" >
    /// first alone > last alone > local part of email > "Unknown".
    #[must_use]
    pub fn seed_display_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref() {
            let name = name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
        if let Some(company) = self.company_name.as_deref() {
            let company = company.trim();
            if !company.is_empty() {
                return company.to_string();
            }
        }
        let first = self.first_name.as_deref().map(str::trim).unwrap_or("");
        let last = self.last_name.as_deref().map(str::trim).unwrap_or("");
        match (first.is_empty(), last.is_empty()) {
            (false, false) => return format!("{first} {last}"),
            (false, true) => return first.to_string(),
            (true, false) => return last.to_string(),
            (true, true) => {}
        }
        if let Some(email) = self.email.as_deref() {
            let local = email.trim().split('@').next().unwrap_or("");
            if !local.is_empty() {
                return local.to_string();
            }
        }
        "Unknown".to_string()
    }

    /// The profile type to use when this record creates a new profile.
    ///
    /// Explicit hint wins; otherwise company-shaped records (company name
    /// or tax id, no person name) default to Company.
    #[must_use]
    pub fn inferred_profile_type(&self) -> ProfileType {
        if let Some(t) = self.profile_type {
            return t;
        }
        let company_shaped = present(&self.company_name) || present(&self.tax_id);
        let person_shaped = present(&self.first_name) || present(&self.last_name);
        if company_shaped && !person_shaped {
            ProfileType::Company
        } else {
            ProfileType::Individual
        }
    }
}
