//! Tenant identity.
//!
//! Every operation in unify is scoped to exactly one tenant. The tenant id
//! is threaded explicitly through every store and engine call; there is no
//! ambient "current tenant" state anywhere in the crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The isolation boundary for all profile data.
///
/// Two operations with different `TenantId`s can never observe each
/// other's profiles, identifiers, or merge candidates.
///
/// # Examples
///
/// ```
/// use unify::TenantId;
///
/// let tenant = TenantId::new();
/// assert!(!tenant.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_unique() {
        assert_ne!(TenantId::new(), TenantId::new());
    }

    #[test]
    fn test_tenant_id_serde_transparent() {
        let id = TenantId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
