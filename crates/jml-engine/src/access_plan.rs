//! Proposed access changes for an identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Roles and entitlements to add or remove, against what the identity holds.
///
/// An id never appears in both the added and removed set of one category;
/// [`AccessPlan::validate`] enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPlan {
    pub added_roles: BTreeSet<String>,
    pub removed_roles: BTreeSet<String>,
    pub added_entitlements: BTreeSet<String>,
    pub removed_entitlements: BTreeSet<String>,
    pub existing_roles: BTreeSet<String>,
    pub existing_entitlements: BTreeSet<String>,
}

impl AccessPlan {
    /// Empty plan over the identity's current access.
    #[must_use]
    pub fn from_existing(roles: BTreeSet<String>, entitlements: BTreeSet<String>) -> Self {
        Self {
            existing_roles: roles,
            existing_entitlements: entitlements,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn add_role(mut self, role: impl Into<String>) -> Self {
        self.added_roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn remove_role(mut self, role: impl Into<String>) -> Self {
        self.removed_roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn add_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.added_entitlements.insert(entitlement.into());
        self
    }

    #[must_use]
    pub fn remove_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.removed_entitlements.insert(entitlement.into());
        self
    }

    /// Reject a plan that both adds and removes the same id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAccessPlan` naming the first offending id.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = self.added_roles.intersection(&self.removed_roles).next() {
            return Err(EngineError::InvalidAccessPlan {
                category: "role",
                id: id.clone(),
            });
        }
        if let Some(id) = self
            .added_entitlements
            .intersection(&self.removed_entitlements)
            .next()
        {
            return Err(EngineError::InvalidAccessPlan {
                category: "entitlement",
                id: id.clone(),
            });
        }
        Ok(())
    }

    /// Roles held once the plan is applied: existing ∪ added − removed.
    #[must_use]
    pub fn end_state_roles(&self) -> BTreeSet<String> {
        end_state(&self.existing_roles, &self.added_roles, &self.removed_roles)
    }

    /// Entitlements held once the plan is applied.
    #[must_use]
    pub fn end_state_entitlements(&self) -> BTreeSet<String> {
        end_state(
            &self.existing_entitlements,
            &self.added_entitlements,
            &self.removed_entitlements,
        )
    }

    /// True when the plan adds or removes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added_roles.is_empty()
            && self.removed_roles.is_empty()
            && self.added_entitlements.is_empty()
            && self.removed_entitlements.is_empty()
    }
}

fn end_state(
    existing: &BTreeSet<String>,
    added: &BTreeSet<String>,
    removed: &BTreeSet<String>,
) -> BTreeSet<String> {
    existing
        .union(added)
        .filter(|id| !removed.contains(*id))
        .cloned()
        .collect()
}
