//! Identity directory: current attributes and per-source values.
//!
//! The directory is an external collaborator; the engine only reads it. The
//! in-memory implementation doubles as a seeding helper for tests and the CLI.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{IdentityId, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::RiskLevel;

/// Current state of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub id: IdentityId,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub manager_id: Option<IdentityId>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub population_type: Option<String>,
    #[serde(default)]
    pub role_ids: BTreeSet<String>,
    #[serde(default)]
    pub entitlement_ids: BTreeSet<String>,
}

impl IdentitySnapshot {
    /// Empty snapshot for an identity the directory does not know yet.
    #[must_use]
    pub fn new(id: IdentityId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            risk_level: RiskLevel::Low,
            manager_id: None,
            organization: None,
            population_type: None,
            role_ids: BTreeSet::new(),
            entitlement_ids: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_risk_level(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    #[must_use]
    pub fn with_manager(mut self, manager: IdentityId) -> Self {
        self.manager_id = Some(manager);
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    #[must_use]
    pub fn with_population_type(mut self, population: impl Into<String>) -> Self {
        self.population_type = Some(population.into());
        self
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_ids.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_entitlements<I, S>(mut self, entitlements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entitlement_ids
            .extend(entitlements.into_iter().map(Into::into));
        self
    }

    /// Current value of an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute map with one attribute overridden.
    #[must_use]
    pub fn attributes_with(&self, name: &str, value: &Value) -> BTreeMap<String, Value> {
        let mut attributes = self.attributes.clone();
        attributes.insert(name.to_string(), value.clone());
        attributes
    }
}

/// What one source currently reports for an attribute of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    pub source_id: SourceId,
    pub value: Value,
    pub written_at: DateTime<Utc>,
}

/// Read access to identities and per-source attribute values.
#[async_trait::async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn get_identity(&self, id: &IdentityId) -> Result<Option<IdentitySnapshot>>;

    /// Values every source currently reports for `attribute` of `id`.
    async fn source_values(&self, id: &IdentityId, attribute: &str) -> Result<Vec<SourceValue>>;
}

type SourceValueKey = (IdentityId, String);

/// In-memory identity directory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    identities: Arc<RwLock<HashMap<IdentityId, IdentitySnapshot>>>,
    source_values: Arc<RwLock<HashMap<SourceValueKey, Vec<SourceValue>>>>,
}

impl InMemoryIdentityDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an identity snapshot.
    pub async fn upsert_identity(&self, identity: IdentitySnapshot) {
        self.identities
            .write()
            .await
            .insert(identity.id.clone(), identity);
    }

    /// Record the value a source reports, replacing that source's previous value.
    pub async fn record_source_value(
        &self,
        id: &IdentityId,
        attribute: &str,
        value: SourceValue,
    ) {
        let mut values = self.source_values.write().await;
        let entry = values
            .entry((id.clone(), attribute.to_string()))
            .or_default();
        entry.retain(|v| v.source_id != value.source_id);
        entry.push(value);
    }
}

#[async_trait::async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn get_identity(&self, id: &IdentityId) -> Result<Option<IdentitySnapshot>> {
        Ok(self.identities.read().await.get(id).cloned())
    }

    async fn source_values(&self, id: &IdentityId, attribute: &str) -> Result<Vec<SourceValue>> {
        Ok(self
            .source_values
            .read()
            .await
            .get(&(id.clone(), attribute.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
