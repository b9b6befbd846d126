//! Attribute sources and their mastership declarations.
//!
//! An attribute source is a system of record (HRIS, directory, ...) that
//! declares, per attribute, how strongly it claims to master that attribute.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jml_core::SourceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::identity::IdentitySnapshot;

// ============================================================================
// Domain Types
// ============================================================================

/// How strongly a source claims an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MastershipKind {
    /// Wins unconditionally.
    ExclusiveMaster,
    PreferredMaster,
    /// Considered only when no preferred master reports.
    Fallback,
}

impl fmt::Display for MastershipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MastershipKind::ExclusiveMaster => write!(f, "EXCLUSIVE_MASTER"),
            MastershipKind::PreferredMaster => write!(f, "PREFERRED_MASTER"),
            MastershipKind::Fallback => write!(f, "FALLBACK"),
        }
    }
}

/// What the winning declaration does with a null value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NullPolicy {
    Reject,
    #[default]
    Accept,
    Default(Value),
}

/// Strategy that ranks non-exclusive candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrecedenceKind {
    /// Lowest precedence number wins.
    #[default]
    PriorityNumber,
    /// Most recently written value wins.
    TimestampFreshness,
    /// Highest trust level wins.
    TrustScore,
    /// Pluggable comparator.
    CustomRule,
}

impl fmt::Display for PrecedenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecedenceKind::PriorityNumber => write!(f, "PRIORITY_NUMBER"),
            PrecedenceKind::TimestampFreshness => write!(f, "TIMESTAMP_FRESHNESS"),
            PrecedenceKind::TrustScore => write!(f, "TRUST_SCORE"),
            PrecedenceKind::CustomRule => write!(f, "CUSTOM_RULE"),
        }
    }
}

/// Tie-break applied when the strategy cannot separate candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TieBreakPolicy {
    #[default]
    HighestPriority,
    MostRecent,
    HighestTrust,
    Custom,
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreakPolicy::HighestPriority => write!(f, "HIGHEST_PRIORITY"),
            TieBreakPolicy::MostRecent => write!(f, "MOST_RECENT"),
            TieBreakPolicy::HighestTrust => write!(f, "HIGHEST_TRUST"),
            TieBreakPolicy::Custom => write!(f, "CUSTOM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecedenceStrategy {
    pub kind: PrecedenceKind,
    pub conflict_resolution: TieBreakPolicy,
}

/// Which attributes and identities a source speaks for.
///
/// Empty lists mean "no restriction".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceScope {
    pub attributes: Vec<String>,
    pub organizations: Vec<String>,
    pub population_types: Vec<String>,
}

impl SourceScope {
    /// True if the scope covers `attribute` for `identity`.
    ///
    /// An identity without an organization (or population type) is outside a
    /// scope that lists organizations (or population types).
    #[must_use]
    pub fn covers(&self, attribute: &str, identity: Option<&IdentitySnapshot>) -> bool {
        if !self.attributes.is_empty() && !self.attributes.iter().any(|a| a == attribute) {
            return false;
        }
        let listed = |list: &[String], value: Option<&String>| {
            list.is_empty() || value.is_some_and(|v| list.contains(v))
        };
        match identity {
            Some(identity) => {
                listed(&self.organizations, identity.organization.as_ref())
                    && listed(&self.population_types, identity.population_type.as_ref())
            }
            None => self.organizations.is_empty() && self.population_types.is_empty(),
        }
    }
}

/// A source's claim on one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMastershipDeclaration {
    pub attribute: String,
    /// Field name in the source system.
    pub source_field: String,
    pub kind: MastershipKind,
    /// Lower is stronger.
    pub precedence: u32,
    /// 0-100.
    pub trust_level: u8,
    #[serde(default)]
    pub null_policy: NullPolicy,
}

impl AttributeMastershipDeclaration {
    #[must_use]
    pub fn new(attribute: impl Into<String>, kind: MastershipKind, precedence: u32) -> Self {
        let attribute = attribute.into();
        Self {
            source_field: attribute.clone(),
            attribute,
            kind,
            precedence,
            trust_level: 50,
            null_policy: NullPolicy::Accept,
        }
    }

    #[must_use]
    pub fn with_trust_level(mut self, trust_level: u8) -> Self {
        self.trust_level = trust_level;
        self
    }

    #[must_use]
    pub fn with_null_policy(mut self, null_policy: NullPolicy) -> Self {
        self.null_policy = null_policy;
        self
    }

    #[must_use]
    pub fn with_source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = field.into();
        self
    }
}

/// A system of record feeding identity attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSource {
    pub id: SourceId,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub scope: SourceScope,
    #[serde(default)]
    pub declarations: Vec<AttributeMastershipDeclaration>,
    #[serde(default)]
    pub strategy: PrecedenceStrategy,
}

fn default_active() -> bool {
    true
}

impl AttributeSource {
    #[must_use]
    pub fn new(id: impl Into<SourceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            scope: SourceScope::default(),
            declarations: Vec::new(),
            strategy: PrecedenceStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_declaration(mut self, declaration: AttributeMastershipDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    #[must_use]
    pub fn with_strategy(
        mut self,
        kind: PrecedenceKind,
        conflict_resolution: TieBreakPolicy,
    ) -> Self {
        self.strategy = PrecedenceStrategy {
            kind,
            conflict_resolution,
        };
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SourceScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// The declaration for `attribute`, if this source makes one.
    #[must_use]
    pub fn declaration_for(&self, attribute: &str) -> Option<&AttributeMastershipDeclaration> {
        self.declarations.iter().find(|d| d.attribute == attribute)
    }

    /// Check the source configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("name", "source name cannot be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for declaration in &self.declarations {
            if declaration.attribute.trim().is_empty() {
                return Err(EngineError::validation(
                    "declarations.attribute",
                    "attribute name cannot be empty",
                ));
            }
            if declaration.trust_level > 100 {
                return Err(EngineError::validation(
                    "declarations.trust_level",
                    format!(
                        "trust level {} for '{}' exceeds 100",
                        declaration.trust_level, declaration.attribute
                    ),
                ));
            }
            if !seen.insert(declaration.attribute.as_str()) {
                return Err(EngineError::validation(
                    "declarations",
                    format!("duplicate declaration for '{}'", declaration.attribute),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Attribute source registry.
#[async_trait::async_trait]
pub trait AttributeSourceRegistry: Send + Sync {
    /// All sources ordered by id.
    async fn list_sources(&self) -> Result<Vec<AttributeSource>>;

    async fn get_source(&self, id: &SourceId) -> Result<Option<AttributeSource>>;

    /// Validate and insert or replace a source.
    async fn upsert_source(&self, source: AttributeSource) -> Result<AttributeSource>;

    async fn remove_source(&self, id: &SourceId) -> Result<bool>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemorySourceRegistry {
    sources: Arc<RwLock<HashMap<SourceId, AttributeSource>>>,
}

impl InMemorySourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AttributeSourceRegistry for InMemorySourceRegistry {
    async fn list_sources(&self) -> Result<Vec<AttributeSource>> {
        let mut sources: Vec<_> = self.sources.read().await.values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn get_source(&self, id: &SourceId) -> Result<Option<AttributeSource>> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn upsert_source(&self, source: AttributeSource) -> Result<AttributeSource> {
        source.validate()?;
        self.sources
            .write()
            .await
            .insert(source.id.clone(), source.clone());
        Ok(source)
    }

    async fn remove_source(&self, id: &SourceId) -> Result<bool> {
        Ok(self.sources.write().await.remove(id).is_some())
    }
}

// ============================================================================
// Tests
// ============================================================================
