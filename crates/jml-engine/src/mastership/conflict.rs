//! Mastership conflicts awaiting administrator action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{ConflictId, CorrelationId, IdentityId, SourceId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::types::Severity;

// ============================================================================
// Domain Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// Two or more sources declare EXCLUSIVE_MASTER for the same attribute.
    DuplicateExclusiveMaster,
    /// Candidates tie on the strategy key while reporting different values.
    PrecedenceTie,
    /// Candidates declare different precedence strategies.
    StrategyMismatch,
    /// CUSTOM_RULE strategy with no comparator registered.
    MissingComparator,
}

impl ConflictKind {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            ConflictKind::DuplicateExclusiveMaster => Severity::Critical,
            ConflictKind::PrecedenceTie => Severity::Medium,
            ConflictKind::StrategyMismatch | ConflictKind::MissingComparator => Severity::Low,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::DuplicateExclusiveMaster => write!(f, "DUPLICATE_EXCLUSIVE_MASTER"),
            ConflictKind::PrecedenceTie => write!(f, "PRECEDENCE_TIE"),
            ConflictKind::StrategyMismatch => write!(f, "STRATEGY_MISMATCH"),
            ConflictKind::MissingComparator => write!(f, "MISSING_COMPARATOR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

/// A detected mastership conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetection {
    pub id: ConflictId,
    pub identity_id: IdentityId,
    pub attribute: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    /// Involved sources, sorted.
    pub source_ids: Vec<SourceId>,
    pub status: ConflictStatus,
    pub resolution_note: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub correlation_id: CorrelationId,
}

impl ConflictDetection {
    /// A new open conflict with severity derived from its kind.
    #[must_use]
    pub fn open(
        identity_id: IdentityId,
        attribute: impl Into<String>,
        kind: ConflictKind,
        mut source_ids: Vec<SourceId>,
        correlation_id: CorrelationId,
        detected_at: DateTime<Utc>,
    ) -> Self {
        source_ids.sort();
        source_ids.dedup();
        Self {
            id: ConflictId::new(),
            identity_id,
            attribute: attribute.into(),
            kind,
            severity: kind.severity(),
            source_ids,
            status: ConflictStatus::Open,
            resolution_note: None,
            detected_at,
            resolved_at: None,
            correlation_id,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }

    /// True when `other` reports the same problem.
    fn same_problem(&self, other: &ConflictDetection) -> bool {
        self.identity_id == other.identity_id
            && self.attribute == other.attribute
            && self.kind == other.kind
            && self.source_ids == other.source_ids
    }
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait::async_trait]
pub trait ConflictStore: Send + Sync {
    /// Record a conflict.
    ///
    /// If an open conflict for the same identity, attribute, kind and sources
    /// exists, that record is returned instead of a duplicate.
    async fn record(&self, conflict: ConflictDetection) -> Result<ConflictDetection>;

    /// Open conflicts ordered by detection time.
    async fn list_open(&self) -> Result<Vec<ConflictDetection>>;

    async fn get(&self, id: ConflictId) -> Result<Option<ConflictDetection>>;

    /// Mark a conflict resolved. Resolving twice is a validation error.
    async fn resolve(
        &self,
        id: ConflictId,
        note: String,
        resolved_at: DateTime<Utc>,
    ) -> Result<ConflictDetection>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryConflictStore {
    conflicts: Arc<RwLock<HashMap<ConflictId, ConflictDetection>>>,
}

impl InMemoryConflictStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.conflicts.read().await.len()
    }
}

#[async_trait::async_trait]
impl ConflictStore for InMemoryConflictStore {
    async fn record(&self, conflict: ConflictDetection) -> Result<ConflictDetection> {
        let mut conflicts = self.conflicts.write().await;
        if let Some(existing) = conflicts
            .values()
            .find(|c| c.is_open() && c.same_problem(&conflict))
        {
            return Ok(existing.clone());
        }
        conflicts.insert(conflict.id, conflict.clone());
        Ok(conflict)
    }

    async fn list_open(&self) -> Result<Vec<ConflictDetection>> {
        let mut open: Vec<_> = self
            .conflicts
            .read()
            .await
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(open)
    }

    async fn get(&self, id: ConflictId) -> Result<Option<ConflictDetection>> {
        Ok(self.conflicts.read().await.get(&id).cloned())
    }

    async fn resolve(
        &self,
        id: ConflictId,
        note: String,
        resolved_at: DateTime<Utc>,
    ) -> Result<ConflictDetection> {
        let mut conflicts = self.conflicts.write().await;
        let conflict = conflicts
            .get_mut(&id)
            .ok_or(EngineError::ConflictNotFound(id))?;
        if !conflict.is_open() {
            return Err(EngineError::validation(
                "status",
                format!("conflict {id} is already resolved"),
            ));
        }
        conflict.status = ConflictStatus::Resolved;
        conflict.resolution_note = Some(note);
        conflict.resolved_at = Some(resolved_at);
        Ok(conflict.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
