//! Audit recording for lifecycle decisions.
//!
//! Every resolution, rule firing, conflict and request transition is recorded
//! as an immutable [`JmlAuditEvent`] carrying the correlation key of the delta
//! that caused it. Delivery to an external audit log is out of scope; the
//! store only records.
//!
//! # Example
//!
//! ```rust,ignore
//! use jml_engine::audit::{AuditStore, InMemoryAuditStore, JmlAuditAction, JmlAuditEventInput};
//! use jml_core::CorrelationId;
//!
//! let store = InMemoryAuditStore::new();
//! let event = store
//!     .log_event(JmlAuditEventInput {
//!         action: JmlAuditAction::RuleTriggered,
//!         correlation_id: Some(CorrelationId::new("corr-1")),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{CorrelationId, IdentityId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JmlAuditAction {
    /// A delta was appended to the delta log.
    #[default]
    DeltaIngested,
    /// Mastership for an attribute was resolved.
    MastershipResolved,
    /// A mastership conflict was detected.
    ConflictDetected,
    /// An administrator resolved a mastership conflict.
    ConflictResolved,
    /// A trigger rule was created.
    RuleCreated,
    /// A trigger rule was updated.
    RuleUpdated,
    /// A trigger rule fired.
    RuleTriggered,
    /// A lifecycle request was assembled.
    RequestCreated,
    /// A lifecycle request changed status, step or task state.
    RequestTransitioned,
}

impl std::fmt::Display for JmlAuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeltaIngested => write!(f, "delta_ingested"),
            Self::MastershipResolved => write!(f, "mastership_resolved"),
            Self::ConflictDetected => write!(f, "conflict_detected"),
            Self::ConflictResolved => write!(f, "conflict_resolved"),
            Self::RuleCreated => write!(f, "rule_created"),
            Self::RuleUpdated => write!(f, "rule_updated"),
            Self::RuleTriggered => write!(f, "rule_triggered"),
            Self::RequestCreated => write!(f, "request_created"),
            Self::RequestTransitioned => write!(f, "request_transitioned"),
        }
    }
}

/// A recorded audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JmlAuditEvent {
    pub id: Uuid,
    /// Monotonic insertion sequence within the store.
    pub sequence: u64,
    pub action: JmlAuditAction,
    /// Identity the event concerns, if any.
    pub identity_id: Option<IdentityId>,
    /// Upstream correlation key, if the event descends from a delta.
    pub correlation_id: Option<CorrelationId>,
    /// Id of the artifact acted on (rule id, request id, conflict id...).
    pub subject_id: Option<String>,
    /// Administrator or approver who acted, when not the engine itself.
    pub actor: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for recording an audit event.
#[derive(Debug, Clone, Default)]
pub struct JmlAuditEventInput {
    pub action: JmlAuditAction,
    pub identity_id: Option<IdentityId>,
    pub correlation_id: Option<CorrelationId>,
    pub subject_id: Option<String>,
    pub actor: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditEventFilter {
    pub action: Option<JmlAuditAction>,
    pub identity_id: Option<IdentityId>,
    pub correlation_id: Option<CorrelationId>,
    pub subject_id: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Trait for audit event storage backends.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Record an audit event.
    async fn log_event(&self, input: JmlAuditEventInput) -> Result<JmlAuditEvent>;

    /// Query audit events, oldest first.
    async fn query_events(&self, filter: AuditEventFilter) -> Result<Vec<JmlAuditEvent>>;

    /// Get a specific audit event by ID.
    async fn get_event(&self, event_id: Uuid) -> Result<Option<JmlAuditEvent>>;
}

#[derive(Debug, Default)]
struct AuditLog {
    next_sequence: u64,
    events: HashMap<Uuid, JmlAuditEvent>,
}

/// In-memory audit store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    log: Arc<RwLock<AuditLog>>,
}

impl InMemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events.
    pub async fn count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Drop all events (for testing).
    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        log.events.clear();
        log.next_sequence = 0;
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn log_event(&self, input: JmlAuditEventInput) -> Result<JmlAuditEvent> {
        let mut log = self.log.write().await;
        log.next_sequence += 1;
        let event = JmlAuditEvent {
            id: Uuid::new_v4(),
            sequence: log.next_sequence,
            action: input.action,
            identity_id: input.identity_id,
            correlation_id: input.correlation_id,
            subject_id: input.subject_id,
            actor: input.actor,
            before_state: input.before_state,
            after_state: input.after_state,
            timestamp: Utc::now(),
            metadata: input.metadata,
        };
        log.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn query_events(&self, filter: AuditEventFilter) -> Result<Vec<JmlAuditEvent>> {
        let log = self.log.read().await;
        let mut results: Vec<_> = log
            .events
            .values()
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .filter(|e| {
                filter
                    .identity_id
                    .as_ref()
                    .is_none_or(|id| e.identity_id.as_ref() == Some(id))
            })
            .filter(|e| {
                filter
                    .correlation_id
                    .as_ref()
                    .is_none_or(|id| e.correlation_id.as_ref() == Some(id))
            })
            .filter(|e| {
                filter
                    .subject_id
                    .as_ref()
                    .is_none_or(|id| e.subject_id.as_ref() == Some(id))
            })
            .filter(|e| filter.from_date.is_none_or(|d| e.timestamp >= d))
            .filter(|e| filter.to_date.is_none_or(|d| e.timestamp <= d))
            .cloned()
            .collect();

        results.sort_by_key(|e| e.sequence);

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<JmlAuditEvent>> {
        Ok(self.log.read().await.events.get(&event_id).cloned())
    }
}
