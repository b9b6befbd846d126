//! Attribute deltas and the append-only delta log.
//!
//! Deltas for one identity must be applied in strictly increasing timestamp
//! order. The log is the single place that enforces it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{Correlated, CorrelationId, DeltaId, IdentityId, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};

/// One attribute change reported by a system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDelta {
    pub id: DeltaId,
    pub identity_id: IdentityId,
    pub attribute: String,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
    pub source_id: SourceId,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

impl AttributeDelta {
    #[must_use]
    pub fn new(
        identity_id: IdentityId,
        attribute: impl Into<String>,
        before: Value,
        after: Value,
        source_id: SourceId,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeltaId::new(),
            identity_id,
            attribute: attribute.into(),
            before,
            after,
            source_id,
            timestamp,
            correlation_id,
        }
    }

    /// Copy of this delta carrying a different after-value.
    #[must_use]
    pub fn with_after(&self, after: Value) -> Self {
        Self {
            after,
            ..self.clone()
        }
    }
}

impl Correlated for AttributeDelta {
    fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

/// Append-only, per-identity ordered delta storage.
#[async_trait::async_trait]
pub trait DeltaLog: Send + Sync {
    /// Append a delta.
    ///
    /// Fails with `OutOfOrderDelta` if its timestamp is not strictly after the
    /// last delta appended for the same identity.
    async fn append(&self, delta: AttributeDelta) -> Result<AttributeDelta>;

    /// All deltas for an identity in append order.
    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<AttributeDelta>>;

    /// Timestamp of the last delta appended for an identity.
    async fn last_timestamp(&self, identity_id: &IdentityId) -> Result<Option<DateTime<Utc>>>;
}

/// In-memory delta log.
#[derive(Debug, Default)]
pub struct InMemoryDeltaLog {
    entries: Arc<RwLock<HashMap<IdentityId, Vec<AttributeDelta>>>>,
}

impl InMemoryDeltaLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total deltas across all identities.
    pub async fn count(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl DeltaLog for InMemoryDeltaLog {
    async fn append(&self, delta: AttributeDelta) -> Result<AttributeDelta> {
        let mut entries = self.entries.write().await;
        let log = entries.entry(delta.identity_id.clone()).or_default();
        if let Some(last) = log.last() {
            if delta.timestamp <= last.timestamp {
                return Err(EngineError::OutOfOrderDelta {
                    identity_id: delta.identity_id.clone(),
                    last: last.timestamp,
                    received: delta.timestamp,
                });
            }
        }
        log.push(delta.clone());
        Ok(delta)
    }

    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<AttributeDelta>> {
        Ok(self
            .entries
            .read()
            .await
            .get(identity_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_timestamp(&self, identity_id: &IdentityId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .entries
            .read()
            .await
            .get(identity_id)
            .and_then(|log| log.last())
            .map(|d| d.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn delta(identity: &str, at: DateTime<Utc>) -> AttributeDelta {
        AttributeDelta::new(
            IdentityId::new(identity),
            "department",
            json!("Sales"),
            json!("Engineering"),
            SourceId::new("isr-hris"),
            CorrelationId::new("corr-1"),
            at,
        )
    }

    #[tokio::test]
    async fn test_append_in_order() {
        let log = InMemoryDeltaLog::new();
        let t0 = Utc::now();
        log.append(delta("identity-001", t0)).await.unwrap();
        log.append(delta("identity-001", t0 + Duration::seconds(1)))
            .await
            .unwrap();

        let entries = log
            .list_for_identity(&IdentityId::new("identity-001"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            log.last_timestamp(&IdentityId::new("identity-001"))
                .await
                .unwrap(),
            Some(t0 + Duration::seconds(1))
        );
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_and_equal_timestamps() {
        let log = InMemoryDeltaLog::new();
        let t0 = Utc::now();
        log.append(delta("identity-001", t0)).await.unwrap();

        let equal = log.append(delta("identity-001", t0)).await;
        assert!(matches!(equal, Err(EngineError::OutOfOrderDelta { .. })));

        let earlier = log
            .append(delta("identity-001", t0 - Duration::seconds(1)))
            .await;
        assert!(matches!(earlier, Err(EngineError::OutOfOrderDelta { .. })));
        assert_eq!(log.count().await, 1);
    }

    #[tokio::test]
    async fn test_identities_are_ordered_independently() {
        let log = InMemoryDeltaLog::new();
        let t0 = Utc::now();
        log.append(delta("identity-001", t0)).await.unwrap();
        log.append(delta("identity-002", t0 - Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(log.count().await, 2);
    }
}
