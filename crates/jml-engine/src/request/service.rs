//! Lifecycle request storage and the request operations service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{CorrelationId, IdentityId, RequestId, TaskId};
use tokio::sync::RwLock;
use tracing::instrument;

use super::model::{LifecycleRequest, TaskOutcome};
use crate::audit::{AuditStore, JmlAuditAction, JmlAuditEventInput};
use crate::clock::Clock;
use crate::error::{EngineError, Result};

/// Mutation applied by [`RequestStore::modify`].
pub type RequestMutation = Box<dyn FnOnce(&mut LifecycleRequest) -> Result<()> + Send>;

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for lifecycle request storage backends.
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: LifecycleRequest) -> Result<LifecycleRequest>;

    async fn get(&self, id: RequestId) -> Result<Option<LifecycleRequest>>;

    /// Requests for an identity, oldest first.
    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<LifecycleRequest>>;

    /// Requests descending from one delta, oldest first.
    async fn list_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<LifecycleRequest>>;

    /// Apply `mutation` atomically. The stored request changes only when the
    /// mutation succeeds.
    async fn modify(&self, id: RequestId, mutation: RequestMutation) -> Result<LifecycleRequest>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory lifecycle request store.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: Arc<RwLock<HashMap<RequestId, LifecycleRequest>>>,
}

impl InMemoryRequestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.requests.read().await.len()
    }

    async fn filtered<F>(&self, keep: F) -> Vec<LifecycleRequest>
    where
        F: Fn(&LifecycleRequest) -> bool + Send,
    {
        let mut found: Vec<_> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }
}

#[async_trait::async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: LifecycleRequest) -> Result<LifecycleRequest> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists {
                resource: "LifecycleRequest",
                id: request.id.to_string(),
            });
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: RequestId) -> Result<Option<LifecycleRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<LifecycleRequest>> {
        Ok(self.filtered(|r| &r.identity_id == identity_id).await)
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<LifecycleRequest>> {
        Ok(self.filtered(|r| &r.correlation_id == correlation_id).await)
    }

    async fn modify(&self, id: RequestId, mutation: RequestMutation) -> Result<LifecycleRequest> {
        let mut requests = self.requests.write().await;
        let stored = requests
            .get_mut(&id)
            .ok_or(EngineError::RequestNotFound(id))?;
        let mut draft = stored.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Request operations with audit recording.
///
/// Every successful operation records a `request_transitioned` event carrying
/// the request's correlation id and its status before and after.
pub struct LifecycleRequestService {
    store: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl LifecycleRequestService {
    pub fn new(
        store: Arc<dyn RequestStore>,
        audit: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Store a newly assembled request.
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    pub async fn create(&self, request: LifecycleRequest) -> Result<LifecycleRequest> {
        let request = self.store.insert(request).await?;
        self.audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::RequestCreated,
                identity_id: Some(request.identity_id.clone()),
                correlation_id: Some(request.correlation_id.clone()),
                subject_id: Some(request.id.to_string()),
                after_state: Some(serde_json::to_value(&request).unwrap_or_default()),
                metadata: Some(serde_json::json!({
                    "rule_id": request.rule_id.to_string(),
                    "action_type": request.action_type,
                    "status": request.status,
                })),
                ..Default::default()
            })
            .await?;
        tracing::info!(status = %request.status, "Lifecycle request created");
        Ok(request)
    }

    pub async fn get(&self, id: RequestId) -> Result<LifecycleRequest> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::RequestNotFound(id))
    }

    pub async fn list_for_identity(
        &self,
        identity_id: &IdentityId,
    ) -> Result<Vec<LifecycleRequest>> {
        self.store.list_for_identity(identity_id).await
    }

    pub async fn list_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Vec<LifecycleRequest>> {
        self.store.list_by_correlation(correlation_id).await
    }

    async fn apply<F>(
        &self,
        id: RequestId,
        operation: &'static str,
        actor: Option<&str>,
        mutation: F,
    ) -> Result<LifecycleRequest>
    where
        F: FnOnce(&mut LifecycleRequest, DateTime<Utc>) -> Result<()> + Send + 'static,
    {
        let now = self.clock.now();
        let before = self.get(id).await?.status;
        let updated = self
            .store
            .modify(id, Box::new(move |request| mutation(request, now)))
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    request_id = %id,
                    operation,
                    error = %e,
                    "Request operation refused"
                );
            })?;

        self.audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::RequestTransitioned,
                identity_id: Some(updated.identity_id.clone()),
                correlation_id: Some(updated.correlation_id.clone()),
                subject_id: Some(id.to_string()),
                actor: actor.map(str::to_string),
                before_state: Some(serde_json::json!({ "status": before })),
                after_state: Some(serde_json::json!({ "status": updated.status })),
                metadata: Some(serde_json::json!({ "operation": operation })),
            })
            .await?;
        tracing::debug!(
            request_id = %id,
            operation,
            from = %before,
            to = %updated.status,
            "Request operation applied"
        );
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn submit(&self, id: RequestId) -> Result<LifecycleRequest> {
        self.apply(id, "submit", None, |r, now| r.submit(now)).await
    }

    #[instrument(skip(self, comment))]
    pub async fn approve_step(
        &self,
        id: RequestId,
        step: u32,
        actor: &str,
        comment: Option<String>,
    ) -> Result<LifecycleRequest> {
        let who = actor.to_string();
        self.apply(id, "approve_step", Some(actor), move |r, now| {
            r.approve_step(step, &who, comment, now)
        })
        .await
    }

    #[instrument(skip(self, comment))]
    pub async fn reject(
        &self,
        id: RequestId,
        step: u32,
        actor: &str,
        comment: Option<String>,
    ) -> Result<LifecycleRequest> {
        let who = actor.to_string();
        self.apply(id, "reject", Some(actor), move |r, now| {
            r.reject(step, &who, comment, now)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn start(&self, id: RequestId) -> Result<LifecycleRequest> {
        self.apply(id, "start", None, |r, now| r.start(now)).await
    }

    #[instrument(skip(self))]
    pub async fn start_task(&self, id: RequestId, task_id: TaskId) -> Result<LifecycleRequest> {
        self.apply(id, "start_task", None, move |r, now| {
            r.start_task(task_id, now)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn record_task_result(
        &self,
        id: RequestId,
        task_id: TaskId,
        outcome: TaskOutcome,
    ) -> Result<LifecycleRequest> {
        self.apply(id, "record_task_result", None, move |r, now| {
            r.record_task_result(task_id, outcome, now)
        })
        .await
    }

    /// Reset retryable failed tasks. Returns the request and the number of
    /// tasks reset; repeating the call with nothing failed changes nothing.
    #[instrument(skip(self))]
    pub async fn retry_failed_tasks(&self, id: RequestId) -> Result<(LifecycleRequest, usize)> {
        let reset = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&reset);
        let request = self
            .apply(id, "retry_failed_tasks", None, move |r, now| {
                let n = r.retry_failed_tasks(now)?;
                counter.store(n, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await?;
        Ok((request, reset.load(std::sync::atomic::Ordering::SeqCst)))
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: RequestId, actor: &str) -> Result<LifecycleRequest> {
        self.apply(id, "cancel", Some(actor), |r, now| r.cancel(now))
            .await
    }
}
