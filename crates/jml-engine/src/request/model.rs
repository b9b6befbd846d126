//! Lifecycle request model and state machine.
//!
//! ```text
//! DRAFT ──► PENDING_APPROVAL ──► APPROVED ──► IN_PROGRESS ──► COMPLETED
//!                 │                                 │
//!                 └──► REJECTED                     └──► FAILED
//!
//! any non-terminal status ──► CANCELLED
//! ```
//!
//! Cancelling an `IN_PROGRESS` request is cooperative: it sets
//! `cancellation_requested`, no further task may start, and the request
//! becomes `CANCELLED` once no task is running.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use jml_core::{Correlated, CorrelationId, IdentityId, RequestId, RuleId, TaskId};
use serde::{Deserialize, Serialize};

use crate::access_plan::AccessPlan;
use crate::error::{EngineError, Result};
use crate::policy::SodViolation;
use crate::risk::RiskScore;
use crate::types::{ActionType, Approver};

// ============================================================================
// Status
// ============================================================================

/// Aggregate status of a lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    /// Check if a transition from this status to another is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: &Self) -> bool {
        match (self, target) {
            (Self::Draft, Self::PendingApproval) => true,
            (Self::PendingApproval, Self::Approved | Self::Rejected) => true,
            (Self::Approved, Self::InProgress) => true,
            (Self::InProgress, Self::Completed | Self::Failed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "DRAFT",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One step of a request's approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// 1-based position in the chain.
    pub step: u32,
    pub approver: Approver,
    pub status: ApprovalStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl ApprovalStep {
    #[must_use]
    pub fn pending(step: u32, approver: Approver) -> Self {
        Self {
            step,
            approver,
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            comment: None,
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Provisioning work handed to the connector layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    CreateAccounts,
    AssignBirthrightRoles,
    UpdateAccess,
    DisableAccounts,
    RevokeAllAccess,
}

impl TaskKind {
    /// Tasks generated for an action, in execution order.
    #[must_use]
    pub fn for_action(action: ActionType) -> Vec<Self> {
        match action {
            ActionType::Joiner => vec![Self::CreateAccounts, Self::AssignBirthrightRoles],
            ActionType::Mover => vec![Self::UpdateAccess],
            ActionType::Leaver => vec![Self::DisableAccounts, Self::RevokeAllAccess],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl ProvisioningTask {
    #[must_use]
    pub fn new(kind: TaskKind, max_retries: u32) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    /// Failed with no retries left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count >= self.max_retries
    }

    /// Completed, or failed for good.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.status == TaskStatus::Completed || self.is_exhausted()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::InProgress
    }
}

// ============================================================================
// Change Set
// ============================================================================

/// Grants and revocations a request carries, derived from an access plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub grant_roles: BTreeSet<String>,
    pub revoke_roles: BTreeSet<String>,
    pub grant_entitlements: BTreeSet<String>,
    pub revoke_entitlements: BTreeSet<String>,
}

impl From<&AccessPlan> for ChangeSet {
    fn from(plan: &AccessPlan) -> Self {
        Self {
            grant_roles: plan.added_roles.clone(),
            revoke_roles: plan.removed_roles.clone(),
            grant_entitlements: plan.added_entitlements.clone(),
            revoke_entitlements: plan.removed_entitlements.clone(),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Outcome reported by the connector layer for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

/// A joiner, mover or leaver request assembled from a triggered rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRequest {
    pub id: RequestId,
    pub rule_id: RuleId,
    pub action_type: ActionType,
    pub identity_id: IdentityId,
    pub status: RequestStatus,
    pub effective_date: DateTime<Utc>,
    pub risk_score: RiskScore,
    pub approval_chain: Vec<ApprovalStep>,
    pub tasks: Vec<ProvisioningTask>,
    pub change_set: ChangeSet,
    pub sod_violations: Vec<SodViolation>,
    /// Why birthright policies granted or withheld access.
    #[serde(default)]
    pub birthright_reasoning: Vec<String>,
    pub notes: Option<String>,
    pub correlation_id: CorrelationId,
    pub cancellation_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Correlated for LifecycleRequest {
    fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

impl LifecycleRequest {
    fn transition(&mut self, to: RequestStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(&to) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    fn require_status(&self, expected: RequestStatus, to: RequestStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// Number of manager steps in the chain.
    #[must_use]
    pub fn manager_steps(&self) -> usize {
        self.approval_chain
            .iter()
            .filter(|s| s.approver == Approver::Manager)
            .count()
    }

    /// First undecided step.
    #[must_use]
    pub fn next_pending_step(&self) -> Option<&ApprovalStep> {
        self.approval_chain
            .iter()
            .find(|s| s.status == ApprovalStatus::Pending)
    }

    /// DRAFT → PENDING_APPROVAL.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::PendingApproval, now)
    }

    /// Index of `step`, which must be the next one to decide.
    fn decidable_step(&self, step: u32) -> Result<usize> {
        let index = self
            .approval_chain
            .iter()
            .position(|s| s.step == step)
            .ok_or(EngineError::StepNotFound {
                request_id: self.id,
                step,
            })?;
        match self.next_pending_step() {
            Some(next) if next.step == step => Ok(index),
            _ => Err(EngineError::validation(
                "step",
                format!("Approval step {step} is not the next step to decide"),
            )),
        }
    }

    fn decide(
        &mut self,
        index: usize,
        status: ApprovalStatus,
        actor: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(step) = self.approval_chain.get_mut(index) {
            step.status = status;
            step.decided_by = Some(actor.to_string());
            step.decided_at = Some(now);
            step.comment = comment;
        }
    }

    /// Approve `step`. Steps are decided in order; approving the last one
    /// moves the request to `APPROVED`. A request with no steps is approved
    /// directly.
    pub fn approve_step(
        &mut self,
        step: u32,
        actor: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_status(RequestStatus::PendingApproval, RequestStatus::Approved)?;
        if self.approval_chain.is_empty() {
            return self.transition(RequestStatus::Approved, now);
        }
        let index = self.decidable_step(step)?;
        self.decide(index, ApprovalStatus::Approved, actor, comment, now);
        self.updated_at = now;
        if self.next_pending_step().is_none() {
            self.transition(RequestStatus::Approved, now)?;
        }
        Ok(())
    }

    /// Reject `step`, which rejects the whole request.
    pub fn reject(
        &mut self,
        step: u32,
        actor: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_status(RequestStatus::PendingApproval, RequestStatus::Rejected)?;
        if !self.approval_chain.is_empty() {
            let index = self.decidable_step(step)?;
            self.decide(index, ApprovalStatus::Rejected, actor, comment, now);
        }
        self.transition(RequestStatus::Rejected, now)
    }

    /// APPROVED → IN_PROGRESS.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(RequestStatus::InProgress, now)
    }

    fn task_index(&self, task_id: TaskId) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(EngineError::TaskNotFound(task_id))
    }

    fn require_in_progress(&self) -> Result<()> {
        if self.status == RequestStatus::InProgress {
            Ok(())
        } else {
            Err(EngineError::validation(
                "status",
                format!("Request is {}, not IN_PROGRESS", self.status),
            ))
        }
    }

    /// Mark a pending task as running.
    pub fn start_task(&mut self, task_id: TaskId, now: DateTime<Utc>) -> Result<()> {
        self.require_in_progress()?;
        if self.cancellation_requested {
            return Err(EngineError::validation(
                "cancellation_requested",
                "Cancellation requested; no further tasks may start",
            ));
        }
        let index = self.task_index(task_id)?;
        let task = &mut self.tasks[index];
        if task.status != TaskStatus::Pending {
            return Err(EngineError::validation(
                "task",
                format!("Task {task_id} is not pending"),
            ));
        }
        task.status = TaskStatus::InProgress;
        self.updated_at = now;
        Ok(())
    }

    /// Record a task outcome and settle the aggregate status.
    pub fn record_task_result(
        &mut self,
        task_id: TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_in_progress()?;
        let index = self.task_index(task_id)?;
        let task = &mut self.tasks[index];
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
            return Err(EngineError::validation(
                "task",
                format!("Task {task_id} already has a result"),
            ));
        }
        match outcome {
            TaskOutcome::Succeeded => {
                task.status = TaskStatus::Completed;
                task.last_error = None;
            }
            TaskOutcome::Failed(error) => {
                task.status = TaskStatus::Failed;
                task.last_error = Some(error);
            }
        }
        self.updated_at = now;
        self.settle(now)
    }

    /// Reset every failed task with retries left to pending. Returns how many
    /// were reset; zero when nothing is retryable.
    pub fn retry_failed_tasks(&mut self, now: DateTime<Utc>) -> Result<usize> {
        self.require_in_progress()?;
        if self.cancellation_requested {
            return Ok(0);
        }
        let mut reset = 0;
        for task in &mut self.tasks {
            if task.status == TaskStatus::Failed && task.retry_count < task.max_retries {
                task.status = TaskStatus::Pending;
                task.retry_count += 1;
                reset += 1;
            }
        }
        if reset > 0 {
            self.updated_at = now;
        }
        Ok(reset)
    }

    /// Cancel the request. Immediate before `IN_PROGRESS`; afterwards the
    /// request is cancelled once no task is running.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != RequestStatus::InProgress {
            return self.transition(RequestStatus::Cancelled, now);
        }
        self.cancellation_requested = true;
        self.updated_at = now;
        self.settle(now)
    }

    fn settle(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != RequestStatus::InProgress {
            return Ok(());
        }
        if self.cancellation_requested {
            if !self.tasks.iter().any(ProvisioningTask::is_running) {
                self.transition(RequestStatus::Cancelled, now)?;
            }
            return Ok(());
        }
        if self.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            self.transition(RequestStatus::Completed, now)?;
        } else if self.tasks.iter().all(ProvisioningTask::is_resolved) {
            self.transition(RequestStatus::Failed, now)?;
        }
        Ok(())
    }
}
