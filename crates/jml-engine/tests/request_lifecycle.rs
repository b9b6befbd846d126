//! Request lifecycle tests: approvals, provisioning retries and cancellation.

mod common;

use jml_engine::request::{LifecycleRequest, TaskOutcome, TaskStatus};
use jml_engine::trigger::{ConditionOperator, TriggerCondition, TriggerOutputSpec, TriggerRule};
use jml_engine::{
    ActionType, Approver, CorrelationId, EngineConfig, EngineError, IdentityId, RequestStatus,
    SourceId,
};
use serde_json::json;

use common::{hire_rule, new_hire, TestContext, HRIS};

async fn draft_joiner(ctx: &TestContext, rule: TriggerRule) -> LifecycleRequest {
    ctx.seed_identity(new_hire("identity-001", "2025-03-17")).await;
    ctx.engine.create_rule(rule).await.unwrap();
    let mut outcome = ctx
        .engine
        .process_attribute_change(
            IdentityId::new("identity-001"),
            "employmentStatus",
            json!("PENDING"),
            json!("ACTIVE"),
            SourceId::new(HRIS),
            CorrelationId::new("corr-lifecycle"),
        )
        .await
        .unwrap();
    outcome.requests.remove(0)
}

/// Draft joiner taken through manager approval into IN_PROGRESS.
async fn running_joiner(ctx: &TestContext) -> LifecycleRequest {
    let draft = draft_joiner(ctx, hire_rule()).await;
    let service = ctx.engine.requests();
    service.submit(draft.id).await.unwrap();
    service
        .approve_step(draft.id, 1, "manager-001", Some("Welcome aboard".into()))
        .await
        .unwrap();
    service.start(draft.id).await.unwrap()
}

fn two_step_rule() -> TriggerRule {
    TriggerRule::new(
        "rule-joiner-two-step",
        "Joiner - Two Step",
        10,
        vec![TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::transition("PENDING", "ACTIVE"),
        )],
        TriggerOutputSpec::new(ActionType::Joiner)
            .with_manager_approval()
            .with_approval_step(1, Approver::Role("hr_partner".into())),
    )
}

// ============================================================================
// Approvals
// ============================================================================

#[tokio::test]
async fn test_steps_are_decided_in_order() {
    let ctx = TestContext::new();
    let draft = draft_joiner(&ctx, two_step_rule()).await;
    assert_eq!(draft.approval_chain.len(), 2);
    assert_eq!(draft.approval_chain[1].approver, Approver::Role("hr_partner".into()));

    let service = ctx.engine.requests();
    service.submit(draft.id).await.unwrap();

    let early = service.approve_step(draft.id, 2, "hr-partner", None).await;
    assert!(matches!(early, Err(EngineError::Validation { .. })));

    let unknown = service.approve_step(draft.id, 9, "hr-partner", None).await;
    assert!(matches!(unknown, Err(EngineError::StepNotFound { step: 9, .. })));

    let after_first = service
        .approve_step(draft.id, 1, "manager-001", None)
        .await
        .unwrap();
    assert_eq!(after_first.status, RequestStatus::PendingApproval);

    let approved = service
        .approve_step(draft.id, 2, "hr-partner", None)
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.approval_chain[1].decided_by.as_deref(), Some("hr-partner"));
}

#[tokio::test]
async fn test_rejection_is_terminal() {
    let ctx = TestContext::new();
    let draft = draft_joiner(&ctx, hire_rule()).await;
    let service = ctx.engine.requests();

    let unsubmitted = service.approve_step(draft.id, 1, "manager-001", None).await;
    assert!(matches!(unsubmitted, Err(EngineError::InvalidTransition { .. })));

    service.submit(draft.id).await.unwrap();
    let rejected = service
        .reject(draft.id, 1, "manager-001", Some("Offer withdrawn".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);

    let resubmit = service.submit(draft.id).await;
    assert!(matches!(
        resubmit,
        Err(EngineError::InvalidTransition {
            from: RequestStatus::Rejected,
            ..
        })
    ));
    let cancel = service.cancel(draft.id, "hr-admin").await;
    assert!(cancel.is_err());
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_failed_task_retried_until_exhausted() {
    let ctx = TestContext::with_config(EngineConfig {
        task_max_retries: 1,
        ..EngineConfig::default()
    });
    let request = running_joiner(&ctx).await;
    let service = ctx.engine.requests();
    let first = request.tasks[0].id;
    let second = request.tasks[1].id;

    service.start_task(request.id, first).await.unwrap();
    let after_failure = service
        .record_task_result(request.id, first, TaskOutcome::Failed("LDAP timeout".into()))
        .await
        .unwrap();
    // Retries remain, so the request keeps running.
    assert_eq!(after_failure.status, RequestStatus::InProgress);

    let (retried, reset) = service.retry_failed_tasks(request.id).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(retried.tasks[0].status, TaskStatus::Pending);
    assert_eq!(retried.tasks[0].retry_count, 1);

    service.start_task(request.id, first).await.unwrap();
    service
        .record_task_result(request.id, first, TaskOutcome::Failed("LDAP timeout".into()))
        .await
        .unwrap();
    let (_, reset) = service.retry_failed_tasks(request.id).await.unwrap();
    assert_eq!(reset, 0);

    service.start_task(request.id, second).await.unwrap();
    let finished = service
        .record_task_result(request.id, second, TaskOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(finished.status, RequestStatus::Failed);
    assert_eq!(finished.tasks[0].last_error.as_deref(), Some("LDAP timeout"));
}

#[tokio::test]
async fn test_cancel_waits_for_running_task() {
    let ctx = TestContext::new();
    let request = running_joiner(&ctx).await;
    let service = ctx.engine.requests();
    let first = request.tasks[0].id;
    let second = request.tasks[1].id;

    service.start_task(request.id, first).await.unwrap();
    let cancelling = service.cancel(request.id, "hr-admin").await.unwrap();
    assert_eq!(cancelling.status, RequestStatus::InProgress);
    assert!(cancelling.cancellation_requested);

    let blocked = service.start_task(request.id, second).await;
    assert!(blocked.is_err());

    let cancelled = service
        .record_task_result(request.id, first, TaskOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(cancelled.tasks[1].status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_requests_listed_by_identity_and_correlation() {
    let ctx = TestContext::new();
    let draft = draft_joiner(&ctx, hire_rule()).await;
    let service = ctx.engine.requests();

    let by_identity = service
        .list_for_identity(&IdentityId::new("identity-001"))
        .await
        .unwrap();
    assert_eq!(by_identity.len(), 1);
    assert_eq!(by_identity[0].id, draft.id);

    let by_correlation = service
        .list_by_correlation(&CorrelationId::new("corr-lifecycle"))
        .await
        .unwrap();
    assert_eq!(by_correlation.len(), 1);

    let missing = service.get(jml_engine::RequestId::new()).await;
    assert!(matches!(missing, Err(EngineError::RequestNotFound(_))));
}
