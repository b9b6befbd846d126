//! Concurrency tests: shared engine state under parallel deltas and decisions.

mod common;

use std::sync::Arc;

use chrono::Duration;
use jml_engine::audit::{AuditEventFilter, AuditStore, JmlAuditAction};
use jml_engine::mastership::{AttributeMastershipDeclaration, AttributeSource, MastershipKind};
use jml_engine::{
    AttributeDelta, CorrelationId, EngineError, IdentityId, RequestStatus, RuleId, SourceId,
};
use serde_json::json;

use common::{friday_afternoon, hire_rule, new_hire, TestContext, HRIS};

const IDENTITIES: usize = 50;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deltas_count_every_firing() {
    let ctx = Arc::new(TestContext::new());
    ctx.engine.create_rule(hire_rule()).await.unwrap();
    for i in 0..IDENTITIES {
        ctx.seed_identity(new_hire(&format!("identity-{i:03}"), "2025-03-17"))
            .await;
    }

    let handles: Vec<_> = (0..IDENTITIES)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.engine
                    .evaluate_attribute_change(
                        IdentityId::new(format!("identity-{i:03}")),
                        "employmentStatus",
                        json!("PENDING"),
                        json!("ACTIVE"),
                        SourceId::new(HRIS),
                        CorrelationId::new(format!("corr-{i}")),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        let evaluation = handle.await.unwrap().unwrap();
        assert_eq!(evaluation.evaluation.triggered.len(), 1);
    }

    let metrics = ctx
        .engine
        .rule_metrics(&RuleId::new("rule-joiner-hire"))
        .unwrap();
    assert_eq!(metrics.trigger_count, IDENTITIES as u64);

    let triggered = ctx
        .audit
        .query_events(AuditEventFilter {
            action: Some(JmlAuditAction::RuleTriggered),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(triggered.len(), IDENTITIES);
}

#[tokio::test]
async fn test_out_of_order_delta_rejected() {
    let ctx = TestContext::new();
    let at = friday_afternoon();
    let delta = |timestamp| {
        AttributeDelta::new(
            IdentityId::new("identity-001"),
            "department",
            json!("Engineering"),
            json!("Sales"),
            SourceId::new(HRIS),
            CorrelationId::new("corr-order"),
            timestamp,
        )
    };

    ctx.engine.evaluate_delta(delta(at)).await.unwrap();

    let earlier = ctx.engine.evaluate_delta(delta(at - Duration::minutes(5))).await;
    assert!(matches!(earlier, Err(EngineError::OutOfOrderDelta { .. })));

    let same = ctx.engine.evaluate_delta(delta(at)).await;
    assert!(matches!(same, Err(EngineError::OutOfOrderDelta { .. })));

    ctx.engine
        .evaluate_delta(delta(at + Duration::seconds(1)))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_approvals_have_one_winner() {
    let ctx = Arc::new(TestContext::new());
    ctx.seed_identity(new_hire("identity-001", "2025-03-17")).await;
    ctx.engine.create_rule(hire_rule()).await.unwrap();
    let outcome = ctx
        .engine
        .process_attribute_change(
            IdentityId::new("identity-001"),
            "employmentStatus",
            json!("PENDING"),
            json!("ACTIVE"),
            SourceId::new(HRIS),
            CorrelationId::new("corr-approve"),
        )
        .await
        .unwrap();
    let id = outcome.requests[0].id;
    ctx.engine.requests().submit(id).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.engine
                    .requests()
                    .approve_step(id, 1, &format!("manager-{n}"), None)
                    .await
            })
        })
        .collect();

    let mut approved = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            approved += 1;
        }
    }
    assert_eq!(approved, 1);

    let request = ctx.engine.requests().get(id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_resolutions_record_one_conflict() {
    let ctx = Arc::new(TestContext::new());
    for (id, name) in [("isr-hris", "HR system"), ("isr-payroll", "Payroll")] {
        ctx.engine
            .stores()
            .sources
            .upsert_source(AttributeSource::new(id, name).with_declaration(
                AttributeMastershipDeclaration::new(
                    "costCenter",
                    MastershipKind::ExclusiveMaster,
                    1,
                ),
            ))
            .await
            .unwrap();
    }
    ctx.report("identity-001", "costCenter", "isr-hris", json!("CC-100"))
        .await;
    ctx.report("identity-001", "costCenter", "isr-payroll", json!("CC-200"))
        .await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.engine
                    .resolve_mastership(
                        &IdentityId::new("identity-001"),
                        "costCenter",
                        &CorrelationId::new("corr-conflict"),
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        let resolution = handle.await.unwrap().unwrap();
        assert_eq!(resolution.conflicts.len(), 1);
    }

    let open = ctx.engine.list_open_conflicts().await.unwrap();
    assert_eq!(open.len(), 1);

    let detected = ctx
        .audit
        .query_events(AuditEventFilter {
            action: Some(JmlAuditAction::ConflictDetected),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(detected.len(), 1);

    ctx.engine
        .resolve_conflict(open[0].id, "Payroll decommissioned for costCenter", "iam-admin")
        .await
        .unwrap();
    assert!(ctx.engine.list_open_conflicts().await.unwrap().is_empty());
}
