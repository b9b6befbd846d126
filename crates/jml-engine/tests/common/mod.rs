//! Common test utilities for jml-engine integration tests.
//!
//! Every test builds its own engine over fresh in-memory stores and a fixed
//! clock, so tests are isolated and deterministic.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use jml_engine::audit::InMemoryAuditStore;
use jml_engine::clock::{Clock, FixedClock};
use jml_engine::engine::{EngineStores, LifecycleEngine};
use jml_engine::identity::{IdentitySnapshot, InMemoryIdentityDirectory, SourceValue};
use jml_engine::mastership::{AttributeMastershipDeclaration, AttributeSource, MastershipKind};
use jml_engine::policy::{
    BirthrightAction, BirthrightCondition, BirthrightOperator, BirthrightPolicy,
};
use jml_engine::trigger::{
    ConditionOperator, EffectiveDatePolicy, TriggerCondition, TriggerOutputSpec, TriggerRule,
};
use jml_engine::{ActionType, EngineConfig, IdentityId, SourceId};
use serde_json::Value;

pub const HRIS: &str = "isr-hris";
pub const DIRECTORY: &str = "isr-ad";

/// Route engine logs to the test harness; `RUST_LOG` narrows them.
pub fn init_test_logging() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "jml_engine=debug".to_string());
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// Friday 2025-03-07 15:30 UTC.
pub fn friday_afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 7, 15, 30, 0).unwrap()
}

/// An engine with handles to the stores tests inspect directly.
pub struct TestContext {
    pub engine: LifecycleEngine,
    pub directory: Arc<InMemoryIdentityDirectory>,
    pub audit: Arc<InMemoryAuditStore>,
    pub clock: Arc<FixedClock>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_test_logging();
        let directory = Arc::new(InMemoryIdentityDirectory::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(FixedClock::new(friday_afternoon()));
        let stores = EngineStores {
            directory: directory.clone(),
            audit: audit.clone(),
            ..EngineStores::in_memory()
        };
        let engine = LifecycleEngine::new(stores, config)
            .expect("default config is valid")
            .with_clock(clock.clone());
        Self {
            engine,
            directory,
            audit,
            clock,
        }
    }

    /// Register the HRIS as exclusive master and the directory as a fallback
    /// for `attribute`.
    pub async fn register_sources(&self, attribute: &str) {
        let sources = &self.engine.stores().sources;
        sources
            .upsert_source(AttributeSource::new(HRIS, "HR system").with_declaration(
                AttributeMastershipDeclaration::new(attribute, MastershipKind::ExclusiveMaster, 1),
            ))
            .await
            .expect("valid source");
        sources
            .upsert_source(AttributeSource::new(DIRECTORY, "Directory").with_declaration(
                AttributeMastershipDeclaration::new(attribute, MastershipKind::Fallback, 5),
            ))
            .await
            .expect("valid source");
    }

    pub async fn seed_identity(&self, identity: IdentitySnapshot) {
        self.directory.upsert_identity(identity).await;
    }

    pub async fn report(&self, identity: &str, attribute: &str, source: &str, value: Value) {
        self.directory
            .record_source_value(
                &IdentityId::new(identity),
                attribute,
                SourceValue {
                    source_id: SourceId::new(source),
                    value,
                    written_at: self.clock.now(),
                },
            )
            .await;
    }
}

/// A pending hire whose start date is `start_date`, reporting to `manager-001`.
pub fn new_hire(id: &str, start_date: &str) -> IdentitySnapshot {
    IdentitySnapshot::new(IdentityId::new(id))
        .with_attribute("employmentStatus", "PENDING")
        .with_attribute("startDate", start_date)
        .with_attribute("department", "Engineering")
        .with_attribute("employeeType", "EMPLOYEE")
        .with_manager(IdentityId::new("manager-001"))
}

/// "Joiner - Employee Hire": PENDING → ACTIVE with a start date in the next
/// 14 days, approved by the manager.
pub fn hire_rule() -> TriggerRule {
    TriggerRule::new(
        "rule-joiner-hire",
        "Joiner - Employee Hire",
        10,
        vec![
            TriggerCondition::new(
                "employmentStatus",
                ConditionOperator::transition("PENDING", "ACTIVE"),
            ),
            TriggerCondition::new("startDate", ConditionOperator::WithinWindow { days: 14 }),
        ],
        TriggerOutputSpec::new(ActionType::Joiner)
            .with_effective_date(EffectiveDatePolicy::FromAttribute {
                attribute: "startDate".into(),
            })
            .with_manager_approval(),
    )
}

/// "Leaver - Termination": ACTIVE → TERMINATED, auto-submitted.
pub fn termination_rule() -> TriggerRule {
    TriggerRule::new(
        "rule-leaver-termination",
        "Leaver - Termination",
        5,
        vec![TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::transition("ACTIVE", "TERMINATED"),
        )],
        TriggerOutputSpec::new(ActionType::Leaver).auto_submitted(),
    )
}

/// Engineers get the developer role and git access.
pub fn engineering_birthright() -> BirthrightPolicy {
    BirthrightPolicy::new("bp-engineering", "Engineering baseline", 10)
        .with_condition(BirthrightCondition::new(
            "department",
            BirthrightOperator::Equals,
            "Engineering",
        ))
        .with_action(BirthrightAction::GrantRole {
            role_id: "developer".into(),
        })
        .with_action(BirthrightAction::GrantEntitlement {
            entitlement_id: "git-access".into(),
        })
}
