//! The lifecycle engine façade.
//!
//! Reads configuration and identity state from the stores, runs the pure
//! evaluation components, and records what happened: the delta log, rule
//! metrics, conflicts, requests and the audit trail.
//!
//! ```text
//! delta ─► mastership ─► triggers ─► access plan ─► SoD ─► risk ─► request
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jml_engine::engine::{EngineStores, LifecycleEngine};
//! use jml_engine::config::EngineConfig;
//!
//! let engine = LifecycleEngine::new(EngineStores::in_memory(), EngineConfig::default())?;
//! let outcome = engine
//!     .process_attribute_change(
//!         IdentityId::new("identity-001"),
//!         "employmentStatus",
//!         json!("PENDING"),
//!         json!("ACTIVE"),
//!         SourceId::new("isr-hris"),
//!         CorrelationId::new("corr-1"),
//!     )
//!     .await?;
//! ```

use std::sync::Arc;

use jml_core::{ConflictId, Correlated, CorrelationId, IdentityId, RuleId, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::access_plan::AccessPlan;
use crate::audit::{AuditStore, InMemoryAuditStore, JmlAuditAction, JmlAuditEventInput};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::delta::{AttributeDelta, DeltaLog, InMemoryDeltaLog};
use crate::error::{EngineError, Result};
use crate::identity::{IdentityDirectory, IdentitySnapshot, InMemoryIdentityDirectory, SourceValue};
use crate::mastership::{
    AttributeSourceRegistry, ConflictDetection, ConflictStore, InMemoryConflictStore,
    InMemorySourceRegistry, MastershipComparator, MastershipResolution, MastershipResolver,
    ResolutionInput,
};
use crate::policy::{
    BirthrightEvaluator, BirthrightPolicy, BirthrightPolicyStore, BirthrightResult,
    EvaluationMode, InMemoryBirthrightPolicyStore, InMemorySodRuleStore, SodEvaluator,
    SodRuleStore, SodViolation,
};
use crate::request::{
    AssemblyInput, InMemoryRequestStore, LifecycleRequest, LifecycleRequestService,
    RequestAssembler, RequestStore,
};
use crate::risk::{RiskScore, RiskScorer};
use crate::trigger::{
    EvaluationContext, InMemoryTriggerRuleStore, RuleMetrics, RuleMetricsStore, RuleTestResult,
    TriggerEvaluation, TriggerEvaluator, TriggerOutputSpec, TriggerRule, TriggerRuleStore,
};
use crate::types::ActionType;

// ============================================================================
// Stores
// ============================================================================

/// Repositories the engine reads and writes.
#[derive(Clone)]
pub struct EngineStores {
    pub sources: Arc<dyn AttributeSourceRegistry>,
    pub rules: Arc<dyn TriggerRuleStore>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub deltas: Arc<dyn DeltaLog>,
    pub conflicts: Arc<dyn ConflictStore>,
    pub birthright: Arc<dyn BirthrightPolicyStore>,
    pub sod: Arc<dyn SodRuleStore>,
    pub requests: Arc<dyn RequestStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl EngineStores {
    /// Empty in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sources: Arc::new(InMemorySourceRegistry::new()),
            rules: Arc::new(InMemoryTriggerRuleStore::new()),
            directory: Arc::new(InMemoryIdentityDirectory::new()),
            deltas: Arc::new(InMemoryDeltaLog::new()),
            conflicts: Arc::new(InMemoryConflictStore::new()),
            birthright: Arc::new(InMemoryBirthrightPolicyStore::new()),
            sod: Arc::new(InMemorySodRuleStore::new()),
            requests: Arc::new(InMemoryRequestStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of evaluating one delta against mastership and the active rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvaluation {
    /// The delta as evaluated: its after-value is the resolved value when the
    /// delta's source won mastership.
    pub delta: AttributeDelta,
    /// `None` when no source masters the attribute.
    pub resolution: Option<MastershipResolution>,
    pub authoritative: bool,
    pub evaluation: TriggerEvaluation,
}

impl Correlated for DeltaEvaluation {
    fn correlation_id(&self) -> &CorrelationId {
        &self.delta.correlation_id
    }
}

/// Full pipeline outcome: the evaluation plus one request per triggered rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub evaluation: DeltaEvaluation,
    pub requests: Vec<LifecycleRequest>,
}

/// Access changes for one action with the birthright reasoning behind them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPlanning {
    pub plan: AccessPlan,
    pub birthright: BirthrightResult,
}

// ============================================================================
// Engine
// ============================================================================

/// Attribute-driven joiner/mover/leaver decision engine.
pub struct LifecycleEngine {
    stores: EngineStores,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    resolver: MastershipResolver,
    evaluator: TriggerEvaluator,
    scorer: RiskScorer,
    birthright: BirthrightEvaluator,
    sod: SodEvaluator,
    assembler: RequestAssembler,
    metrics: Arc<RuleMetricsStore>,
    requests: LifecycleRequestService,
}

impl LifecycleEngine {
    /// Build an engine over `stores`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the configuration fails validation.
    pub fn new(stores: EngineStores, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            requests: LifecycleRequestService::new(
                Arc::clone(&stores.requests),
                Arc::clone(&stores.audit),
                Arc::clone(&clock),
            ),
            scorer: RiskScorer::from_config(&config),
            assembler: RequestAssembler::from_config(&config),
            resolver: MastershipResolver::new(),
            evaluator: TriggerEvaluator::new(),
            birthright: BirthrightEvaluator::default(),
            sod: SodEvaluator,
            metrics: Arc::new(RuleMetricsStore::new()),
            stores,
            config,
            clock,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.requests = LifecycleRequestService::new(
            Arc::clone(&self.stores.requests),
            Arc::clone(&self.stores.audit),
            Arc::clone(&clock),
        );
        self.clock = clock;
        self
    }

    /// Register the comparator used by CUSTOM_RULE strategies and CUSTOM tie-breaks.
    #[must_use]
    pub fn with_comparator(mut self, comparator: Arc<dyn MastershipComparator>) -> Self {
        self.resolver = MastershipResolver::with_comparator(comparator);
        self
    }

    #[must_use]
    pub fn with_birthright_mode(mut self, mode: EvaluationMode) -> Self {
        self.birthright = BirthrightEvaluator::new(mode);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn stores(&self) -> &EngineStores {
        &self.stores
    }

    /// Request operations (submit, approve, tasks, cancel).
    #[must_use]
    pub fn requests(&self) -> &LifecycleRequestService {
        &self.requests
    }

    #[must_use]
    pub fn metrics(&self) -> &RuleMetricsStore {
        &self.metrics
    }

    #[must_use]
    pub fn rule_metrics(&self, rule_id: &RuleId) -> Option<RuleMetrics> {
        self.metrics.get(rule_id)
    }

    // ------------------------------------------------------------------------
    // Rule administration
    // ------------------------------------------------------------------------

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub async fn create_rule(&self, rule: TriggerRule) -> Result<TriggerRule> {
        let rule = self.stores.rules.create_rule(rule).await?;
        self.audit_rule(JmlAuditAction::RuleCreated, &rule).await?;
        tracing::info!(priority = rule.priority, "Trigger rule created");
        Ok(rule)
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub async fn update_rule(&self, rule: TriggerRule) -> Result<TriggerRule> {
        let rule = self.stores.rules.update_rule(rule).await?;
        self.audit_rule(JmlAuditAction::RuleUpdated, &rule).await?;
        Ok(rule)
    }

    async fn audit_rule(&self, action: JmlAuditAction, rule: &TriggerRule) -> Result<()> {
        self.stores
            .audit
            .log_event(JmlAuditEventInput {
                action,
                subject_id: Some(rule.id.to_string()),
                after_state: Some(serde_json::to_value(rule).unwrap_or_default()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Dry-run a rule against a delta with a per-condition trace. Neither the
    /// rule store nor the metrics are touched.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the rule itself is invalid.
    #[instrument(skip(self, rule, delta), fields(rule_id = %rule.id))]
    pub async fn test_rule(
        &self,
        rule: &TriggerRule,
        delta: &AttributeDelta,
    ) -> Result<RuleTestResult> {
        rule.validate()?;
        let identity = self.stores.directory.get_identity(&delta.identity_id).await?;
        let mut ctx = EvaluationContext::new(delta, self.clock.now());
        if let Some(identity) = identity.as_ref() {
            ctx = ctx.with_identity(identity);
        }
        Ok(self.evaluator.trace_rule(&ctx, rule))
    }

    // ------------------------------------------------------------------------
    // Mastership
    // ------------------------------------------------------------------------

    /// Resolve the authoritative source and value of an attribute from what
    /// each source currently reports.
    ///
    /// # Errors
    ///
    /// `NoMasteringSource` or `NullRejected` from the resolver.
    #[instrument(skip(self))]
    pub async fn resolve_mastership(
        &self,
        identity_id: &IdentityId,
        attribute: &str,
        correlation_id: &CorrelationId,
    ) -> Result<MastershipResolution> {
        let values = self
            .stores
            .directory
            .source_values(identity_id, attribute)
            .await?;
        self.resolve_with_values(identity_id, attribute, values, correlation_id)
            .await
    }

    async fn resolve_with_values(
        &self,
        identity_id: &IdentityId,
        attribute: &str,
        values: Vec<SourceValue>,
        correlation_id: &CorrelationId,
    ) -> Result<MastershipResolution> {
        let sources = self.stores.sources.list_sources().await?;
        let identity = self.stores.directory.get_identity(identity_id).await?;
        let input = ResolutionInput {
            identity_id,
            attribute,
            identity: identity.as_ref(),
            sources: &sources,
            values: &values,
            correlation_id,
            now: self.clock.now(),
        };
        let mut resolution = self.resolver.resolve(&input)?;

        let mut recorded = Vec::with_capacity(resolution.conflicts.len());
        for conflict in std::mem::take(&mut resolution.conflicts) {
            let submitted = conflict.id;
            let stored = self.stores.conflicts.record(conflict).await?;
            if stored.id == submitted {
                self.audit_conflict(&stored).await?;
            }
            recorded.push(stored);
        }
        resolution.conflicts = recorded;

        self.stores
            .audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::MastershipResolved,
                identity_id: Some(identity_id.clone()),
                correlation_id: Some(correlation_id.clone()),
                subject_id: Some(resolution.id.to_string()),
                after_state: Some(serde_json::json!({
                    "attribute": attribute,
                    "winning_source": resolution.winning_source.to_string(),
                    "resolved_value": resolution.resolved_value,
                    "decided_by": resolution.decided_by,
                })),
                ..Default::default()
            })
            .await?;
        Ok(resolution)
    }

    async fn audit_conflict(&self, conflict: &ConflictDetection) -> Result<()> {
        tracing::warn!(
            conflict_id = %conflict.id,
            attribute = %conflict.attribute,
            kind = ?conflict.kind,
            severity = %conflict.severity,
            "Mastership conflict detected"
        );
        self.stores
            .audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::ConflictDetected,
                identity_id: Some(conflict.identity_id.clone()),
                correlation_id: Some(conflict.correlation_id.clone()),
                subject_id: Some(conflict.id.to_string()),
                after_state: Some(serde_json::to_value(conflict).unwrap_or_default()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub async fn list_open_conflicts(&self) -> Result<Vec<ConflictDetection>> {
        self.stores.conflicts.list_open().await
    }

    /// Close a conflict with an administrator note.
    #[instrument(skip(self, note))]
    pub async fn resolve_conflict(
        &self,
        id: ConflictId,
        note: impl Into<String> + Send,
        actor: &str,
    ) -> Result<ConflictDetection> {
        let resolved = self
            .stores
            .conflicts
            .resolve(id, note.into(), self.clock.now())
            .await?;
        self.stores
            .audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::ConflictResolved,
                identity_id: Some(resolved.identity_id.clone()),
                correlation_id: Some(resolved.correlation_id.clone()),
                subject_id: Some(id.to_string()),
                actor: Some(actor.to_string()),
                after_state: Some(serde_json::to_value(&resolved).unwrap_or_default()),
                ..Default::default()
            })
            .await?;
        Ok(resolved)
    }

    // ------------------------------------------------------------------------
    // Delta evaluation
    // ------------------------------------------------------------------------

    /// Record an attribute change reported now and evaluate it.
    #[instrument(skip(self, before, after))]
    pub async fn evaluate_attribute_change(
        &self,
        identity_id: IdentityId,
        attribute: &str,
        before: Value,
        after: Value,
        source_id: SourceId,
        correlation_id: CorrelationId,
    ) -> Result<DeltaEvaluation> {
        let delta = AttributeDelta::new(
            identity_id,
            attribute,
            before,
            after,
            source_id,
            correlation_id,
            self.clock.now(),
        );
        self.evaluate_delta(delta).await
    }

    /// Append a delta to the log, resolve mastership for its attribute and
    /// evaluate the active trigger rules.
    ///
    /// A delta from a source that lost mastership suppresses every rule. An
    /// attribute no source masters is evaluated as reported.
    ///
    /// # Errors
    ///
    /// - `OutOfOrderDelta` when the delta is not newer than the identity's last.
    /// - `NullRejected` when the winning source's null policy rejects the value.
    #[instrument(skip(self, delta), fields(delta_id = %delta.id, attribute = %delta.attribute))]
    pub async fn evaluate_delta(&self, delta: AttributeDelta) -> Result<DeltaEvaluation> {
        let delta = self.stores.deltas.append(delta).await?;
        self.stores
            .audit
            .log_event(JmlAuditEventInput {
                action: JmlAuditAction::DeltaIngested,
                identity_id: Some(delta.identity_id.clone()),
                correlation_id: Some(delta.correlation_id.clone()),
                subject_id: Some(delta.id.to_string()),
                before_state: Some(delta.before.clone()),
                after_state: Some(delta.after.clone()),
                metadata: Some(serde_json::json!({
                    "attribute": delta.attribute,
                    "source_id": delta.source_id.to_string(),
                })),
                ..Default::default()
            })
            .await?;

        let mut values = self
            .stores
            .directory
            .source_values(&delta.identity_id, &delta.attribute)
            .await?;
        values.retain(|v| v.source_id != delta.source_id);
        values.push(SourceValue {
            source_id: delta.source_id.clone(),
            value: delta.after.clone(),
            written_at: delta.timestamp,
        });

        let (resolution, authoritative, effective) = match self
            .resolve_with_values(
                &delta.identity_id,
                &delta.attribute,
                values,
                &delta.correlation_id,
            )
            .await
        {
            Ok(resolution) => {
                let authoritative = resolution.is_winner(&delta.source_id);
                let effective = if authoritative {
                    delta.with_after(resolution.resolved_value.clone())
                } else {
                    delta.clone()
                };
                (Some(resolution), authoritative, effective)
            }
            Err(EngineError::NoMasteringSource { .. }) => {
                tracing::debug!("Attribute is unmastered; evaluating delta as reported");
                (None, true, delta.clone())
            }
            Err(e) => return Err(e),
        };

        let rules = self.stores.rules.list_active_rules().await?;
        let identity = self
            .stores
            .directory
            .get_identity(&effective.identity_id)
            .await?;
        let now = self.clock.now();
        let mut ctx = EvaluationContext::new(&effective, now);
        if let Some(identity) = identity.as_ref() {
            ctx = ctx.with_identity(identity);
        }
        if !authoritative {
            ctx = ctx.non_authoritative();
        }
        let evaluation = self.evaluator.evaluate(&ctx, &rules);

        for fired in &evaluation.triggered {
            let metrics = self.metrics.record_firing(&fired.rule_id, now);
            self.stores
                .audit
                .log_event(JmlAuditEventInput {
                    action: JmlAuditAction::RuleTriggered,
                    identity_id: Some(effective.identity_id.clone()),
                    correlation_id: Some(effective.correlation_id.clone()),
                    subject_id: Some(fired.rule_id.to_string()),
                    metadata: Some(serde_json::json!({
                        "action_type": fired.output.action_type,
                        "trigger_count": metrics.trigger_count,
                    })),
                    ..Default::default()
                })
                .await?;
            tracing::info!(
                rule_id = %fired.rule_id,
                action_type = %fired.output.action_type,
                "Trigger rule fired"
            );
        }

        Ok(DeltaEvaluation {
            delta: effective,
            resolution,
            authoritative,
            evaluation,
        })
    }

    // ------------------------------------------------------------------------
    // Access, risk and requests
    // ------------------------------------------------------------------------

    /// Work out the access changes an action implies.
    ///
    /// JOINER grants birthright access not already held. MOVER grants the
    /// birthright of the new attribute value and revokes held birthright the
    /// old value granted but the new one does not. LEAVER revokes everything.
    pub async fn plan_access(
        &self,
        action: ActionType,
        delta: &AttributeDelta,
        identity: &IdentitySnapshot,
    ) -> Result<AccessPlanning> {
        let policies = self.stores.birthright.list_policies().await?;
        Ok(build_access_plan(
            &self.birthright,
            &policies,
            action,
            delta,
            identity,
        ))
    }

    /// Score an action spec against a delta and identity.
    #[must_use]
    pub fn score_risk(
        &self,
        spec: &TriggerOutputSpec,
        delta: &AttributeDelta,
        identity: Option<&IdentitySnapshot>,
        sod_violations: usize,
    ) -> RiskScore {
        let identity_risk = identity.map(|i| i.risk_level).unwrap_or_default();
        self.scorer
            .score(spec.action_type, &delta.attribute, identity_risk, sod_violations)
    }

    /// SoD violations in a plan's end state.
    ///
    /// # Errors
    ///
    /// `InvalidAccessPlan` when the plan adds and removes the same id.
    pub async fn evaluate_access_plan(&self, plan: &AccessPlan) -> Result<Vec<SodViolation>> {
        plan.validate()?;
        let rules = self.stores.sod.list_active().await?;
        Ok(self.sod.evaluate(&rules, plan))
    }

    /// Plan, check, score and assemble a request for one triggered rule, then
    /// store it. Approvers required by birthright policies join the chain.
    #[instrument(skip(self, spec, delta, identity), fields(identity_id = %delta.identity_id))]
    pub async fn assemble_request(
        &self,
        rule_id: &RuleId,
        spec: &TriggerOutputSpec,
        delta: &AttributeDelta,
        identity: Option<&IdentitySnapshot>,
    ) -> Result<LifecycleRequest> {
        let fallback;
        let snapshot = match identity {
            Some(identity) => identity,
            None => {
                fallback = IdentitySnapshot::new(delta.identity_id.clone());
                &fallback
            }
        };

        let planning = self.plan_access(spec.action_type, delta, snapshot).await?;
        let violations = self.evaluate_access_plan(&planning.plan).await?;
        let risk = self.score_risk(spec, delta, identity, violations.len());

        let request = self.assembler.assemble(AssemblyInput {
            rule_id,
            spec,
            delta,
            identity,
            risk,
            plan: &planning.plan,
            policy_approvers: &planning.birthright.approvers,
            reasoning: &planning.birthright.reasoning,
            violations,
            now: self.clock.now(),
        })?;
        self.requests.create(request).await
    }

    /// Evaluate an attribute change and assemble a request for every rule it
    /// triggers.
    #[instrument(skip(self, before, after))]
    pub async fn process_attribute_change(
        &self,
        identity_id: IdentityId,
        attribute: &str,
        before: Value,
        after: Value,
        source_id: SourceId,
        correlation_id: CorrelationId,
    ) -> Result<ProcessOutcome> {
        let evaluation = self
            .evaluate_attribute_change(
                identity_id,
                attribute,
                before,
                after,
                source_id,
                correlation_id,
            )
            .await?;
        self.assemble_for(evaluation).await
    }

    /// [`evaluate_delta`](Self::evaluate_delta) followed by request assembly.
    pub async fn process_delta(&self, delta: AttributeDelta) -> Result<ProcessOutcome> {
        let evaluation = self.evaluate_delta(delta).await?;
        self.assemble_for(evaluation).await
    }

    async fn assemble_for(&self, evaluation: DeltaEvaluation) -> Result<ProcessOutcome> {
        let identity = self
            .stores
            .directory
            .get_identity(&evaluation.delta.identity_id)
            .await?;
        let mut requests = Vec::with_capacity(evaluation.evaluation.triggered.len());
        for fired in &evaluation.evaluation.triggered {
            let request = self
                .assemble_request(
                    &fired.rule_id,
                    &fired.output,
                    &evaluation.delta,
                    identity.as_ref(),
                )
                .await?;
            requests.push(request);
        }
        Ok(ProcessOutcome {
            evaluation,
            requests,
        })
    }
}

/// Pure access planning over a set of birthright policies.
#[must_use]
pub fn build_access_plan(
    evaluator: &BirthrightEvaluator,
    policies: &[BirthrightPolicy],
    action: ActionType,
    delta: &AttributeDelta,
    identity: &IdentitySnapshot,
) -> AccessPlanning {
    let mut plan = AccessPlan::from_existing(
        identity.role_ids.clone(),
        identity.entitlement_ids.clone(),
    );

    let birthright = match action {
        ActionType::Joiner => {
            let granted = evaluator.evaluate(
                policies,
                &identity.attributes_with(&delta.attribute, &delta.after),
            );
            plan.added_roles = granted.roles.difference(&plan.existing_roles).cloned().collect();
            plan.added_entitlements = granted
                .entitlements
                .difference(&plan.existing_entitlements)
                .cloned()
                .collect();
            granted
        }
        ActionType::Mover => {
            let previous = evaluator.evaluate(
                policies,
                &identity.attributes_with(&delta.attribute, &delta.before),
            );
            let granted = evaluator.evaluate(
                policies,
                &identity.attributes_with(&delta.attribute, &delta.after),
            );
            plan.added_roles = granted.roles.difference(&plan.existing_roles).cloned().collect();
            plan.added_entitlements = granted
                .entitlements
                .difference(&plan.existing_entitlements)
                .cloned()
                .collect();
            plan.removed_roles = previous
                .roles
                .difference(&granted.roles)
                .filter(|r| plan.existing_roles.contains(*r))
                .cloned()
                .collect();
            plan.removed_entitlements = previous
                .entitlements
                .difference(&granted.entitlements)
                .filter(|e| plan.existing_entitlements.contains(*e))
                .cloned()
                .collect();
            granted
        }
        ActionType::Leaver => {
            plan.removed_roles = plan.existing_roles.clone();
            plan.removed_entitlements = plan.existing_entitlements.clone();
            BirthrightResult::default()
        }
    };

    AccessPlanning { plan, birthright }
}
