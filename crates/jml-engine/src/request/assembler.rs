//! Builds lifecycle requests from triggered rules.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use jml_core::{RequestId, RuleId};

use super::model::{
    ApprovalStep, ChangeSet, LifecycleRequest, ProvisioningTask, RequestStatus, TaskKind,
};
use crate::access_plan::AccessPlan;
use crate::config::EngineConfig;
use crate::delta::AttributeDelta;
use crate::error::Result;
use crate::identity::IdentitySnapshot;
use crate::policy::{gates_auto_submit, SodViolation};
use crate::risk::RiskScore;
use crate::trigger::{EffectiveDatePolicy, TriggerOutputSpec};
use crate::types::Approver;
use crate::values::parse_instant;

/// Everything the assembler needs for one triggered rule.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub rule_id: &'a RuleId,
    pub spec: &'a TriggerOutputSpec,
    pub delta: &'a AttributeDelta,
    pub identity: Option<&'a IdentitySnapshot>,
    pub risk: RiskScore,
    pub plan: &'a AccessPlan,
    /// Approvers required by matching birthright policies.
    pub policy_approvers: &'a [String],
    /// Birthright reasoning, copied onto the request.
    pub reasoning: &'a [String],
    pub violations: Vec<SodViolation>,
    pub now: DateTime<Utc>,
}

/// Turns an action spec and its evaluation context into a request.
#[derive(Debug, Clone)]
pub struct RequestAssembler {
    high_risk_threshold: u32,
    admin_approver_role: String,
    task_max_retries: u32,
}

impl RequestAssembler {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            high_risk_threshold: config.high_risk_threshold,
            admin_approver_role: config.admin_approver_role.clone(),
            task_max_retries: config.task_max_retries,
        }
    }

    /// Assemble a request. The correlation id is copied from the delta.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAccessPlan` when the plan adds and removes the same id.
    pub fn assemble(&self, input: AssemblyInput<'_>) -> Result<LifecycleRequest> {
        input.plan.validate()?;

        let spec = input.spec;
        let approval_chain = self.approval_chain(spec, input.policy_approvers, &input.risk);
        let gated = spec.sod_precheck && gates_auto_submit(&input.violations);
        let status = if spec.auto_submit && !gated {
            RequestStatus::PendingApproval
        } else {
            RequestStatus::Draft
        };
        if spec.auto_submit && gated {
            tracing::info!(
                rule_id = %input.rule_id,
                identity_id = %input.delta.identity_id,
                "Auto-submit held back by SoD precheck"
            );
        }

        let tasks = TaskKind::for_action(spec.action_type)
            .into_iter()
            .map(|kind| ProvisioningTask::new(kind, self.task_max_retries))
            .collect();

        Ok(LifecycleRequest {
            id: RequestId::new(),
            rule_id: input.rule_id.clone(),
            action_type: spec.action_type,
            identity_id: input.delta.identity_id.clone(),
            status,
            effective_date: effective_date(
                &spec.effective_date,
                input.delta,
                input.identity,
                input.now,
            ),
            risk_score: input.risk,
            approval_chain,
            tasks,
            change_set: ChangeSet::from(input.plan),
            sod_violations: input.violations,
            birthright_reasoning: input.reasoning.to_vec(),
            notes: spec.notes.clone(),
            correlation_id: input.delta.correlation_id.clone(),
            cancellation_requested: false,
            created_at: input.now,
            updated_at: input.now,
        })
    }

    /// Manager step first, then the configured steps in step order, then the
    /// approvers birthright policies require, then an administrator step when
    /// the risk calls for one. Duplicates are dropped and steps are renumbered
    /// from 1.
    #[must_use]
    pub fn approval_chain(
        &self,
        spec: &TriggerOutputSpec,
        policy_approvers: &[String],
        risk: &RiskScore,
    ) -> Vec<ApprovalStep> {
        let mut approvers = Vec::new();
        if spec.require_manager_approval {
            approvers.push(Approver::Manager);
        }

        let mut explicit: Vec<_> = spec.approval_chain.iter().collect();
        explicit.sort_by_key(|entry| entry.step);
        approvers.extend(explicit.into_iter().map(|entry| entry.approver.clone()));

        for name in policy_approvers {
            let approver = policy_approver(name);
            if !approvers.contains(&approver) {
                approvers.push(approver);
            }
        }

        let over_rule_threshold = spec
            .risk_threshold
            .is_some_and(|threshold| risk.total > threshold);
        let admin = Approver::Role(self.admin_approver_role.clone());
        if (over_rule_threshold || risk.total >= self.high_risk_threshold)
            && !approvers.contains(&admin)
        {
            approvers.push(admin);
        }

        approvers
            .into_iter()
            .zip(1u32..)
            .map(|(approver, step)| ApprovalStep::pending(step, approver))
            .collect()
    }
}

/// Birthright policies name approvers as plain strings; "manager" means the
/// line manager, anything else a role.
fn policy_approver(name: &str) -> Approver {
    if name.eq_ignore_ascii_case("manager") {
        Approver::Manager
    } else {
        Approver::Role(name.to_string())
    }
}

/// Resolve the effective date policy.
///
/// `FROM_ATTRIBUTE` reads the delta when it changed that attribute, then the
/// identity snapshot, and falls back to `now` when neither holds a date.
#[must_use]
pub fn effective_date(
    policy: &EffectiveDatePolicy,
    delta: &AttributeDelta,
    identity: Option<&IdentitySnapshot>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match policy {
        EffectiveDatePolicy::Immediate => now,
        EffectiveDatePolicy::Explicit { date } => at_time(*date, NaiveTime::MIN),
        EffectiveDatePolicy::NextBusinessDay { time_of_day } => at_time(
            next_business_day(now.date_naive()),
            time_of_day.unwrap_or(NaiveTime::MIN),
        ),
        EffectiveDatePolicy::FromAttribute { attribute } => {
            let from_delta = (delta.attribute == *attribute)
                .then(|| parse_instant(&delta.after))
                .flatten();
            from_delta
                .or_else(|| {
                    identity
                        .and_then(|i| i.attribute(attribute))
                        .and_then(parse_instant)
                })
                .unwrap_or(now)
        }
    }
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

/// First weekday strictly after `date`.
#[must_use]
pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}
