//! Separation-of-duties checks over a proposed access plan.
//!
//! Violations are computed from the plan's end state only, so the same end
//! state always yields the same violations. They are advisory: they raise the
//! risk score and may hold back auto-submission, but never block a request.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use jml_core::ViolationId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::access_plan::AccessPlan;
use crate::error::{EngineError, Result};
use crate::types::Severity;

// ============================================================================
// Domain Types
// ============================================================================

/// How the members of a rule conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SodConflictType {
    /// Holding any two members is a violation.
    Exclusive,
    /// Holding more than `max_count` members is a violation.
    Cardinality,
}

impl fmt::Display for SodConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "EXCLUSIVE"),
            Self::Cardinality => write!(f, "CARDINALITY"),
        }
    }
}

/// A separation-of-duties rule over roles and entitlements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SodRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub role_ids: BTreeSet<String>,
    #[serde(default)]
    pub entitlement_ids: BTreeSet<String>,
    pub conflict_type: SodConflictType,
    /// Required for `CARDINALITY` rules.
    #[serde(default)]
    pub max_count: Option<usize>,
    pub severity: Severity,
    #[serde(default)]
    pub mitigations: Vec<String>,
    /// When set, a violation keeps an auto-submitted request in draft.
    #[serde(default)]
    pub gates_auto_submit: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SodRule {
    /// Exclusive rule over two or more roles.
    #[must_use]
    pub fn exclusive_roles<I, S>(
        id: impl Into<String>,
        name: impl Into<String>,
        roles: I,
        severity: Severity,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            role_ids: roles.into_iter().map(Into::into).collect(),
            entitlement_ids: BTreeSet::new(),
            conflict_type: SodConflictType::Exclusive,
            max_count: None,
            severity,
            mitigations: Vec::new(),
            gates_auto_submit: false,
            active: true,
        }
    }

    #[must_use]
    pub fn with_entitlements<I, S>(mut self, entitlements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entitlement_ids
            .extend(entitlements.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_cardinality(mut self, max_count: usize) -> Self {
        self.conflict_type = SodConflictType::Cardinality;
        self.max_count = Some(max_count);
        self
    }

    #[must_use]
    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigations.push(mitigation.into());
        self
    }

    #[must_use]
    pub fn gating(mut self) -> Self {
        self.gates_auto_submit = true;
        self
    }

    fn member_count(&self) -> usize {
        self.role_ids.len() + self.entitlement_ids.len()
    }

    /// Check the rule structure.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the rule has fewer than two members, or a
    /// cardinality rule has no `max_count` or one outside `1..members`.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("name", "SoD rule name cannot be empty"));
        }
        let members = self.member_count();
        if members < 2 {
            return Err(EngineError::validation(
                "role_ids",
                format!("SoD rule requires at least 2 members, got {members}"),
            ));
        }
        if self.conflict_type == SodConflictType::Cardinality {
            match self.max_count {
                None => {
                    return Err(EngineError::validation(
                        "max_count",
                        "Cardinality rules require max_count",
                    ))
                }
                Some(max) if max < 1 || max >= members => {
                    return Err(EngineError::validation(
                        "max_count",
                        format!("max_count {max} must be between 1 and {}", members - 1),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Threshold above which the held members count as a violation.
    fn allowed(&self) -> usize {
        match self.conflict_type {
            SodConflictType::Exclusive => 1,
            SodConflictType::Cardinality => self.max_count.unwrap_or(1),
        }
    }
}

/// A rule broken by a plan's end state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SodViolation {
    pub id: ViolationId,
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    /// Role ids then entitlement ids, each sorted.
    pub conflicting_items: Vec<String>,
    pub severity: Severity,
    pub mitigations: Vec<String>,
    pub gates_auto_submit: bool,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates SoD rules against access plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct SodEvaluator;

impl SodEvaluator {
    /// One violation per active rule whose members the end state over-holds.
    /// Ordered by rule id.
    #[must_use]
    pub fn evaluate(&self, rules: &[SodRule], plan: &AccessPlan) -> Vec<SodViolation> {
        let roles = plan.end_state_roles();
        let entitlements = plan.end_state_entitlements();

        let mut active: Vec<&SodRule> = rules.iter().filter(|r| r.active).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));

        active
            .into_iter()
            .filter_map(|rule| {
                let held: Vec<String> = rule
                    .role_ids
                    .intersection(&roles)
                    .chain(rule.entitlement_ids.intersection(&entitlements))
                    .cloned()
                    .collect();
                if held.len() <= rule.allowed() {
                    return None;
                }
                tracing::debug!(
                    rule_id = %rule.id,
                    held = held.len(),
                    "SoD rule violated by plan end state"
                );
                Some(SodViolation {
                    id: ViolationId::new(),
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    description: rule.description.clone().unwrap_or_else(|| {
                        format!(
                            "{} rule '{}' violated by {}",
                            rule.conflict_type,
                            rule.name,
                            held.join(", ")
                        )
                    }),
                    conflicting_items: held,
                    severity: rule.severity,
                    mitigations: rule.mitigations.clone(),
                    gates_auto_submit: rule.gates_auto_submit,
                })
            })
            .collect()
    }
}

/// True when any violation holds back auto-submission.
#[must_use]
pub fn gates_auto_submit(violations: &[SodViolation]) -> bool {
    violations.iter().any(|v| v.gates_auto_submit)
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for SoD rule storage backends.
#[async_trait::async_trait]
pub trait SodRuleStore: Send + Sync {
    async fn get_rule(&self, id: &str) -> Result<Option<SodRule>>;

    /// Active rules ordered by id.
    async fn list_active(&self) -> Result<Vec<SodRule>>;

    async fn create_rule(&self, rule: SodRule) -> Result<SodRule>;

    async fn delete_rule(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory SoD rule store.
#[derive(Debug, Default)]
pub struct InMemorySodRuleStore {
    rules: Arc<RwLock<HashMap<String, SodRule>>>,
}

impl InMemorySodRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[async_trait::async_trait]
impl SodRuleStore for InMemorySodRuleStore {
    async fn get_rule(&self, id: &str) -> Result<Option<SodRule>> {
        Ok(self.rules.read().await.get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<SodRule>> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn create_rule(&self, rule: SodRule) -> Result<SodRule> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(EngineError::AlreadyExists {
                resource: "SodRule",
                id: rule.id,
            });
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, id: &str) -> Result<bool> {
        Ok(self.rules.write().await.remove(id).is_some())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payments_rule() -> SodRule {
        SodRule::exclusive_roles(
            "sod-payments",
            "Create vs approve payments",
            ["payment-creator", "payment-approver"],
            Severity::High,
        )
        .with_mitigation("Compensating monthly review")
    }

    #[test]
    fn test_adding_both_conflicting_roles_yields_one_violation() {
        let plan = AccessPlan::default()
            .add_role("payment-creator")
            .add_role("payment-approver");
        let violations = SodEvaluator.evaluate(&[payments_rule()], &plan);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::High);
        assert_eq!(
            violations[0].conflicting_items,
            vec!["payment-approver", "payment-creator"]
        );
        assert_eq!(violations[0].mitigations, vec!["Compensating monthly review"]);
    }

    #[test]
    fn test_existing_plus_added_violates() {
        let plan = AccessPlan::from_existing(
            BTreeSet::from(["payment-creator".to_string()]),
            BTreeSet::new(),
        )
        .add_role("payment-approver");
        assert_eq!(SodEvaluator.evaluate(&[payments_rule()], &plan).len(), 1);
    }

    #[test]
    fn test_removal_clears_violation() {
        let plan = AccessPlan::from_existing(
            BTreeSet::from(["payment-creator".to_string()]),
            BTreeSet::new(),
        )
        .add_role("payment-approver")
        .remove_role("payment-creator");
        assert!(SodEvaluator.evaluate(&[payments_rule()], &plan).is_empty());
    }

    #[test]
    fn test_mixed_role_and_entitlement_members() {
        let rule = SodRule::exclusive_roles(
            "sod-mixed",
            "Admin vs audit",
            ["db-admin"],
            Severity::Critical,
        )
        .with_entitlements(["audit-log-write"]);
        let plan = AccessPlan::default()
            .add_role("db-admin")
            .add_entitlement("audit-log-write");
        let violations = SodEvaluator.evaluate(&[rule], &plan);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].conflicting_items, vec!["db-admin", "audit-log-write"]);
    }

    #[test]
    fn test_cardinality_rule() {
        let rule = SodRule::exclusive_roles(
            "sod-card",
            "At most two finance roles",
            ["ap", "ar", "gl", "treasury"],
            Severity::Medium,
        )
        .with_cardinality(2);

        let two = AccessPlan::default().add_role("ap").add_role("ar");
        assert!(SodEvaluator.evaluate(&[rule.clone()], &two).is_empty());

        let three = two.add_role("gl");
        assert_eq!(SodEvaluator.evaluate(&[rule], &three).len(), 1);
    }

    #[test]
    fn test_inactive_rules_ignored() {
        let mut rule = payments_rule();
        rule.active = false;
        let plan = AccessPlan::default()
            .add_role("payment-creator")
            .add_role("payment-approver");
        assert!(SodEvaluator.evaluate(&[rule], &plan).is_empty());
    }

    #[test]
    fn test_gating() {
        let plan = AccessPlan::default()
            .add_role("payment-creator")
            .add_role("payment-approver");
        let advisory = SodEvaluator.evaluate(&[payments_rule()], &plan);
        assert!(!gates_auto_submit(&advisory));
        let gating = SodEvaluator.evaluate(&[payments_rule().gating()], &plan);
        assert!(gates_auto_submit(&gating));
    }

    #[test]
    fn test_validate() {
        assert!(payments_rule().validate().is_ok());

        let single = SodRule::exclusive_roles("sod-1", "Single", ["a"], Severity::Low);
        assert!(single.validate().is_err());

        let mut no_max =
            SodRule::exclusive_roles("sod-2", "No max", ["a", "b", "c"], Severity::Low);
        no_max.conflict_type = SodConflictType::Cardinality;
        assert!(no_max.validate().is_err());

        let too_high = SodRule::exclusive_roles("sod-3", "Too high", ["a", "b"], Severity::Low)
            .with_cardinality(2);
        assert!(too_high.validate().is_err());
    }

    #[tokio::test]
    async fn test_store() {
        let store = InMemorySodRuleStore::new();
        store.create_rule(payments_rule()).await.unwrap();
        let err = store.create_rule(payments_rule()).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists { resource: "SodRule", .. }));

        let mut inactive = payments_rule();
        inactive.id = "sod-off".into();
        inactive.active = false;
        store.create_rule(inactive).await.unwrap();

        assert_eq!(store.count().await, 2);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
        assert!(store.delete_rule("sod-payments").await.unwrap());
        assert!(store.get_rule("sod-payments").await.unwrap().is_none());
    }
}
