//! Birthright policies: access an identity receives from its attributes.
//!
//! Policies are evaluated in priority order against an attribute map. A
//! policy matches when its conditions, chained left to right, hold. Matching
//! policies contribute grants and approvers; `DENY_ACCESS` wipes all grants
//! and ends the pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::types::{chain_left_to_right, LogicalOperator};
use crate::values::{compare_ordered, stringify, values_equal};

// ============================================================================
// Domain Types
// ============================================================================

/// Operator of a birthright condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BirthrightOperator {
    Equals,
    /// Substring of a string attribute, or member of an array attribute.
    Contains,
    In,
    NotIn,
    GreaterThan,
    LessThan,
}

impl BirthrightOperator {
    /// Evaluate against the identity's value. A missing or null value only
    /// satisfies `NOT_IN`.
    #[must_use]
    pub fn evaluate(&self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = match actual {
            Some(v) if !v.is_null() => v,
            _ => return matches!(self, Self::NotIn),
        };

        match self {
            Self::Equals => values_equal(actual, expected),
            Self::Contains => match actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                other => stringify(other).contains(&stringify(expected)),
            },
            Self::In => expected
                .as_array()
                .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
            Self::NotIn => expected
                .as_array()
                .is_none_or(|list| !list.iter().any(|v| values_equal(actual, v))),
            Self::GreaterThan => {
                compare_ordered(actual, expected) == Some(std::cmp::Ordering::Greater)
            }
            Self::LessThan => compare_ordered(actual, expected) == Some(std::cmp::Ordering::Less),
        }
    }
}

impl fmt::Display for BirthrightOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equals => "EQUALS",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
        };
        f.write_str(name)
    }
}

/// One condition of a birthright policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthrightCondition {
    /// Identity attribute to test.
    pub field: String,
    pub operator: BirthrightOperator,
    pub value: Value,
    /// Links this condition to the next one.
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl BirthrightCondition {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: BirthrightOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logical_operator: LogicalOperator::And,
        }
    }

    /// Link to the next condition with OR instead of AND.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }

    #[must_use]
    pub fn evaluate(&self, attributes: &BTreeMap<String, Value>) -> bool {
        self.operator.evaluate(attributes.get(&self.field), &self.value)
    }
}

/// What a matching policy does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BirthrightAction {
    GrantRole { role_id: String },
    GrantEntitlement { entitlement_id: String },
    /// Clears every candidate grant and stops evaluation.
    DenyAccess { reason: String },
    RequireApproval { approver: String },
}

/// Evaluation mode for birthright policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationMode {
    /// Stop at the first matching policy.
    FirstMatch,
    /// Union the actions of every matching policy.
    #[default]
    AllMatch,
}

/// A birthright policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthrightPolicy {
    pub id: String,
    pub name: String,
    /// Lower runs first.
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub conditions: Vec<BirthrightCondition>,
    pub actions: Vec<BirthrightAction>,
}

fn default_active() -> bool {
    true
}

impl BirthrightPolicy {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            active: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: BirthrightCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: BirthrightAction) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check the policy structure.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty id or name, no conditions, an empty
    /// condition field, or an `IN`/`NOT_IN` condition without an array value.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::validation("id", "Policy id cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("name", "Policy name cannot be empty"));
        }
        if self.conditions.is_empty() {
            return Err(EngineError::validation(
                "conditions",
                "Policy requires at least one condition",
            ));
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            if condition.field.trim().is_empty() {
                return Err(EngineError::validation(
                    format!("conditions[{i}].field"),
                    "Condition field cannot be empty",
                ));
            }
            if matches!(condition.operator, BirthrightOperator::In | BirthrightOperator::NotIn)
                && !condition.value.is_array()
            {
                return Err(EngineError::validation(
                    format!("conditions[{i}].value"),
                    format!("'{}' requires an array value", condition.operator),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a birthright pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BirthrightResult {
    pub roles: BTreeSet<String>,
    pub entitlements: BTreeSet<String>,
    pub approvers: Vec<String>,
    /// Ids of matching policies, in evaluation order.
    pub matched_policies: Vec<String>,
    pub denied: bool,
    /// Satisfied conditions over total conditions of matching policies.
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates birthright policies against identity attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BirthrightEvaluator {
    mode: EvaluationMode,
}

impl BirthrightEvaluator {
    #[must_use]
    pub fn new(mode: EvaluationMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Evaluate active policies, lowest priority number first.
    #[must_use]
    pub fn evaluate(
        &self,
        policies: &[BirthrightPolicy],
        attributes: &BTreeMap<String, Value>,
    ) -> BirthrightResult {
        let mut ordered: Vec<&BirthrightPolicy> = policies.iter().filter(|p| p.active).collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut result = BirthrightResult::default();
        let mut satisfied = 0usize;
        let mut total = 0usize;

        'policies: for policy in ordered {
            if policy.conditions.is_empty() {
                continue;
            }
            let outcomes: Vec<bool> = policy
                .conditions
                .iter()
                .map(|c| c.evaluate(attributes))
                .collect();
            let matched = chain_left_to_right(
                outcomes
                    .iter()
                    .copied()
                    .zip(policy.conditions.iter().map(|c| c.logical_operator)),
            );
            if !matched {
                continue;
            }

            satisfied += outcomes.iter().filter(|hit| **hit).count();
            total += outcomes.len();
            result.matched_policies.push(policy.id.clone());
            result.reasoning.push(format!(
                "Policy '{}' matched ({} of {} conditions)",
                policy.name,
                outcomes.iter().filter(|hit| **hit).count(),
                outcomes.len()
            ));

            for action in &policy.actions {
                match action {
                    BirthrightAction::GrantRole { role_id } => {
                        result.roles.insert(role_id.clone());
                    }
                    BirthrightAction::GrantEntitlement { entitlement_id } => {
                        result.entitlements.insert(entitlement_id.clone());
                    }
                    BirthrightAction::RequireApproval { approver } => {
                        if !result.approvers.contains(approver) {
                            result.approvers.push(approver.clone());
                        }
                    }
                    BirthrightAction::DenyAccess { reason } => {
                        result.roles.clear();
                        result.entitlements.clear();
                        result.denied = true;
                        result
                            .reasoning
                            .push(format!("Policy '{}' denied access: {reason}", policy.name));
                        tracing::debug!(policy_id = %policy.id, "Birthright access denied");
                        break 'policies;
                    }
                }
            }

            if self.mode == EvaluationMode::FirstMatch {
                break;
            }
        }

        if total > 0 {
            result.confidence = satisfied as f64 / total as f64;
        }
        result
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for birthright policy storage backends.
#[async_trait::async_trait]
pub trait BirthrightPolicyStore: Send + Sync {
    /// All policies ordered by priority, then id.
    async fn list_policies(&self) -> Result<Vec<BirthrightPolicy>>;

    async fn get_policy(&self, id: &str) -> Result<Option<BirthrightPolicy>>;

    /// Insert or replace a policy after validating it.
    async fn upsert_policy(&self, policy: BirthrightPolicy) -> Result<BirthrightPolicy>;

    async fn remove_policy(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory birthright policy store.
#[derive(Debug, Default)]
pub struct InMemoryBirthrightPolicyStore {
    policies: Arc<RwLock<HashMap<String, BirthrightPolicy>>>,
}

impl InMemoryBirthrightPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BirthrightPolicyStore for InMemoryBirthrightPolicyStore {
    async fn list_policies(&self) -> Result<Vec<BirthrightPolicy>> {
        let mut policies: Vec<_> = self.policies.read().await.values().cloned().collect();
        policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(policies)
    }

    async fn get_policy(&self, id: &str) -> Result<Option<BirthrightPolicy>> {
        Ok(self.policies.read().await.get(id).cloned())
    }

    async fn upsert_policy(&self, policy: BirthrightPolicy) -> Result<BirthrightPolicy> {
        policy.validate()?;
        self.policies
            .write()
            .await
            .insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn remove_policy(&self, id: &str) -> Result<bool> {
        Ok(self.policies.write().await.remove(id).is_some())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn engineering_policy() -> BirthrightPolicy {
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

    fn employee_policy() -> BirthrightPolicy {
        BirthrightPolicy::new("bp-employee", "All employees", 20)
            .with_condition(BirthrightCondition::new(
                "employeeType",
                BirthrightOperator::In,
                json!(["EMPLOYEE", "INTERN"]),
            ))
            .with_action(BirthrightAction::GrantRole {
                role_id: "employee".into(),
            })
    }

    #[test]
    fn test_operator_equals() {
        let op = BirthrightOperator::Equals;
        assert!(op.evaluate(Some(&json!("Engineering")), &json!("Engineering")));
        assert!(!op.evaluate(Some(&json!("Sales")), &json!("Engineering")));
        assert!(!op.evaluate(None, &json!("Engineering")));
    }

    #[test]
    fn test_operator_missing_value_only_satisfies_not_in() {
        let expected = json!(["a"]);
        assert!(BirthrightOperator::NotIn.evaluate(None, &expected));
        assert!(BirthrightOperator::NotIn.evaluate(Some(&Value::Null), &expected));
        assert!(!BirthrightOperator::In.evaluate(None, &expected));
        assert!(!BirthrightOperator::Contains.evaluate(None, &json!("a")));
        assert!(!BirthrightOperator::GreaterThan.evaluate(None, &json!(1)));
    }

    #[test]
    fn test_operator_contains() {
        let op = BirthrightOperator::Contains;
        assert!(op.evaluate(Some(&json!("Senior Engineer")), &json!("Engineer")));
        assert!(op.evaluate(Some(&json!(["vpn", "git"])), &json!("git")));
        assert!(!op.evaluate(Some(&json!("Manager")), &json!("Engineer")));
    }

    #[test]
    fn test_operator_in_and_not_in() {
        let list = json!(["Engineering", "Product"]);
        assert!(BirthrightOperator::In.evaluate(Some(&json!("Product")), &list));
        assert!(!BirthrightOperator::In.evaluate(Some(&json!("Sales")), &list));
        assert!(BirthrightOperator::NotIn.evaluate(Some(&json!("Sales")), &list));
        assert!(!BirthrightOperator::NotIn.evaluate(Some(&json!("Product")), &list));
        assert!(!BirthrightOperator::In.evaluate(Some(&json!("Product")), &json!("Product")));
    }

    #[test]
    fn test_operator_ordering() {
        assert!(BirthrightOperator::GreaterThan.evaluate(Some(&json!(7)), &json!("5")));
        assert!(BirthrightOperator::LessThan.evaluate(
            Some(&json!("2025-01-01")),
            &json!("2025-06-01")
        ));
        assert!(!BirthrightOperator::GreaterThan.evaluate(Some(&json!(5)), &json!(5)));
    }

    #[test]
    fn test_all_match_unions_grants() {
        let policies = vec![employee_policy(), engineering_policy()];
        let result = BirthrightEvaluator::default().evaluate(
            &policies,
            &attrs(&[
                ("department", json!("Engineering")),
                ("employeeType", json!("EMPLOYEE")),
            ]),
        );
        assert_eq!(result.matched_policies, vec!["bp-engineering", "bp-employee"]);
        assert!(result.roles.contains("developer"));
        assert!(result.roles.contains("employee"));
        assert!(result.entitlements.contains("git-access"));
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_match_stops() {
        let policies = vec![employee_policy(), engineering_policy()];
        let result = BirthrightEvaluator::new(EvaluationMode::FirstMatch).evaluate(
            &policies,
            &attrs(&[
                ("department", json!("Engineering")),
                ("employeeType", json!("EMPLOYEE")),
            ]),
        );
        assert_eq!(result.matched_policies, vec!["bp-engineering"]);
        assert!(!result.roles.contains("employee"));
    }

    #[test]
    fn test_no_match_has_zero_confidence() {
        let result = BirthrightEvaluator::default()
            .evaluate(&[engineering_policy()], &attrs(&[("department", json!("Sales"))]));
        assert!(result.matched_policies.is_empty());
        assert!(result.roles.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_deny_clears_grants_and_stops() {
        let deny = BirthrightPolicy::new("bp-deny", "Contractors denied", 30)
            .with_condition(BirthrightCondition::new(
                "employeeType",
                BirthrightOperator::Equals,
                "CONTRACTOR",
            ))
            .with_action(BirthrightAction::DenyAccess {
                reason: "contractors are provisioned manually".into(),
            });
        let late = BirthrightPolicy::new("bp-late", "Everyone", 40)
            .with_condition(BirthrightCondition::new(
                "employeeType",
                BirthrightOperator::NotIn,
                json!([]),
            ))
            .with_action(BirthrightAction::GrantRole {
                role_id: "late".into(),
            });

        let result = BirthrightEvaluator::default().evaluate(
            &[engineering_policy(), deny, late],
            &attrs(&[
                ("department", json!("Engineering")),
                ("employeeType", json!("CONTRACTOR")),
            ]),
        );
        assert!(result.denied);
        assert!(result.roles.is_empty());
        assert!(result.entitlements.is_empty());
        assert_eq!(result.matched_policies, vec!["bp-engineering", "bp-deny"]);
        assert!(result.reasoning.iter().any(|r| r.contains("manually")));
    }

    #[test]
    fn test_or_chain_partial_confidence() {
        let policy = BirthrightPolicy::new("bp-or", "Eng or Product", 1)
            .with_condition(
                BirthrightCondition::new("department", BirthrightOperator::Equals, "Engineering")
                    .or(),
            )
            .with_condition(BirthrightCondition::new(
                "department",
                BirthrightOperator::Equals,
                "Product",
            ))
            .with_action(BirthrightAction::RequireApproval {
                approver: "manager".into(),
            });
        let result = BirthrightEvaluator::default()
            .evaluate(&[policy], &attrs(&[("department", json!("Product"))]));
        assert_eq!(result.approvers, vec!["manager"]);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_inactive_policy_skipped() {
        let result = BirthrightEvaluator::default().evaluate(
            &[engineering_policy().inactive()],
            &attrs(&[("department", json!("Engineering"))]),
        );
        assert!(result.matched_policies.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(engineering_policy().validate().is_ok());
        assert!(BirthrightPolicy::new("bp", "No conditions", 1).validate().is_err());

        let bad_in = BirthrightPolicy::new("bp", "Bad IN", 1).with_condition(
            BirthrightCondition::new("department", BirthrightOperator::In, "Engineering"),
        );
        let err = bad_in.validate().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation { field, .. } if field == "conditions[0].value"
        ));
    }

    #[test]
    fn test_action_serialization() {
        let action = BirthrightAction::GrantRole {
            role_id: "developer".into(),
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "GRANT_ROLE", "role_id": "developer"})
        );
    }

    #[tokio::test]
    async fn test_store_orders_and_validates() {
        let store = InMemoryBirthrightPolicyStore::new();
        store.upsert_policy(employee_policy()).await.unwrap();
        store.upsert_policy(engineering_policy()).await.unwrap();
        assert!(store
            .upsert_policy(BirthrightPolicy::new("bp-x", "Empty", 1))
            .await
            .is_err());

        let ids: Vec<_> = store
            .list_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["bp-engineering", "bp-employee"]);
        assert!(store.remove_policy("bp-employee").await.unwrap());
        assert!(store.get_policy("bp-employee").await.unwrap().is_none());
    }
}
