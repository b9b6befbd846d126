//! Trigger rule definitions.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use jml_core::RuleId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::predicate::validate_predicate;
use crate::types::{ActionType, Approver, LogicalOperator};

/// Right-hand side of a date comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// The evaluation date.
    Today,
    Literal(Value),
}

/// Condition operator with its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals {
        value: Value,
    },
    NotEquals {
        value: Value,
    },
    /// Before/after pair. Either side may be omitted.
    Transition {
        #[serde(default)]
        from: Option<Value>,
        #[serde(default)]
        to: Option<Value>,
    },
    /// After-value, as a date, falls between now and `days` days ahead.
    WithinWindow {
        days: i64,
    },
    Before {
        value: Operand,
    },
    After {
        value: Operand,
    },
    Regex {
        pattern: String,
    },
    InList {
        values: Vec<Value>,
    },
    /// Predicate in the fixed CUSTOM grammar.
    Custom {
        predicate: String,
    },
}

impl ConditionOperator {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ConditionOperator::Equals { .. } => "EQUALS",
            ConditionOperator::NotEquals { .. } => "NOT_EQUALS",
            ConditionOperator::Transition { .. } => "TRANSITION",
            ConditionOperator::WithinWindow { .. } => "WITHIN_WINDOW",
            ConditionOperator::Before { .. } => "BEFORE",
            ConditionOperator::After { .. } => "AFTER",
            ConditionOperator::Regex { .. } => "REGEX",
            ConditionOperator::InList { .. } => "IN_LIST",
            ConditionOperator::Custom { .. } => "CUSTOM",
        }
    }

    #[must_use]
    pub fn transition(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        ConditionOperator::Transition {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    #[must_use]
    pub fn equals(value: impl Into<Value>) -> Self {
        ConditionOperator::Equals {
            value: value.into(),
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One condition of a trigger rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub attribute: String,
    #[serde(flatten)]
    pub operator: ConditionOperator,
    /// Links this condition to the next one.
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl TriggerCondition {
    #[must_use]
    pub fn new(attribute: impl Into<String>, operator: ConditionOperator) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            logical_operator: LogicalOperator::And,
        }
    }

    /// Link to the next condition with OR.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }
}

/// How the request's effective date is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveDatePolicy {
    FromAttribute {
        attribute: String,
    },
    NextBusinessDay {
        #[serde(default)]
        time_of_day: Option<NaiveTime>,
    },
    Explicit {
        date: NaiveDate,
    },
    #[default]
    Immediate,
}

/// An explicit approval step configured on a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChainEntry {
    pub step: u32,
    pub approver: Approver,
}

/// What a firing rule produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutputSpec {
    pub action_type: ActionType,
    #[serde(default)]
    pub effective_date: EffectiveDatePolicy,
    #[serde(default)]
    pub auto_submit: bool,
    #[serde(default)]
    pub require_manager_approval: bool,
    #[serde(default)]
    pub approval_chain: Vec<ApprovalChainEntry>,
    /// Let gating SoD violations hold back auto-submission.
    #[serde(default)]
    pub sod_precheck: bool,
    /// Risk total above which an admin approval step is added.
    #[serde(default)]
    pub risk_threshold: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TriggerOutputSpec {
    #[must_use]
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            effective_date: EffectiveDatePolicy::Immediate,
            auto_submit: false,
            require_manager_approval: false,
            approval_chain: Vec::new(),
            sod_precheck: false,
            risk_threshold: None,
            notes: None,
        }
    }

    #[must_use]
    pub fn with_effective_date(mut self, policy: EffectiveDatePolicy) -> Self {
        self.effective_date = policy;
        self
    }

    #[must_use]
    pub fn auto_submitted(mut self) -> Self {
        self.auto_submit = true;
        self
    }

    #[must_use]
    pub fn with_manager_approval(mut self) -> Self {
        self.require_manager_approval = true;
        self
    }

    #[must_use]
    pub fn with_approval_step(mut self, step: u32, approver: Approver) -> Self {
        self.approval_chain.push(ApprovalChainEntry { step, approver });
        self
    }

    #[must_use]
    pub fn with_sod_precheck(mut self) -> Self {
        self.sod_precheck = true;
        self
    }

    #[must_use]
    pub fn with_risk_threshold(mut self, threshold: u32) -> Self {
        self.risk_threshold = Some(threshold);
        self
    }
}

fn default_active() -> bool {
    true
}

/// A prioritized rule mapping attribute changes to lifecycle actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Lower fires first.
    #[serde(default)]
    pub priority: i32,
    pub conditions: Vec<TriggerCondition>,
    pub output: TriggerOutputSpec,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TriggerRule {
    #[must_use]
    pub fn new(
        id: impl Into<RuleId>,
        name: impl Into<String>,
        priority: i32,
        conditions: Vec<TriggerCondition>,
        output: TriggerOutputSpec,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            active: true,
            priority,
            conditions,
            output,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check the rule before it is stored.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("name", "rule name cannot be empty"));
        }
        if self.conditions.is_empty() {
            return Err(EngineError::validation(
                "conditions",
                "rule must have at least one condition",
            ));
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            let field = format!("conditions[{index}]");
            if condition.attribute.trim().is_empty() {
                return Err(EngineError::validation(
                    format!("{field}.attribute"),
                    "attribute name cannot be empty",
                ));
            }
            match &condition.operator {
                ConditionOperator::WithinWindow { days } if *days < 0 => {
                    return Err(EngineError::validation(
                        format!("{field}.days"),
                        format!("window must be non-negative, got {days}"),
                    ));
                }
                ConditionOperator::Regex { pattern } => {
                    regex::Regex::new(pattern).map_err(|e| {
                        EngineError::validation(format!("{field}.pattern"), e.to_string())
                    })?;
                }
                ConditionOperator::Custom { predicate } => {
                    validate_predicate(predicate).map_err(|e| {
                        EngineError::validation(format!("{field}.predicate"), e.to_string())
                    })?;
                }
                _ => {}
            }
        }

        if let Some(entry) = self.output.approval_chain.iter().find(|e| e.step == 0) {
            return Err(EngineError::validation(
                "output.approval_chain",
                format!("approval steps are numbered from 1, got 0 for {}", entry.approver),
            ));
        }
        if let Some(threshold) = self.output.risk_threshold {
            if threshold > 100 {
                return Err(EngineError::validation(
                    "output.risk_threshold",
                    format!("risk threshold {threshold} exceeds 100"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn joiner_rule() -> TriggerRule {
        TriggerRule::new(
            "rule-joiner",
            "Joiner - Employee Hire",
            10,
            vec![
                TriggerCondition::new(
                    "employmentStatus",
                    ConditionOperator::transition("PENDING", "ACTIVE"),
                ),
                TriggerCondition::new("startDate", ConditionOperator::WithinWindow { days: 14 }),
            ],
            TriggerOutputSpec::new(ActionType::Joiner).with_manager_approval(),
        )
    }

    #[test]
    fn test_valid_rule() {
        assert!(joiner_rule().validate().is_ok());
    }

    #[test]
    fn test_condition_json_shape() {
        let condition = TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::transition("PENDING", "ACTIVE"),
        );
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(
            json,
            json!({
                "attribute": "employmentStatus",
                "operator": "TRANSITION",
                "from": "PENDING",
                "to": "ACTIVE",
                "logical_operator": "AND"
            })
        );
    }

    #[test]
    fn test_condition_from_json() {
        let condition: TriggerCondition = serde_json::from_value(json!({
            "attribute": "terminationDate",
            "operator": "BEFORE",
            "value": "today",
            "logical_operator": "OR"
        }))
        .unwrap();
        assert_eq!(
            condition.operator,
            ConditionOperator::Before {
                value: Operand::Today
            }
        );
        assert_eq!(condition.logical_operator, LogicalOperator::Or);

        let literal: TriggerCondition = serde_json::from_value(json!({
            "attribute": "startDate",
            "operator": "AFTER",
            "value": {"literal": "2026-01-01"}
        }))
        .unwrap();
        assert_eq!(
            literal.operator,
            ConditionOperator::After {
                value: Operand::Literal(json!("2026-01-01"))
            }
        );
        assert_eq!(literal.logical_operator, LogicalOperator::And);
    }

    #[test]
    fn test_effective_date_policy_json() {
        let policy: EffectiveDatePolicy = serde_json::from_value(json!({
            "policy": "FROM_ATTRIBUTE",
            "attribute": "startDate"
        }))
        .unwrap();
        assert_eq!(
            policy,
            EffectiveDatePolicy::FromAttribute {
                attribute: "startDate".into()
            }
        );
        let next: EffectiveDatePolicy =
            serde_json::from_value(json!({"policy": "NEXT_BUSINESS_DAY"})).unwrap();
        assert_eq!(next, EffectiveDatePolicy::NextBusinessDay { time_of_day: None });
    }

    #[test]
    fn test_rejects_empty_name_and_conditions() {
        let mut rule = joiner_rule();
        rule.name = " ".into();
        assert!(rule.validate().is_err());

        let mut rule = joiner_rule();
        rule.conditions.clear();
        assert!(matches!(
            rule.validate(),
            Err(EngineError::Validation { field, .. }) if field == "conditions"
        ));
    }

    #[test]
    fn test_rejects_bad_regex() {
        let mut rule = joiner_rule();
        rule.conditions.push(TriggerCondition::new(
            "department",
            ConditionOperator::Regex {
                pattern: "([unclosed".into(),
            },
        ));
        assert!(matches!(
            rule.validate(),
            Err(EngineError::Validation { field, .. }) if field == "conditions[2].pattern"
        ));
    }

    #[test]
    fn test_rejects_bad_custom_predicate() {
        let mut rule = joiner_rule();
        rule.conditions[0].operator = ConditionOperator::Custom {
            predicate: "contains(".into(),
        };
        assert!(matches!(
            rule.validate(),
            Err(EngineError::Validation { field, .. }) if field == "conditions[0].predicate"
        ));
    }

    #[test]
    fn test_rejects_deeply_nested_custom_predicate() {
        let mut rule = joiner_rule();
        rule.conditions[0].operator = ConditionOperator::Custom {
            predicate: format!("{}contains('a')", "NOT ".repeat(200_000)),
        };
        assert!(matches!(
            rule.validate(),
            Err(EngineError::Validation { field, .. }) if field == "conditions[0].predicate"
        ));

        rule.conditions[0].operator = ConditionOperator::Custom {
            predicate: format!("{}contains('a'){}", "(".repeat(500), ")".repeat(500)),
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_window() {
        let mut rule = joiner_rule();
        rule.conditions[1].operator = ConditionOperator::WithinWindow { days: -1 };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_rejects_step_zero_and_threshold_over_100() {
        let mut rule = joiner_rule();
        rule.output = rule
            .output
            .clone()
            .with_approval_step(0, Approver::Role("hr".into()));
        assert!(rule.validate().is_err());

        let mut rule = joiner_rule();
        rule.output = rule.output.clone().with_risk_threshold(101);
        assert!(rule.validate().is_err());
    }
}
