//! Trigger rule evaluation.
//!
//! Every active rule is evaluated independently against one attribute delta.
//! Conditions chain strictly left to right: each result is combined with the
//! accumulator using the previous condition's logical operator, with no
//! precedence between AND and OR.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use jml_core::{CorrelationId, DeltaId, RuleId};
use serde::{Deserialize, Serialize};
use regex::Regex;
use serde_json::Value;

use super::rule::{ConditionOperator, Operand, TriggerCondition, TriggerOutputSpec, TriggerRule};
use crate::delta::AttributeDelta;
use crate::identity::IdentitySnapshot;
use crate::predicate::{eval_predicate, EvalContext};
use crate::types::{chain_left_to_right, LogicalOperator};
use crate::values::{parse_date, parse_instant, stringify, values_equal};

const SECONDS_PER_DAY: i64 = 86_400;

/// Inputs for one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub delta: &'a AttributeDelta,
    /// Current attributes of the identity. Conditions naming another
    /// attribute read it here; without a snapshot they evaluate false.
    pub identity: Option<&'a IdentitySnapshot>,
    pub now: DateTime<Utc>,
    /// Whether the delta's source won mastership for the attribute.
    pub authoritative: bool,
}

impl<'a> EvaluationContext<'a> {
    #[must_use]
    pub fn new(delta: &'a AttributeDelta, now: DateTime<Utc>) -> Self {
        Self {
            delta,
            identity: None,
            now,
            authoritative: true,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: &'a IdentitySnapshot) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn non_authoritative(mut self) -> Self {
        self.authoritative = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub priority: i32,
    pub output: TriggerOutputSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuppressionReason {
    ConditionsNotMet,
    /// The delta's source does not master the attribute.
    NonAuthoritativeSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub reason: SuppressionReason,
}

/// Result of evaluating one delta against the active rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvaluation {
    pub delta_id: DeltaId,
    pub correlation_id: CorrelationId,
    /// Ordered by priority, then rule id.
    pub triggered: Vec<TriggeredRule>,
    pub suppressed: Vec<SuppressedRule>,
}

impl TriggerEvaluation {
    /// Output specs of the triggered rules, in firing order.
    pub fn action_specs(&self) -> impl Iterator<Item = &TriggerOutputSpec> {
        self.triggered.iter().map(|t| &t.output)
    }

    #[must_use]
    pub fn fired(&self, rule_id: &RuleId) -> bool {
        self.triggered.iter().any(|t| &t.rule_id == rule_id)
    }
}

/// One condition's outcome in a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTrace {
    pub index: usize,
    pub attribute: String,
    pub operator: String,
    pub before: Value,
    pub after: Value,
    pub result: bool,
    pub logical_operator: LogicalOperator,
}

/// Dry-run outcome of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTestResult {
    pub rule_id: RuleId,
    pub fired: bool,
    pub conditions: Vec<ConditionTrace>,
}

/// Trigger rule evaluator. REGEX patterns are compiled once and reused.
#[derive(Debug, Default)]
pub struct TriggerEvaluator {
    regexes: RwLock<HashMap<String, Regex>>,
}

impl TriggerEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn compiled_patterns(&self) -> usize {
        self.regexes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn regex_matches(&self, pattern: &str, text: &str) -> bool {
        if let Some(re) = self
            .regexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(pattern)
        {
            return re.is_match(text);
        }
        match Regex::new(pattern) {
            Ok(re) => {
                let matched = re.is_match(text);
                self.regexes
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(pattern.to_string(), re);
                matched
            }
            Err(e) => {
                tracing::error!(pattern = %pattern, error = %e, "Invalid REGEX condition");
                false
            }
        }
    }

    /// Evaluate every active rule against the delta.
    #[must_use]
    pub fn evaluate(
        &self,
        ctx: &EvaluationContext<'_>,
        rules: &[TriggerRule],
    ) -> TriggerEvaluation {
        let mut triggered = Vec::new();
        let mut suppressed = Vec::new();

        for rule in rules.iter().filter(|r| r.active) {
            let reason = if !ctx.authoritative {
                Some(SuppressionReason::NonAuthoritativeSource)
            } else if self.trace_rule(ctx, rule).fired {
                None
            } else {
                Some(SuppressionReason::ConditionsNotMet)
            };

            match reason {
                None => triggered.push(TriggeredRule {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    priority: rule.priority,
                    output: rule.output.clone(),
                }),
                Some(reason) => suppressed.push(SuppressedRule {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    reason,
                }),
            }
        }

        triggered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        tracing::debug!(
            delta_id = %ctx.delta.id,
            attribute = %ctx.delta.attribute,
            triggered = triggered.len(),
            suppressed = suppressed.len(),
            "Trigger rules evaluated"
        );

        TriggerEvaluation {
            delta_id: ctx.delta.id,
            correlation_id: ctx.delta.correlation_id.clone(),
            triggered,
            suppressed,
        }
    }

    /// Evaluate one rule and record each condition's outcome.
    #[must_use]
    pub fn trace_rule(&self, ctx: &EvaluationContext<'_>, rule: &TriggerRule) -> RuleTestResult {
        let conditions: Vec<ConditionTrace> = rule
            .conditions
            .iter()
            .enumerate()
            .map(|(index, condition)| self.trace_condition(ctx, index, condition))
            .collect();
        let fired =
            chain_left_to_right(conditions.iter().map(|c| (c.result, c.logical_operator)));
        RuleTestResult {
            rule_id: rule.id.clone(),
            fired,
            conditions,
        }
    }

    fn trace_condition(
        &self,
        ctx: &EvaluationContext<'_>,
        index: usize,
        condition: &TriggerCondition,
    ) -> ConditionTrace {
        let operands = if condition.attribute == ctx.delta.attribute {
            Some((ctx.delta.before.clone(), ctx.delta.after.clone()))
        } else {
            ctx.identity.map(|identity| {
                let current = identity
                    .attribute(&condition.attribute)
                    .cloned()
                    .unwrap_or(Value::Null);
                (current.clone(), current)
            })
        };

        let (before, after, result) = match operands {
            Some((before, after)) => {
                let result = self.apply(ctx, &condition.operator, &before, &after);
                (before, after, result)
            }
            None => (Value::Null, Value::Null, false),
        };

        ConditionTrace {
            index,
            attribute: condition.attribute.clone(),
            operator: condition.operator.name().to_string(),
            before,
            after,
            result,
            logical_operator: condition.logical_operator,
        }
    }

    fn apply(
        &self,
        ctx: &EvaluationContext<'_>,
        operator: &ConditionOperator,
        before: &Value,
        after: &Value,
    ) -> bool {
        match operator {
            ConditionOperator::Equals { value } => values_equal(after, value),
            ConditionOperator::NotEquals { value } => !values_equal(after, value),
            ConditionOperator::Transition { from, to } => match (from, to) {
                (Some(from), Some(to)) => values_equal(before, from) && values_equal(after, to),
                (None, Some(to)) => values_equal(after, to),
                (Some(from), None) => values_equal(before, from) && !values_equal(before, after),
                (None, None) => !values_equal(before, after),
            },
            ConditionOperator::WithinWindow { days } => parse_instant(after)
                .map(|target| {
                    let ahead = ceil_days((target - ctx.now).num_seconds());
                    (0..=*days).contains(&ahead)
                })
                .unwrap_or(false),
            ConditionOperator::Before { value } => self
                .compare_dates(ctx, after, value)
                .is_some_and(|ordering| ordering.is_lt()),
            ConditionOperator::After { value } => self
                .compare_dates(ctx, after, value)
                .is_some_and(|ordering| ordering.is_gt()),
            ConditionOperator::Regex { pattern } => self.regex_matches(pattern, &stringify(after)),
            ConditionOperator::InList { values } => values.iter().any(|v| values_equal(after, v)),
            ConditionOperator::Custom { predicate } => {
                let eval_ctx = EvalContext::new(after, ctx.now.date_naive());
                match eval_predicate(predicate, &eval_ctx) {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(
                            predicate = %predicate,
                            error = %e,
                            "CUSTOM predicate failed, treating as false"
                        );
                        false
                    }
                }
            }
        }
    }

    fn compare_dates(
        &self,
        ctx: &EvaluationContext<'_>,
        after: &Value,
        operand: &Operand,
    ) -> Option<std::cmp::Ordering> {
        let date = parse_date(after)?;
        let reference = match operand {
            Operand::Today => ctx.now.date_naive(),
            Operand::Literal(value) => parse_date(value)?,
        };
        Some(date.cmp(&reference))
    }
}

/// Whole days, rounded up.
fn ceil_days(seconds: i64) -> i64 {
    let days = seconds.div_euclid(SECONDS_PER_DAY);
    if seconds.rem_euclid(SECONDS_PER_DAY) > 0 {
        days + 1
    } else {
        days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::rule::EffectiveDatePolicy;
    use crate::types::ActionType;
    use chrono::{Duration, TimeZone};
    use jml_core::{IdentityId, SourceId};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
    }

    fn delta(attribute: &str, before: Value, after: Value) -> AttributeDelta {
        AttributeDelta::new(
            IdentityId::new("identity-001"),
            attribute,
            before,
            after,
            SourceId::new("isr-hris"),
            CorrelationId::new("corr-1"),
            now(),
        )
    }

    fn rule(id: &str, priority: i32, conditions: Vec<TriggerCondition>) -> TriggerRule {
        TriggerRule::new(
            id,
            id,
            priority,
            conditions,
            TriggerOutputSpec::new(ActionType::Joiner),
        )
    }

    fn fires(delta: &AttributeDelta, condition: TriggerCondition) -> bool {
        let ctx = EvaluationContext::new(delta, now());
        TriggerEvaluator::new()
            .trace_rule(&ctx, &rule("r", 0, vec![condition]))
            .fired
    }

    fn start_date_in(days: i64) -> AttributeDelta {
        let date = (now() + Duration::days(days)).date_naive();
        delta("startDate", Value::Null, json!(date.to_string()))
    }

    #[test]
    fn test_transition_pending_to_active() {
        let condition = TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::transition("PENDING", "ACTIVE"),
        );
        assert!(fires(
            &delta("employmentStatus", json!("PENDING"), json!("ACTIVE")),
            condition.clone()
        ));
        assert!(!fires(
            &delta("employmentStatus", json!("ACTIVE"), json!("ACTIVE")),
            condition
        ));
    }

    #[test]
    fn test_transition_partial_forms() {
        let to_only = TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::Transition {
                from: None,
                to: Some(json!("TERMINATED")),
            },
        );
        assert!(fires(
            &delta("employmentStatus", json!("ACTIVE"), json!("TERMINATED")),
            to_only
        ));

        let any_change = TriggerCondition::new(
            "department",
            ConditionOperator::Transition { from: None, to: None },
        );
        assert!(fires(&delta("department", json!("Sales"), json!("Eng")), any_change.clone()));
        assert!(!fires(&delta("department", json!("Eng"), json!("Eng")), any_change));
    }

    #[test]
    fn test_within_window_boundaries() {
        let condition =
            TriggerCondition::new("startDate", ConditionOperator::WithinWindow { days: 14 });
        assert!(fires(&start_date_in(0), condition.clone()));
        assert!(fires(&start_date_in(7), condition.clone()));
        assert!(fires(&start_date_in(14), condition.clone()));
        assert!(!fires(&start_date_in(15), condition.clone()));
        assert!(!fires(&start_date_in(-1), condition));
    }

    #[test]
    fn test_within_window_rounds_partial_days_up() {
        let ctx_now = now() + Duration::hours(10);
        let delta = start_date_in(14);
        let condition =
            TriggerCondition::new("startDate", ConditionOperator::WithinWindow { days: 14 });
        let ctx = EvaluationContext::new(&delta, ctx_now);
        // 13 days 14 hours ahead rounds up to 14
        assert!(TriggerEvaluator::new()
            .trace_rule(&ctx, &rule("r", 0, vec![condition]))
            .fired);
    }

    #[test]
    fn test_within_window_non_date() {
        let condition =
            TriggerCondition::new("startDate", ConditionOperator::WithinWindow { days: 14 });
        assert!(!fires(&delta("startDate", Value::Null, json!("soon")), condition));
    }

    #[test]
    fn test_before_and_after() {
        let before_today = TriggerCondition::new(
            "terminationDate",
            ConditionOperator::Before {
                value: Operand::Today,
            },
        );
        let past = delta("terminationDate", Value::Null, json!("2026-03-01"));
        let future = delta("terminationDate", Value::Null, json!("2026-03-03"));
        assert!(fires(&past, before_today.clone()));
        assert!(!fires(&future, before_today));

        let after_literal = TriggerCondition::new(
            "terminationDate",
            ConditionOperator::After {
                value: Operand::Literal(json!("2026-03-02")),
            },
        );
        assert!(fires(&future, after_literal.clone()));
        assert!(!fires(&past, after_literal));
    }

    #[test]
    fn test_regex_and_in_list() {
        let regex = TriggerCondition::new(
            "jobTitle",
            ConditionOperator::Regex {
                pattern: "^Senior ".into(),
            },
        );
        assert!(fires(&delta("jobTitle", Value::Null, json!("Senior Engineer")), regex.clone()));
        assert!(!fires(&delta("jobTitle", Value::Null, json!("Engineer")), regex));

        let in_list = TriggerCondition::new(
            "location",
            ConditionOperator::InList {
                values: vec![json!("Berlin"), json!("Paris")],
            },
        );
        assert!(fires(&delta("location", Value::Null, json!("Paris")), in_list.clone()));
        assert!(!fires(&delta("location", Value::Null, json!("Rome")), in_list));
    }

    #[test]
    fn test_equals_compares_stringified() {
        let condition = TriggerCondition::new("costCenter", ConditionOperator::equals("5"));
        assert!(fires(&delta("costCenter", json!(4), json!(5)), condition));
    }

    #[test]
    fn test_custom_predicate() {
        let condition = TriggerCondition::new(
            "department",
            ConditionOperator::Custom {
                predicate: "startsWith('Eng') AND NOT contains('Support')".into(),
            },
        );
        assert!(fires(
            &delta("department", json!("Sales"), json!("Engineering")),
            condition.clone()
        ));
        assert!(!fires(
            &delta("department", json!("Sales"), json!("Engineering Support")),
            condition
        ));
    }

    #[test]
    fn test_malformed_custom_predicate_is_false() {
        let condition = TriggerCondition::new(
            "department",
            ConditionOperator::Custom {
                predicate: "contains(".into(),
            },
        );
        assert!(!fires(&delta("department", json!("a"), json!("b")), condition));
    }

    #[test]
    fn test_deeply_nested_custom_predicate_is_false() {
        let condition = TriggerCondition::new(
            "department",
            ConditionOperator::Custom {
                predicate: format!("{}contains('a')", "NOT ".repeat(200_000)),
            },
        );
        assert!(!fires(&delta("department", json!("a"), json!("b")), condition));
    }

    #[test]
    fn test_regex_is_compiled_once() {
        let evaluator = TriggerEvaluator::new();
        let rules = vec![rule(
            "r",
            0,
            vec![TriggerCondition::new(
                "jobTitle",
                ConditionOperator::Regex {
                    pattern: "^Senior ".into(),
                },
            )],
        )];
        for title in ["Senior Engineer", "Engineer", "Senior Analyst"] {
            let d = delta("jobTitle", json!("Intern"), json!(title));
            let ctx = EvaluationContext::new(&d, now());
            let fired = !evaluator.evaluate(&ctx, &rules).triggered.is_empty();
            assert_eq!(fired, title.starts_with("Senior"));
        }
        assert_eq!(evaluator.compiled_patterns(), 1);
    }

    #[test]
    fn test_custom_eval_error_is_false() {
        let condition = TriggerCondition::new(
            "department",
            ConditionOperator::Custom {
                predicate: "dateDiff('today') > 0".into(),
            },
        );
        assert!(!fires(&delta("department", json!("a"), json!("Sales")), condition));
    }

    #[test]
    fn test_other_attribute_without_snapshot_is_false() {
        let d = delta("employmentStatus", json!("PENDING"), json!("ACTIVE"));
        let condition = TriggerCondition::new("department", ConditionOperator::equals("Sales"));
        assert!(!fires(&d, condition));
    }

    #[test]
    fn test_other_attribute_reads_snapshot() {
        let d = delta("employmentStatus", json!("PENDING"), json!("ACTIVE"));
        let identity = IdentitySnapshot::new(IdentityId::new("identity-001"))
            .with_attribute("department", "Sales");
        let ctx = EvaluationContext::new(&d, now()).with_identity(&identity);
        let result = TriggerEvaluator::new().trace_rule(
            &ctx,
            &rule(
                "r",
                0,
                vec![
                    TriggerCondition::new(
                        "employmentStatus",
                        ConditionOperator::transition("PENDING", "ACTIVE"),
                    ),
                    TriggerCondition::new("department", ConditionOperator::equals("Sales")),
                ],
            ),
        );
        assert!(result.fired);
        assert_eq!(result.conditions[1].before, json!("Sales"));
        assert_eq!(result.conditions[1].after, json!("Sales"));
    }

    #[test]
    fn test_chaining_is_left_to_right() {
        // A OR B AND C with A=true, B=false, C=false
        // left to right: (true OR false) AND false = false
        // precedence would give: true OR (false AND false) = true
        let d = delta("department", json!("Sales"), json!("Eng"));
        let a = TriggerCondition::new("department", ConditionOperator::equals("Eng")).or();
        let b = TriggerCondition::new("department", ConditionOperator::equals("HR"));
        let c = TriggerCondition::new("department", ConditionOperator::equals("Ops"));
        let ctx = EvaluationContext::new(&d, now());
        let result = TriggerEvaluator::new().trace_rule(&ctx, &rule("r", 0, vec![a, b, c]));
        assert!(!result.fired);
        assert_eq!(
            result.conditions.iter().map(|c| c.result).collect::<Vec<_>>(),
            vec![true, false, false]
        );
    }

    #[test]
    fn test_evaluate_orders_and_suppresses() {
        let d = delta("employmentStatus", json!("PENDING"), json!("ACTIVE"));
        let matching = TriggerCondition::new(
            "employmentStatus",
            ConditionOperator::transition("PENDING", "ACTIVE"),
        );
        let rules = vec![
            rule("rule-c", 5, vec![matching.clone()]),
            rule("rule-b", 1, vec![matching.clone()]),
            rule("rule-a", 5, vec![matching.clone()]),
            rule(
                "rule-miss",
                0,
                vec![TriggerCondition::new(
                    "employmentStatus",
                    ConditionOperator::equals("TERMINATED"),
                )],
            ),
            rule("rule-off", 0, vec![matching]).inactive(),
        ];

        let ctx = EvaluationContext::new(&d, now());
        let evaluation = TriggerEvaluator::new().evaluate(&ctx, &rules);
        let order: Vec<_> = evaluation
            .triggered
            .iter()
            .map(|t| t.rule_id.to_string())
            .collect();
        assert_eq!(order, vec!["rule-b", "rule-a", "rule-c"]);
        assert_eq!(evaluation.suppressed.len(), 1);
        assert_eq!(
            evaluation.suppressed[0].reason,
            SuppressionReason::ConditionsNotMet
        );
        assert_eq!(evaluation.correlation_id, CorrelationId::new("corr-1"));
        assert_eq!(evaluation.action_specs().count(), 3);
    }

    #[test]
    fn test_non_authoritative_suppresses_all() {
        let d = delta("employmentStatus", json!("PENDING"), json!("ACTIVE"));
        let rules = vec![rule(
            "rule-a",
            0,
            vec![TriggerCondition::new(
                "employmentStatus",
                ConditionOperator::transition("PENDING", "ACTIVE"),
            )],
        )];
        let ctx = EvaluationContext::new(&d, now()).non_authoritative();
        let evaluation = TriggerEvaluator::new().evaluate(&ctx, &rules);
        assert!(evaluation.triggered.is_empty());
        assert_eq!(
            evaluation.suppressed[0].reason,
            SuppressionReason::NonAuthoritativeSource
        );
    }

    #[test]
    fn test_triggered_carries_output_spec() {
        let d = delta("employmentStatus", json!("ACTIVE"), json!("TERMINATED"));
        let mut leaver = rule(
            "rule-leaver",
            0,
            vec![TriggerCondition::new(
                "employmentStatus",
                ConditionOperator::equals("TERMINATED"),
            )],
        );
        leaver.output = TriggerOutputSpec::new(ActionType::Leaver)
            .with_effective_date(EffectiveDatePolicy::Immediate)
            .auto_submitted();
        let ctx = EvaluationContext::new(&d, now());
        let evaluation = TriggerEvaluator::new().evaluate(&ctx, &[leaver]);
        let spec = evaluation.action_specs().next().unwrap();
        assert_eq!(spec.action_type, ActionType::Leaver);
        assert!(spec.auto_submit);
    }
}
