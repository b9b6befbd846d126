//! Trigger rules: matching attribute deltas to lifecycle actions.
//!
//! - [`rule`] - rule, condition and output definitions
//! - [`evaluator`] - the evaluation pass and dry runs
//! - [`store`] - rule storage
//! - [`metrics`] - per-rule firing statistics

pub mod evaluator;
pub mod metrics;
pub mod rule;
pub mod store;

pub use evaluator::{
    ConditionTrace, EvaluationContext, RuleTestResult, SuppressedRule, SuppressionReason,
    TriggerEvaluation, TriggerEvaluator, TriggeredRule,
};
pub use metrics::{RuleMetrics, RuleMetricsStore};
pub use rule::{
    ApprovalChainEntry, ConditionOperator, EffectiveDatePolicy, Operand, TriggerCondition,
    TriggerOutputSpec, TriggerRule,
};
pub use store::{InMemoryTriggerRuleStore, TriggerRuleStore};
