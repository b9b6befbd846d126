//! Access policy: birthright grants and separation-of-duties checks.

pub mod birthright;
pub mod sod;

pub use birthright::{
    BirthrightAction, BirthrightCondition, BirthrightEvaluator, BirthrightOperator,
    BirthrightPolicy, BirthrightPolicyStore, BirthrightResult, EvaluationMode,
    InMemoryBirthrightPolicyStore,
};
pub use sod::{
    gates_auto_submit, InMemorySodRuleStore, SodConflictType, SodEvaluator, SodRule,
    SodRuleStore, SodViolation,
};
