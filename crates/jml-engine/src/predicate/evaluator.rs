//! Predicate evaluation against a single attribute value.

use chrono::NaiveDate;
use serde_json::Value;

use super::ast::{DateReference, Predicate};
use crate::values::{parse_date, stringify};

/// Error during predicate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// `dateDiff` applied to a value that is not a date.
    NotADate(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::NotADate(raw) => write!(f, "Value '{raw}' is not a date"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Value and date a predicate is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub value: &'a Value,
    pub today: NaiveDate,
}

impl<'a> EvalContext<'a> {
    #[must_use]
    pub fn new(value: &'a Value, today: NaiveDate) -> Self {
        Self { value, today }
    }
}

/// Predicate evaluator.
pub struct Evaluator;

impl Evaluator {
    /// Evaluate `predicate`. `AND`/`OR` short-circuit.
    pub fn evaluate(predicate: &Predicate, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
        match predicate {
            Predicate::Contains(needle) => Ok(stringify(ctx.value).contains(needle.as_str())),
            Predicate::StartsWith(prefix) => {
                Ok(stringify(ctx.value).starts_with(prefix.as_str()))
            }
            Predicate::EndsWith(suffix) => Ok(stringify(ctx.value).ends_with(suffix.as_str())),
            Predicate::DateDiff {
                reference,
                operator,
                days,
            } => {
                let date =
                    parse_date(ctx.value).ok_or_else(|| EvalError::NotADate(stringify(ctx.value)))?;
                let reference = match reference {
                    DateReference::Today => ctx.today,
                    DateReference::Date(d) => *d,
                };
                let diff = (date - reference).num_days();
                Ok(operator.apply(diff, *days))
            }
            Predicate::And(left, right) => {
                Ok(Self::evaluate(left, ctx)? && Self::evaluate(right, ctx)?)
            }
            Predicate::Or(left, right) => {
                Ok(Self::evaluate(left, ctx)? || Self::evaluate(right, ctx)?)
            }
            Predicate::Not(inner) => Ok(!Self::evaluate(inner, ctx)?),
            Predicate::Group(inner) => Self::evaluate(inner, ctx),
        }
    }
}
