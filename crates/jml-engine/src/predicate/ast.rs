//! Syntax tree for CUSTOM trigger predicates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A parsed predicate over one attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `contains('x')`: stringified value contains `x`.
    Contains(String),
    /// `startsWith('x')`.
    StartsWith(String),
    /// `endsWith('x')`.
    EndsWith(String),
    /// `dateDiff(ref) <op> n`: whole days from `ref` to the value's date.
    DateDiff {
        reference: DateReference,
        operator: CompareOp,
        days: i64,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Parenthesized predicate.
    Group(Box<Predicate>),
}

/// Reference date for `dateDiff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateReference {
    /// The evaluation date.
    Today,
    Date(NaiveDate),
}

/// Integer comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    #[must_use]
    pub fn apply(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Equal => left == right,
            CompareOp::NotEqual => left != right,
            CompareOp::LessThan => left < right,
            CompareOp::LessThanOrEqual => left <= right,
            CompareOp::GreaterThan => left > right,
            CompareOp::GreaterThanOrEqual => left >= right,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Equal => write!(f, "="),
            CompareOp::NotEqual => write!(f, "!="),
            CompareOp::LessThan => write!(f, "<"),
            CompareOp::LessThanOrEqual => write!(f, "<="),
            CompareOp::GreaterThan => write!(f, ">"),
            CompareOp::GreaterThanOrEqual => write!(f, ">="),
        }
    }
}

impl std::fmt::Display for DateReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateReference::Today => write!(f, "'today'"),
            DateReference::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Contains(s) => write!(f, "contains('{s}')"),
            Predicate::StartsWith(s) => write!(f, "startsWith('{s}')"),
            Predicate::EndsWith(s) => write!(f, "endsWith('{s}')"),
            Predicate::DateDiff {
                reference,
                operator,
                days,
            } => write!(f, "dateDiff({reference}) {operator} {days}"),
            Predicate::And(l, r) => write!(f, "{l} AND {r}"),
            Predicate::Or(l, r) => write!(f, "{l} OR {r}"),
            Predicate::Not(inner) => write!(f, "NOT {inner}"),
            Predicate::Group(inner) => write!(f, "({inner})"),
        }
    }
}
