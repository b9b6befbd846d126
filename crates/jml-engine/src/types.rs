//! Shared domain enums for the JML engine.
//!
//! Identifiers live in `jml-core`; this module holds the vocabulary shared by
//! more than one engine component.

use std::fmt;

use jml_core::IdentityId;
use serde::{Deserialize, Serialize};

// ============================================================================
// Lifecycle
// ============================================================================

/// Joiner, Mover or Leaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Identity is entering the organization.
    Joiner,
    /// Identity changes position, department or location.
    Mover,
    /// Identity is leaving the organization.
    Leaver,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Joiner => write!(f, "JOINER"),
            ActionType::Mover => write!(f, "MOVER"),
            ActionType::Leaver => write!(f, "LEAVER"),
        }
    }
}

/// Logical operator linking a condition to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    /// Fold `next` into `accumulator` using this operator.
    #[must_use]
    pub fn combine(self, accumulator: bool, next: bool) -> bool {
        match self {
            LogicalOperator::And => accumulator && next,
            LogicalOperator::Or => accumulator || next,
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
        }
    }
}

/// Fold a sequence of condition results strictly left to right.
///
/// Each result after the first is combined using the operator attached to the
/// *previous* condition. There is no operator precedence: `A OR B AND C` is
/// `(A OR B) AND C`. An empty sequence is `false`.
pub fn chain_left_to_right<I>(results: I) -> bool
where
    I: IntoIterator<Item = (bool, LogicalOperator)>,
{
    let mut accumulator: Option<bool> = None;
    let mut pending = LogicalOperator::And;
    for (result, link) in results {
        accumulator = Some(match accumulator {
            None => result,
            Some(acc) => pending.combine(acc, result),
        });
        pending = link;
    }
    accumulator.unwrap_or(false)
}

// ============================================================================
// Risk and Severity
// ============================================================================

/// Risk classification used for identities and computed risk scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Band a 0-100 score: >=80 critical, >=60 high, >=40 medium, else low.
    #[must_use]
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 80 => RiskLevel::Critical,
            s if s >= 60 => RiskLevel::High,
            s if s >= 40 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Severity of a mastership conflict or SoD violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ============================================================================
// Approvals
// ============================================================================

/// Who must decide an approval step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Approver {
    /// The identity's line manager.
    Manager,
    /// Any holder of the named role.
    Role(String),
    /// A specific identity.
    Identity(IdentityId),
}

impl fmt::Display for Approver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approver::Manager => write!(f, "manager"),
            Approver::Role(role) => write!(f, "role:{role}"),
            Approver::Identity(id) => write!(f, "identity:{id}"),
        }
    }
}
