//! Risk scoring for lifecycle actions.
//!
//! The score is the sum of four factors, capped at 100:
//!
//! | Factor | Points |
//! |--------|--------|
//! | Action type | JOINER 20, MOVER 40, LEAVER 10 |
//! | Attribute changed | per-attribute table, default 10 |
//! | Identity risk | LOW 0, MEDIUM 20, HIGH 40, CRITICAL 60 |
//! | SoD violations | 15 per violation |
//!
//! Each factor carries a weight for reporting. Weights are not applied to the
//! total.
//!
//! # Example
//!
//! ```rust
//! use jml_engine::config::EngineConfig;
//! use jml_engine::risk::RiskScorer;
//! use jml_engine::types::{ActionType, RiskLevel};
//!
//! let scorer = RiskScorer::from_config(&EngineConfig::default());
//! let score = scorer.score(ActionType::Joiner, "startDate", RiskLevel::Low, 0);
//! assert_eq!(score.total, 30);
//! assert_eq!(score.level, RiskLevel::Low);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::{ActionType, RiskLevel};

/// Factor points and reporting weights.
pub mod weights {
    pub const JOINER_POINTS: u32 = 20;
    pub const MOVER_POINTS: u32 = 40;
    pub const LEAVER_POINTS: u32 = 10;

    pub const IDENTITY_LOW_POINTS: u32 = 0;
    pub const IDENTITY_MEDIUM_POINTS: u32 = 20;
    pub const IDENTITY_HIGH_POINTS: u32 = 40;
    pub const IDENTITY_CRITICAL_POINTS: u32 = 60;

    pub const SOD_POINTS_PER_VIOLATION: u32 = 15;

    pub const ACTION_WEIGHT: f64 = 0.3;
    pub const ATTRIBUTE_WEIGHT: f64 = 0.2;
    pub const IDENTITY_WEIGHT: f64 = 0.3;
    pub const SOD_WEIGHT: f64 = 0.2;

    /// Total at or above which an admin approval and manual review are advised.
    pub const HIGH_RISK_TOTAL: u32 = 60;
    /// Total at or above which a phased rollout is advised.
    pub const PHASED_ROLLOUT_TOTAL: u32 = 40;

    pub const MAX_SCORE: u32 = 100;
}

/// One line of a risk breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub weight: f64,
    pub value: u32,
    /// Equal to `value`; the weight is informational.
    pub contribution: u32,
    pub description: String,
}

impl RiskFactor {
    fn new(name: &str, weight: f64, value: u32, description: String) -> Self {
        Self {
            name: name.to_string(),
            weight,
            value,
            contribution: value,
            description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// 0-100.
    pub total: u32,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

impl RiskScore {
    #[must_use]
    pub fn factor(&self, name: &str) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.name == name)
    }
}

/// Computes risk scores from the configured attribute table.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    attribute_risk: BTreeMap<String, u32>,
    default_attribute_risk: u32,
}

impl RiskScorer {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            attribute_risk: config.attribute_risk.clone(),
            default_attribute_risk: config.default_attribute_risk,
        }
    }

    /// Score an action caused by a change to `attribute`.
    #[must_use]
    pub fn score(
        &self,
        action: ActionType,
        attribute: &str,
        identity_risk: RiskLevel,
        sod_violations: usize,
    ) -> RiskScore {
        let action_points = match action {
            ActionType::Joiner => weights::JOINER_POINTS,
            ActionType::Mover => weights::MOVER_POINTS,
            ActionType::Leaver => weights::LEAVER_POINTS,
        };
        let attribute_points = self
            .attribute_risk
            .get(attribute)
            .copied()
            .unwrap_or(self.default_attribute_risk);
        let identity_points = match identity_risk {
            RiskLevel::Low => weights::IDENTITY_LOW_POINTS,
            RiskLevel::Medium => weights::IDENTITY_MEDIUM_POINTS,
            RiskLevel::High => weights::IDENTITY_HIGH_POINTS,
            RiskLevel::Critical => weights::IDENTITY_CRITICAL_POINTS,
        };
        let violations = u32::try_from(sod_violations).unwrap_or(u32::MAX);
        let sod_points = violations.saturating_mul(weights::SOD_POINTS_PER_VIOLATION);

        let factors = vec![
            RiskFactor::new(
                "action_type",
                weights::ACTION_WEIGHT,
                action_points,
                format!("{action} action"),
            ),
            RiskFactor::new(
                "attribute_change",
                weights::ATTRIBUTE_WEIGHT,
                attribute_points,
                format!("Change to '{attribute}'"),
            ),
            RiskFactor::new(
                "identity_risk",
                weights::IDENTITY_WEIGHT,
                identity_points,
                format!("Identity risk level {identity_risk}"),
            ),
            RiskFactor::new(
                "sod_violations",
                weights::SOD_WEIGHT,
                sod_points,
                format!("{sod_violations} separation-of-duties violation(s)"),
            ),
        ];

        let total = factors
            .iter()
            .fold(0u32, |sum, f| sum.saturating_add(f.contribution))
            .min(weights::MAX_SCORE);

        RiskScore {
            total,
            level: RiskLevel::from_score(total),
            factors,
            recommendations: recommendations(total, sod_violations),
        }
    }
}

fn recommendations(total: u32, sod_violations: usize) -> Vec<String> {
    let mut out = Vec::new();
    if total >= weights::HIGH_RISK_TOTAL {
        out.push("Require additional approval from an IAM administrator".to_string());
        out.push("Perform a manual review before provisioning".to_string());
    }
    if sod_violations > 0 {
        out.push("Resolve separation-of-duties violations before proceeding".to_string());
    }
    if total >= weights::PHASED_ROLLOUT_TOTAL {
        out.push("Roll out access changes in phases".to_string());
    }
    out
}
