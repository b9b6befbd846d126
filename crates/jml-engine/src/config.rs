//! Engine configuration.
//!
//! Defaults are usable as-is; every field can be overridden from `JML_*`
//! environment variables.
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `JML_ATTRIBUTE_RISK` | `attribute_risk` | `department=20,manager=15` |
//! | `JML_DEFAULT_ATTRIBUTE_RISK` | `default_attribute_risk` | integer 0-100 |
//! | `JML_HIGH_RISK_THRESHOLD` | `high_risk_threshold` | integer 0-100 |
//! | `JML_TASK_MAX_RETRIES` | `task_max_retries` | integer |
//! | `JML_ADMIN_APPROVER_ROLE` | `admin_approver_role` | string |

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors raised while loading or validating [`EngineConfig`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Value out of range for {var}: {value} (max {max})")]
    OutOfRange { var: String, value: u32, max: u32 },
}

/// Tunables for risk scoring, approvals and task retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attribute-change risk points keyed by attribute name.
    pub attribute_risk: BTreeMap<String, u32>,
    /// Points for attributes missing from `attribute_risk`.
    pub default_attribute_risk: u32,
    /// Risk total at or above which an administrator approval step is required.
    pub high_risk_threshold: u32,
    /// Retries allowed per provisioning task after its first failure.
    pub task_max_retries: u32,
    /// Role that decides the administrator approval step.
    pub admin_approver_role: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let attribute_risk = [
            ("department", 20),
            ("manager", 15),
            ("jobTitle", 15),
            ("employmentStatus", 25),
            ("location", 10),
            ("costCenter", 10),
        ]
        .into_iter()
        .map(|(name, points)| (name.to_string(), points))
        .collect();

        Self {
            attribute_risk,
            default_attribute_risk: 10,
            high_risk_threshold: 60,
            task_max_retries: 3,
            admin_approver_role: "iam_admin".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but malformed or the
    /// resulting configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration using an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("JML_ATTRIBUTE_RISK") {
            for (name, points) in parse_risk_table(&raw)? {
                config.attribute_risk.insert(name, points);
            }
        }
        if let Some(raw) = lookup("JML_DEFAULT_ATTRIBUTE_RISK") {
            config.default_attribute_risk = parse_u32("JML_DEFAULT_ATTRIBUTE_RISK", &raw)?;
        }
        if let Some(raw) = lookup("JML_HIGH_RISK_THRESHOLD") {
            config.high_risk_threshold = parse_u32("JML_HIGH_RISK_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("JML_TASK_MAX_RETRIES") {
            config.task_max_retries = parse_u32("JML_TASK_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("JML_ADMIN_APPROVER_ROLE") {
            config.admin_approver_role = raw.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a risk value exceeds 100 or the admin role is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, points) in &self.attribute_risk {
            check_max(&format!("attribute_risk.{name}"), *points, 100)?;
        }
        check_max("default_attribute_risk", self.default_attribute_risk, 100)?;
        check_max("high_risk_threshold", self.high_risk_threshold, 100)?;
        if self.admin_approver_role.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "admin_approver_role".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Attribute-change risk points for `attribute`.
    #[must_use]
    pub fn attribute_risk_for(&self, attribute: &str) -> u32 {
        self.attribute_risk
            .get(attribute)
            .copied()
            .unwrap_or(self.default_attribute_risk)
    }
}

fn check_max(var: &str, value: u32, max: u32) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange {
            var: var.to_string(),
            value,
            max,
        });
    }
    Ok(())
}

fn parse_u32(var: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        message: format!("{e}"),
    })
}

fn parse_risk_table(raw: &str) -> Result<Vec<(String, u32)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, points) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                var: "JML_ATTRIBUTE_RISK".to_string(),
                message: format!("expected name=points, got '{entry}'"),
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    var: "JML_ATTRIBUTE_RISK".to_string(),
                    message: "attribute name must not be empty".to_string(),
                });
            }
            Ok((name.to_string(), parse_u32("JML_ATTRIBUTE_RISK", points)?))
        })
        .collect()
}
