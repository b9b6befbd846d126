//! Scenario files: seed data plus attribute changes run through the engine.
//!
//! A scenario is a JSON document:
//!
//! ```json
//! {
//!   "now": "2025-03-07T15:30:00Z",
//!   "sources": [ ... ],
//!   "rules": [ ... ],
//!   "birthright_policies": [ ... ],
//!   "sod_rules": [ ... ],
//!   "identities": [ ... ],
//!   "source_values": [ ... ],
//!   "changes": [ ... ]
//! }
//! ```
//!
//! Every section is optional. Changes are processed in file order; a change
//! the engine refuses is reported alongside the others instead of aborting
//! the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_engine::clock::{Clock, FixedClock, SystemClock};
use jml_engine::engine::{EngineStores, ProcessOutcome};
use jml_engine::identity::InMemoryIdentityDirectory;
use jml_engine::policy::EvaluationMode;
use jml_engine::trigger::RuleMetrics;
use jml_engine::{
    AttributeDelta, AttributeSource, BirthrightPolicy, CorrelationId, EngineConfig,
    IdentityId, IdentitySnapshot, LifecycleEngine, SodRule, SourceId, SourceValue, TriggerRule,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CliError, CliResult};

/// A value a source currently reports for an identity attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedValue {
    pub identity_id: IdentityId,
    pub attribute: String,
    pub source_id: SourceId,
    pub value: Value,
    #[serde(default)]
    pub written_at: Option<DateTime<Utc>>,
}

/// One attribute change to push through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeChange {
    pub identity_id: IdentityId,
    pub attribute: String,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
    pub source_id: SourceId,
    pub correlation_id: CorrelationId,
    /// When the source reported the change; defaults to the scenario clock.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Engine settings; environment configuration is used when absent.
    pub config: Option<EngineConfig>,
    /// Fixed evaluation time. The system clock is used when absent.
    pub now: Option<DateTime<Utc>>,
    pub birthright_mode: EvaluationMode,
    pub sources: Vec<AttributeSource>,
    pub rules: Vec<TriggerRule>,
    pub birthright_policies: Vec<BirthrightPolicy>,
    pub sod_rules: Vec<SodRule>,
    pub identities: Vec<IdentitySnapshot>,
    pub source_values: Vec<ReportedValue>,
    pub changes: Vec<AttributeChange>,
}

/// Result of one change: the pipeline outcome or the reason it was refused.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReport {
    Processed {
        correlation_id: CorrelationId,
        outcome: Box<ProcessOutcome>,
    },
    Refused {
        correlation_id: CorrelationId,
        error: String,
    },
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub changes: Vec<ChangeReport>,
    /// Firing counts for every rule that fired, ordered by rule id.
    pub rule_metrics: Vec<RuleMetrics>,
    pub open_conflicts: usize,
    pub audit_events: usize,
}

impl ScenarioReport {
    #[must_use]
    pub fn requests_assembled(&self) -> usize {
        self.changes
            .iter()
            .map(|c| match c {
                ChangeReport::Processed { outcome, .. } => outcome.requests.len(),
                ChangeReport::Refused { .. } => 0,
            })
            .sum()
    }

    #[must_use]
    pub fn refused(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, ChangeReport::Refused { .. }))
            .count()
    }
}

impl Scenario {
    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CliError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&raw, path)
    }

    pub fn parse(raw: &str, path: &Path) -> CliResult<Self> {
        serde_json::from_str(raw).map_err(|e| CliError::Scenario {
            path: PathBuf::from(path),
            message: e.to_string(),
        })
    }

    /// Check every rule, source and policy without touching an engine.
    /// Returns one message per problem.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for source in &self.sources {
            if let Err(e) = source.validate() {
                problems.push(format!("source {}: {e}", source.id));
            }
        }
        for rule in &self.rules {
            if let Err(e) = rule.validate() {
                problems.push(format!("rule {}: {e}", rule.id));
            }
        }
        for policy in &self.birthright_policies {
            if let Err(e) = policy.validate() {
                problems.push(format!("birthright policy {}: {e}", policy.id));
            }
        }
        for rule in &self.sod_rules {
            if let Err(e) = rule.validate() {
                problems.push(format!("SoD rule {}: {e}", rule.id));
            }
        }
        if let Some(config) = &self.config {
            if let Err(e) = config.validate() {
                problems.push(format!("config: {e}"));
            }
        }
        problems
    }

    /// Build an engine over in-memory stores seeded from the scenario.
    pub async fn build_engine(&self, fallback: EngineConfig) -> CliResult<LifecycleEngine> {
        let directory = Arc::new(InMemoryIdentityDirectory::new());
        let clock: Arc<dyn Clock> = match self.now {
            Some(now) => Arc::new(FixedClock::new(now)),
            None => Arc::new(SystemClock),
        };

        for identity in &self.identities {
            directory.upsert_identity(identity.clone()).await;
        }
        for reported in &self.source_values {
            directory
                .record_source_value(
                    &reported.identity_id,
                    &reported.attribute,
                    SourceValue {
                        source_id: reported.source_id.clone(),
                        value: reported.value.clone(),
                        written_at: reported.written_at.unwrap_or_else(|| clock.now()),
                    },
                )
                .await;
        }

        let stores = EngineStores {
            directory,
            ..EngineStores::in_memory()
        };
        let config = self.config.clone().unwrap_or(fallback);
        let engine = LifecycleEngine::new(stores, config)?
            .with_clock(clock)
            .with_birthright_mode(self.birthright_mode);

        for source in &self.sources {
            engine.stores().sources.upsert_source(source.clone()).await?;
        }
        for policy in &self.birthright_policies {
            engine
                .stores()
                .birthright
                .upsert_policy(policy.clone())
                .await?;
        }
        for rule in &self.sod_rules {
            engine.stores().sod.create_rule(rule.clone()).await?;
        }
        for rule in &self.rules {
            engine.create_rule(rule.clone()).await?;
        }

        tracing::info!(
            sources = self.sources.len(),
            rules = self.rules.len(),
            identities = self.identities.len(),
            "Scenario loaded"
        );
        Ok(engine)
    }

    /// Run every change through the full pipeline.
    pub async fn run(&self, engine: &LifecycleEngine) -> CliResult<ScenarioReport> {
        let mut changes = Vec::with_capacity(self.changes.len());
        for change in &self.changes {
            let delta = AttributeDelta::new(
                change.identity_id.clone(),
                change.attribute.clone(),
                change.before.clone(),
                change.after.clone(),
                change.source_id.clone(),
                change.correlation_id.clone(),
                change
                    .timestamp
                    .unwrap_or_else(|| self.now.unwrap_or_else(Utc::now)),
            );
            let report = match engine.process_delta(delta).await {
                Ok(outcome) => ChangeReport::Processed {
                    correlation_id: change.correlation_id.clone(),
                    outcome: Box::new(outcome),
                },
                Err(e) => {
                    tracing::warn!(
                        correlation_id = %change.correlation_id,
                        error = %e,
                        "Attribute change refused"
                    );
                    ChangeReport::Refused {
                        correlation_id: change.correlation_id.clone(),
                        error: e.to_string(),
                    }
                }
            };
            changes.push(report);
        }

        let open_conflicts = engine.list_open_conflicts().await?.len();
        let audit_events = engine
            .stores()
            .audit
            .query_events(Default::default())
            .await?
            .len();
        Ok(ScenarioReport {
            changes,
            rule_metrics: engine.metrics().snapshot(),
            open_conflicts,
            audit_events,
        })
    }
}
