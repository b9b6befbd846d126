//! Rule firing statistics.
//!
//! Kept apart from rule configuration so that firing a rule never writes to
//! the rule store. Each rule's counters sit behind their own mutex; rules do
//! not contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use jml_core::RuleId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMetrics {
    pub rule_id: RuleId,
    pub trigger_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl RuleMetrics {
    fn new(rule_id: RuleId) -> Self {
        Self {
            rule_id,
            trigger_count: 0,
            last_triggered_at: None,
        }
    }
}

/// Trigger counts and last-fired times keyed by rule id.
#[derive(Debug, Default)]
pub struct RuleMetricsStore {
    rules: RwLock<HashMap<RuleId, Arc<Mutex<RuleMetrics>>>>,
}

impl RuleMetricsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, rule_id: &RuleId) -> Arc<Mutex<RuleMetrics>> {
        if let Some(slot) = self
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(rule_id)
        {
            return Arc::clone(slot);
        }
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            rules
                .entry(rule_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RuleMetrics::new(rule_id.clone())))),
        )
    }

    /// Count one firing. `last_triggered_at` never moves backwards.
    pub fn record_firing(&self, rule_id: &RuleId, at: DateTime<Utc>) -> RuleMetrics {
        let slot = self.slot(rule_id);
        let mut metrics = slot.lock().unwrap_or_else(|e| e.into_inner());
        metrics.trigger_count += 1;
        if metrics.last_triggered_at.is_none_or(|last| at > last) {
            metrics.last_triggered_at = Some(at);
        }
        metrics.clone()
    }

    #[must_use]
    pub fn get(&self, rule_id: &RuleId) -> Option<RuleMetrics> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        rules
            .get(rule_id)
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Metrics for every rule that has fired, ordered by rule id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuleMetrics> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = rules
            .values()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        all.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        all
    }
}
