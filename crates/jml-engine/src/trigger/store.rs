//! Trigger rule storage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use jml_core::RuleId;
use tokio::sync::RwLock;

use super::rule::TriggerRule;
use crate::error::{EngineError, Result};

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for trigger rule storage backends.
#[async_trait::async_trait]
pub trait TriggerRuleStore: Send + Sync {
    /// All rules ordered by priority, then id.
    async fn list_rules(&self) -> Result<Vec<TriggerRule>>;

    /// Active rules ordered by priority, then id.
    async fn list_active_rules(&self) -> Result<Vec<TriggerRule>>;

    async fn get_rule(&self, id: &RuleId) -> Result<Option<TriggerRule>>;

    /// Store a new rule. Fails if the id is taken or the rule is invalid.
    async fn create_rule(&self, rule: TriggerRule) -> Result<TriggerRule>;

    /// Replace an existing rule, keeping its creation time.
    async fn update_rule(&self, rule: TriggerRule) -> Result<TriggerRule>;

    async fn delete_rule(&self, id: &RuleId) -> Result<bool>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory trigger rule store.
#[derive(Debug, Default)]
pub struct InMemoryTriggerRuleStore {
    rules: Arc<RwLock<HashMap<RuleId, TriggerRule>>>,
}

impl InMemoryTriggerRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.rules.read().await.len()
    }
}

fn ordered(mut rules: Vec<TriggerRule>) -> Vec<TriggerRule> {
    rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    rules
}

#[async_trait::async_trait]
impl TriggerRuleStore for InMemoryTriggerRuleStore {
    async fn list_rules(&self) -> Result<Vec<TriggerRule>> {
        Ok(ordered(self.rules.read().await.values().cloned().collect()))
    }

    async fn list_active_rules(&self) -> Result<Vec<TriggerRule>> {
        Ok(ordered(
            self.rules
                .read()
                .await
                .values()
                .filter(|r| r.active)
                .cloned()
                .collect(),
        ))
    }

    async fn get_rule(&self, id: &RuleId) -> Result<Option<TriggerRule>> {
        Ok(self.rules.read().await.get(id).cloned())
    }

    async fn create_rule(&self, rule: TriggerRule) -> Result<TriggerRule> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(EngineError::AlreadyExists {
                resource: "TriggerRule",
                id: rule.id.to_string(),
            });
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, mut rule: TriggerRule) -> Result<TriggerRule> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        let existing = rules
            .get_mut(&rule.id)
            .ok_or_else(|| EngineError::RuleNotFound(rule.id.clone()))?;
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();
        *existing = rule.clone();
        Ok(rule)
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<bool> {
        Ok(self.rules.write().await.remove(id).is_some())
    }
}
