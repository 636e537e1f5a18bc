//! Operator-defined alert rules

use super::persist::{load_json, save_json};
use crate::models::{AlertRule, MetricKind};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

/// Reasons a rule is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("alert rule {0} already exists")]
    Duplicate(String),
}

/// Copy-on-write list of alert rules
///
/// Readers take an `Arc` of the current list and drop the lock immediately;
/// a create builds a new list and swaps the pointer, so an evaluation tick
/// never observes a partially updated list.
pub struct RuleBook {
    rules: RwLock<Arc<Vec<AlertRule>>>,
    path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl RuleBook {
    /// Rule book without persistence
    pub fn in_memory() -> Self {
        Self::with_rules(Vec::new(), None)
    }

    fn with_rules(rules: Vec<AlertRule>, path: Option<PathBuf>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            path,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the persisted rule list (empty when the file does not exist)
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rules: Vec<AlertRule> = load_json(&path).await?;
        info!(path = %path.display(), rules = rules.len(), "Loaded alert rules");
        Ok(Self::with_rules(rules, Some(path)))
    }

    /// Current rule list
    pub fn snapshot(&self) -> Arc<Vec<AlertRule>> {
        let guard = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Check the fields every rule needs
    pub fn validate(rule: &AlertRule) -> Result<(), RuleError> {
        if rule.id.trim().is_empty() {
            return Err(RuleError::MissingField("id"));
        }
        if rule.container_id.trim().is_empty() {
            return Err(RuleError::MissingField("container_id"));
        }
        match rule.kind {
            None => Err(RuleError::MissingField("type")),
            Some(MetricKind::LogPattern) if rule.pattern.is_empty() => {
                Err(RuleError::MissingField("pattern"))
            }
            Some(_) => Ok(()),
        }
    }

    /// Add a rule and persist the new list
    ///
    /// Persistence failures are logged; the rule stays active in memory.
    pub async fn create(&self, rule: AlertRule) -> Result<AlertRule, RuleError> {
        Self::validate(&rule)?;

        {
            let mut guard = self.rules.write().unwrap_or_else(|e| e.into_inner());
            if guard.iter().any(|r| r.id == rule.id) {
                return Err(RuleError::Duplicate(rule.id));
            }
            let mut next = Vec::with_capacity(guard.len() + 1);
            next.extend(guard.iter().cloned());
            next.push(rule.clone());
            *guard = Arc::new(next);
        }

        info!(
            alert_id = %rule.id,
            container_id = %rule.container_id,
            kind = ?rule.kind,
            "Alert rule created"
        );
        self.persist().await;
        Ok(rule)
    }

    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let _guard = self.persist_lock.lock().await;
        // Written after taking the lock so the file always ends with the newest list
        let rules = self.snapshot();
        if let Err(e) = save_json(path, rules.as_slice()).await {
            warn!(path = %path.display(), error = %e, "Failed to persist alert rules");
        }
    }
}
