//! Cached rule store read by every agent each cycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::model::{IspConfig, NewRule, Rule};
use super::repository::RuleRepository;
use super::validation::{ValidationError, validate_isp_config, validate_rule};
use crate::isp::{AgentKey, Isp};
use crate::sync::{read, write};
use crate::{Error, Result};

fn invalid(errors: &[ValidationError]) -> Error {
    Error::InvalidInput(
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Rules and ISP configurations, persisted and cached in memory.
pub struct RuleStore {
    repo: Arc<RuleRepository>,
    configs: RwLock<HashMap<Isp, IspConfig>>,
    rules: RwLock<Vec<Rule>>,
}

impl RuleStore {
    /// Creates a store holding the seeded defaults.
    #[must_use]
    pub fn new(repo: Arc<RuleRepository>) -> Self {
        Self {
            repo,
            configs: RwLock::new(Isp::ALL.into_iter().map(|i| (i, IspConfig::defaults(i))).collect()),
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Loads stored configurations and rules over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub async fn load(&self) -> Result<()> {
        let stored = self.repo.isp_configs().await?;
        let rules = self.repo.list().await?;
        info!(configs = stored.len(), rules = rules.len(), "Rules loaded");

        {
            let mut configs = write(&self.configs);
            for config in stored {
                configs.insert(config.isp, config);
            }
        }
        *write(&self.rules) = rules;
        Ok(())
    }

    /// Current configuration for `isp`.
    #[must_use]
    pub fn isp_config(&self, isp: Isp) -> IspConfig {
        read(&self.configs)
            .get(&isp)
            .cloned()
            .unwrap_or_else(|| IspConfig::defaults(isp))
    }

    /// Configuration of every ISP.
    #[must_use]
    pub fn isp_configs(&self) -> Vec<IspConfig> {
        Isp::ALL.into_iter().map(|isp| self.isp_config(isp)).collect()
    }

    /// Validates, stores and applies a configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if validation fails, or a storage error.
    pub async fn update_isp_config(&self, config: IspConfig) -> Result<IspConfig> {
        validate_isp_config(&config).map_err(|e| invalid(&e))?;
        self.repo.save_isp_config(&config).await?;
        write(&self.configs).insert(config.isp, config.clone());
        info!(isp = %config.isp, "ISP configuration updated");
        Ok(config)
    }

    /// All rules.
    #[must_use]
    pub fn list_rules(&self) -> Vec<Rule> {
        read(&self.rules).clone()
    }

    /// One rule.
    #[must_use]
    pub fn get_rule(&self, id: i64) -> Option<Rule> {
        read(&self.rules).iter().find(|r| r.id == id).cloned()
    }

    /// Rules driving one agent.
    #[must_use]
    pub fn rules_for(&self, key: AgentKey) -> Vec<Rule> {
        read(&self.rules)
            .iter()
            .filter(|r| r.isp == key.isp && r.agent_type == key.agent_type)
            .cloned()
            .collect()
    }

    /// Creates a rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if validation fails, or a storage error.
    pub async fn create_rule(&self, rule: NewRule) -> Result<Rule> {
        validate_rule(&rule).map_err(|e| invalid(&e))?;
        let created = self.repo.insert(&rule).await?;
        write(&self.rules).push(created.clone());
        info!(rule_id = created.id, isp = %created.isp, agent = %created.agent_type, "Rule created");
        Ok(created)
    }

    /// Replaces a rule's fields.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids, `InvalidInput` if validation
    /// fails, or a storage error.
    pub async fn update_rule(&self, id: i64, rule: NewRule) -> Result<Rule> {
        validate_rule(&rule).map_err(|e| invalid(&e))?;
        if !self.repo.update(id, &rule).await? {
            return Err(Error::NotFound(format!("rule {id}")));
        }

        let mut rules = write(&self.rules);
        let slot = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        *slot = Rule {
            id,
            isp: rule.isp,
            agent_type: rule.agent_type,
            metric: rule.metric,
            comparison: rule.comparison,
            threshold: rule.threshold,
            enabled: rule.enabled,
            description: rule.description,
            created_at: slot.created_at,
        };
        Ok(slot.clone())
    }

    /// Deletes a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids, or a storage error.
    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        if !self.repo.delete(id).await? {
            return Err(Error::NotFound(format!("rule {id}")));
        }
        write(&self.rules).retain(|r| r.id != id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db;
    use crate::isp::AgentType;
    use crate::rules::{Comparison, Metric};

    async fn store() -> (RuleStore, Arc<RuleRepository>) {
        let repo = Arc::new(RuleRepository::new(db::in_memory().await.unwrap()).await.unwrap());
        (RuleStore::new(Arc::clone(&repo)), repo)
    }

    #[tokio::test]
    async fn test_config_update_persists() {
        let (store, repo) = store().await;
        let config = IspConfig {
            bounce_action: 0.04,
            ..store.isp_config(Isp::Yahoo)
        };
        store.update_isp_config(config).await.unwrap();
        assert_eq!(store.isp_config(Isp::Yahoo).bounce_action, 0.04);

        let reloaded = RuleStore::new(repo);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.isp_config(Isp::Yahoo).bounce_action, 0.04);
        assert_eq!(reloaded.isp_config(Isp::Gmail), IspConfig::defaults(Isp::Gmail));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (store, _) = store().await;
        let config = IspConfig {
            deferral_warn: 0.5,
            deferral_action: 0.2,
            ..store.isp_config(Isp::Cox)
        };
        assert!(matches!(
            store.update_isp_config(config).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(store.isp_config(Isp::Cox), IspConfig::defaults(Isp::Cox));
    }

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let (store, _) = store().await;
        let rule = store
            .create_rule(NewRule {
                isp: Isp::Yahoo,
                agent_type: AgentType::Deferral,
                metric: Metric::DeferralRate5m,
                comparison: Comparison::Gt,
                threshold: 0.2,
                enabled: true,
                description: String::new(),
            })
            .await
            .unwrap();

        let key = AgentKey::new(Isp::Yahoo, AgentType::Deferral);
        assert_eq!(store.rules_for(key).len(), 1);
        assert!(store.rules_for(AgentKey::new(Isp::Gmail, AgentType::Deferral)).is_empty());

        let updated = store
            .update_rule(rule.id, NewRule {
                isp: Isp::Yahoo,
                agent_type: AgentType::Deferral,
                metric: Metric::DeferralRate5m,
                comparison: Comparison::Gt,
                threshold: 0.25,
                enabled: true,
                description: "raised".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(updated.threshold, 0.25);
        assert_eq!(updated.created_at, rule.created_at);

        store.delete_rule(rule.id).await.unwrap();
        assert!(store.get_rule(rule.id).is_none());
        assert!(matches!(store.delete_rule(rule.id).await, Err(Error::NotFound(_))));
    }
}
