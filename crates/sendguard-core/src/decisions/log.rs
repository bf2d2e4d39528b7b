//! Decision log: bounded in-memory history backed by the memory store.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::model::{ActionTaken, Decision};
use crate::isp::{AgentType, Isp};
use crate::memory::MemoryStore;
use crate::sync::{read, write};
use crate::Result;

const NAMESPACE: &str = "decisions";

/// Decisions kept in memory for introspection.
pub const DECISION_CAPACITY: usize = 10_000;

/// Query over recorded decisions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DecisionFilter {
    /// Only this provider.
    pub isp: Option<Isp>,
    /// Only this agent type.
    pub agent_type: Option<AgentType>,
    /// Only decisions at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only operator (`true`) or agent (`false`) decisions.
    pub operator: Option<bool>,
    /// Maximum results.
    pub limit: Option<usize>,
}

impl DecisionFilter {
    fn matches(&self, decision: &Decision) -> bool {
        self.isp.is_none_or(|isp| decision.isp == isp)
            && self.agent_type.is_none_or(|a| decision.agent_type == a)
            && self.since.is_none_or(|since| decision.timestamp >= since)
            && self.operator.is_none_or(|op| decision.operator == op)
    }
}

/// Append-only record of every action taken.
pub struct DecisionLog {
    memory: Arc<MemoryStore>,
    recent: RwLock<VecDeque<Decision>>,
}

impl DecisionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self {
            memory,
            recent: RwLock::new(VecDeque::new()),
        }
    }

    /// Loads the most recent persisted decisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory store cannot be read.
    pub async fn load(&self) -> Result<usize> {
        let mut decisions: Vec<Decision> = self
            .memory
            .list(NAMESPACE)
            .await?
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_str(&value) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable decision");
                    None
                }
            })
            .collect();
        decisions.sort_by_key(|d: &Decision| d.timestamp);
        let skip = decisions.len().saturating_sub(DECISION_CAPACITY);

        let mut recent = write(&self.recent);
        *recent = decisions.into_iter().skip(skip).collect();
        info!(loaded = recent.len(), "Decisions loaded");
        Ok(recent.len())
    }

    /// Records a decision.
    ///
    /// The decision is visible to readers when this returns. A persistence
    /// failure is logged; the in-memory record is kept either way.
    pub async fn record(&self, decision: &Decision) {
        {
            let mut recent = write(&self.recent);
            if recent.len() == DECISION_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(decision.clone());
        }

        let key = format!(
            "{:020}-{}",
            decision.timestamp.timestamp_micros(),
            decision.id
        );
        if let Err(e) = self.memory.put_json(NAMESPACE, &key, decision).await {
            warn!(decision_id = %decision.id, error = %e, "Failed to persist decision");
        }
    }

    /// Returns up to `limit` decisions, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Decision> {
        read(&self.recent).iter().rev().take(limit).cloned().collect()
    }

    /// Returns decisions matching `filter`, newest first.
    #[must_use]
    pub fn query(&self, filter: &DecisionFilter) -> Vec<Decision> {
        read(&self.recent)
            .iter()
            .rev()
            .filter(|d| filter.matches(d))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Returns the latest executed agent decision for `isp`/`agent_type`.
    ///
    /// Recipient suppressions that accompany a firing are skipped.
    #[must_use]
    pub fn last_fired(&self, isp: Isp, agent_type: AgentType) -> Option<Decision> {
        read(&self.recent)
            .iter()
            .rev()
            .find(|d| {
                d.isp == isp
                    && d.agent_type == agent_type
                    && !d.operator
                    && d.outcome.is_executed()
                    && !matches!(d.action, ActionTaken::SuppressRecipients { .. })
            })
            .cloned()
    }

    /// Number of decisions held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.recent).len()
    }

    /// Returns true if no decisions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.recent).is_empty()
    }
}
