//! Per-agent state, owned by the orchestrator.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::isp::{AgentKey, AgentStatus, AgentType, Isp};
use crate::sync::{read, write};

/// Lifecycle state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Provider.
    pub isp: Isp,
    /// Agent type.
    pub agent_type: AgentType,
    /// Status.
    pub status: AgentStatus,
    /// Last executed agent decision.
    pub last_decision_at: Option<DateTime<Utc>>,
    /// Last evaluation.
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Primary metric at the last evaluation.
    pub last_metric: Option<f64>,
    /// Why the status last changed.
    pub last_reason: Option<String>,
}

impl AgentState {
    fn idle(key: AgentKey) -> Self {
        Self {
            isp: key.isp,
            agent_type: key.agent_type,
            status: AgentStatus::Idle,
            last_decision_at: None,
            last_evaluated_at: None,
            last_metric: None,
            last_reason: None,
        }
    }

    /// Returns the agent's key.
    #[must_use]
    pub const fn key(&self) -> AgentKey {
        AgentKey::new(self.isp, self.agent_type)
    }
}

/// One lock per agent; the map itself is fixed at construction and never
/// exposed.
pub struct AgentRegistry {
    agents: HashMap<AgentKey, RwLock<AgentState>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Creates an idle state for every (ISP, agent type).
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: AgentKey::all()
                .map(|key| (key, RwLock::new(AgentState::idle(key))))
                .collect(),
        }
    }

    fn slot(&self, key: AgentKey) -> &RwLock<AgentState> {
        // Every key is inserted at construction.
        &self.agents[&key]
    }

    /// Snapshot of one agent.
    #[must_use]
    pub fn get(&self, key: AgentKey) -> AgentState {
        read(self.slot(key)).clone()
    }

    /// Status of one agent.
    #[must_use]
    pub fn status(&self, key: AgentKey) -> AgentStatus {
        read(self.slot(key)).status
    }

    /// Applies `f` under the agent's write lock and returns the new state.
    pub fn update(&self, key: AgentKey, f: impl FnOnce(&mut AgentState)) -> AgentState {
        let mut state = write(self.slot(key));
        f(&mut state);
        state.clone()
    }

    /// Sets the status and the reason for it.
    pub fn transition(
        &self,
        key: AgentKey,
        status: AgentStatus,
        reason: impl Into<String>,
    ) -> AgentState {
        let reason = reason.into();
        self.update(key, |s| {
            s.status = status;
            s.last_reason = Some(reason);
        })
    }

    /// Every agent, ordered by ISP then agent type.
    #[must_use]
    pub fn all(&self) -> Vec<AgentState> {
        AgentKey::all().map(|key| self.get(key)).collect()
    }

    /// The agents of one ISP.
    #[must_use]
    pub fn for_isp(&self, isp: Isp) -> Vec<AgentState> {
        AgentType::ALL
            .into_iter()
            .map(|t| self.get(AgentKey::new(isp, t)))
            .collect()
    }

    /// Number of agents with `status`.
    #[must_use]
    pub fn count(&self, status: AgentStatus) -> usize {
        self.agents
            .values()
            .filter(|slot| read(slot).status == status)
            .count()
    }
}
