//! The control loop.
//!
//! One agent per (ISP, agent type) evaluates signals, thresholds and
//! precedent on its own tick and acts through the executor. Agents never
//! talk to each other; all coordination happens through the shared stores.

mod evaluate;
mod health;
mod operator;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use evaluate::Evaluation;
pub use health::IspHealth;
pub use registry::{AgentRegistry, AgentState};

use crate::Result;
use crate::alerter::Alerter;
use crate::convictions::ConvictionStore;
use crate::decisions::{Decision, DecisionFilter, DecisionLog};
use crate::executor::Executor;
use crate::isp::{AgentKey, AgentStatus, Isp};
use crate::memory::MemoryStore;
use crate::rules::RuleStore;
use crate::settings::EngineSettings;
use crate::signals::SignalProcessor;
use crate::suppression::{SuppressionHub, SuppressionStore};
use crate::thoughts::ThoughtStream;

const PAUSES_NAMESPACE: &str = "agent-pauses";

/// A persisted operator pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PauseRecord {
    paused_at: chrono::DateTime<Utc>,
    reason: Option<String>,
}

/// Shared stores and seams the orchestrator works through.
#[derive(Clone)]
pub struct Components {
    /// Rolling signal rates.
    pub signals: Arc<SignalProcessor>,
    /// Precedent memory.
    pub convictions: Arc<ConvictionStore>,
    /// Per-ISP suppression lists.
    pub suppressions: Arc<SuppressionStore>,
    /// Global suppression list.
    pub hub: Arc<SuppressionHub>,
    /// Thresholds and rules.
    pub rules: Arc<RuleStore>,
    /// Audit trail.
    pub decisions: Arc<DecisionLog>,
    /// Remote commands.
    pub executor: Arc<dyn Executor>,
    /// Notifications.
    pub alerter: Arc<dyn Alerter>,
    /// Narration.
    pub thoughts: Arc<ThoughtStream>,
    /// Blob storage for operator pauses.
    pub memory: Arc<MemoryStore>,
}

/// Owns every agent's state and runs their loops.
pub struct Orchestrator {
    settings: EngineSettings,
    registry: AgentRegistry,
    parts: Components,
    // Serializes evaluation and operator actions per agent.
    turns: HashMap<AgentKey, Mutex<()>>,
}

impl Orchestrator {
    /// Creates an orchestrator with every agent idle.
    #[must_use]
    pub fn new(parts: Components, settings: EngineSettings) -> Self {
        Self {
            settings,
            registry: AgentRegistry::new(),
            parts,
            turns: AgentKey::all().map(|k| (k, Mutex::new(()))).collect(),
        }
    }

    fn turn(&self, key: AgentKey) -> &Mutex<()> {
        // Every key is inserted at construction.
        &self.turns[&key]
    }

    /// Loads prior state: rules, convictions, suppressions, decisions and
    /// operator pauses.
    ///
    /// # Errors
    ///
    /// Returns the first load failure. Starting without prior state could
    /// send to suppressed recipients, so callers should treat this as fatal.
    pub async fn initialize(&self) -> Result<()> {
        self.parts.rules.load().await?;
        let convictions = self.parts.convictions.load_all().await?;
        let suppressions = self.parts.suppressions.load().await?;
        let global = self.parts.hub.load().await?;
        let decisions = self.parts.decisions.load().await?;

        let cooldown = self.cooldown();
        let now = Utc::now();
        for key in AgentKey::all() {
            if let Some(fired) = self.parts.decisions.last_fired(key.isp, key.agent_type) {
                let status = if now - fired.timestamp < cooldown {
                    AgentStatus::Firing
                } else {
                    AgentStatus::Idle
                };
                self.registry.update(key, |s| {
                    s.status = status;
                    s.last_decision_at = Some(fired.timestamp);
                    s.last_reason = Some(fired.reason.clone());
                });
            }
        }

        let mut paused = 0;
        for (key, value) in self.parts.memory.list(PAUSES_NAMESPACE).await? {
            let Some(agent) = parse_key(&key) else {
                warn!(key = %key, "Ignoring pause for unknown agent");
                continue;
            };
            let record: Option<PauseRecord> = serde_json::from_str(&value).ok();
            let reason = record
                .and_then(|r| r.reason)
                .unwrap_or_else(|| "paused by operator".to_string());
            self.registry.transition(agent, AgentStatus::Paused, reason);
            paused += 1;
        }

        info!(
            convictions,
            suppressions, global, decisions, paused, "Orchestrator initialized"
        );
        Ok(())
    }

    /// Spawns one loop per agent. Loops exit when `shutdown` flips to true;
    /// an evaluation already running completes first.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        let period = self.settings.evaluation_interval().max(Duration::from_secs(1));
        let keys: Vec<AgentKey> = AgentKey::all().collect();
        let count = u32::try_from(keys.len()).unwrap_or(u32::MAX).max(1);

        for (i, key) in keys.into_iter().enumerate() {
            let this = Arc::clone(self);
            let mut shutdown = shutdown.clone();
            // Spread first ticks across the period.
            let offset = period * u32::try_from(i).unwrap_or(0) / count;

            tasks.spawn(async move {
                let start = tokio::time::Instant::now() + offset;
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let outcome = this.evaluate_once(key).await;
                            debug!(agent = %key, outcome = outcome.label(), "Evaluated");
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!(agent = %key, "Agent loop stopped");
            });
        }

        info!(agents = tasks.len(), "Agent loops started");
        tasks
    }

    fn cooldown(&self) -> TimeDelta {
        TimeDelta::from_std(self.settings.cooldown()).unwrap_or(TimeDelta::minutes(15))
    }

    /// Every agent's state.
    #[must_use]
    pub fn get_agent_states(&self) -> Vec<AgentState> {
        self.registry.all()
    }

    /// The agents of one ISP.
    #[must_use]
    pub fn get_isp_agent_states(&self, isp: Isp) -> Vec<AgentState> {
        self.registry.for_isp(isp)
    }

    /// One agent's state.
    #[must_use]
    pub fn get_agent_state(&self, key: AgentKey) -> AgentState {
        self.registry.get(key)
    }

    /// Up to `limit` most recent decisions, newest first.
    #[must_use]
    pub fn get_recent_decisions(&self, limit: usize) -> Vec<Decision> {
        self.parts.decisions.recent(limit)
    }

    /// Decisions matching `filter`, newest first.
    #[must_use]
    pub fn get_decisions(&self, filter: &DecisionFilter) -> Vec<Decision> {
        self.parts.decisions.query(filter)
    }

    /// Number of agents with `status`.
    #[must_use]
    pub fn count_agents(&self, status: AgentStatus) -> usize {
        self.registry.count(status)
    }
}

fn parse_key(key: &str) -> Option<AgentKey> {
    let (isp, agent) = key.split_once('/')?;
    Some(AgentKey::new(
        Isp::parse(isp).ok()?,
        crate::isp::AgentType::parse(agent).ok()?,
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for orchestrator tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::alerter::MemoryAlerter;
    use crate::db;
    use crate::decisions::ActionTaken;
    use crate::suppression::{SuppressionRepository, SuppressionSink};
    use crate::{Error, signals::SignalRepository};

    #[derive(Default)]
    pub struct RecordingExecutor {
        pub actions: Mutex<Vec<ActionTaken>>,
        pub pushes: Mutex<Vec<String>>,
        pub fail: std::sync::atomic::AtomicBool,
        pub unavailable: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, action: &ActionTaken) -> Result<String> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Remote("connection refused".to_string()));
            }
            self.actions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(action.clone());
            Ok("ok".to_string())
        }

        async fn push_file(&self, _remote_path: &str, contents: &str) -> Result<()> {
            self.pushes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(contents.to_string());
            Ok(())
        }

        fn is_available(&self) -> bool {
            !self.unavailable.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    pub struct Fixture {
        pub orchestrator: Arc<Orchestrator>,
        pub parts: Components,
        pub executor: Arc<RecordingExecutor>,
        pub alerter: Arc<MemoryAlerter>,
    }

    pub async fn fixture(settings: EngineSettings) -> Fixture {
        let pool = db::in_memory().await.unwrap_or_else(|e| panic!("{e}"));
        let memory = Arc::new(MemoryStore::new(pool.clone()).await.unwrap_or_else(|e| panic!("{e}")));
        let suppression_repo = Arc::new(
            SuppressionRepository::new(pool.clone()).await.unwrap_or_else(|e| panic!("{e}")),
        );
        let rules_repo = Arc::new(
            crate::rules::RuleRepository::new(pool.clone()).await.unwrap_or_else(|e| panic!("{e}")),
        );
        let signal_repo = Arc::new(SignalRepository::new(pool).await.unwrap_or_else(|e| panic!("{e}")));

        let executor = Arc::new(RecordingExecutor::default());
        let alerter = Arc::new(MemoryAlerter::new());
        let hub = Arc::new(SuppressionHub::new(
            Arc::clone(&suppression_repo),
            executor.clone(),
            crate::settings::SuppressionSettings::default(),
        ));
        let parts = Components {
            signals: Arc::new(SignalProcessor::with_repository(signal_repo)),
            convictions: Arc::new(ConvictionStore::new(Arc::clone(&memory), 16)),
            suppressions: Arc::new(SuppressionStore::new(
                suppression_repo,
                Some(hub.clone() as Arc<dyn SuppressionSink>),
            )),
            hub,
            rules: Arc::new(RuleStore::new(rules_repo)),
            decisions: Arc::new(DecisionLog::new(Arc::clone(&memory))),
            executor: executor.clone(),
            alerter: alerter.clone(),
            thoughts: Arc::new(ThoughtStream::new(16)),
            memory,
        };
        let orchestrator = Arc::new(Orchestrator::new(parts.clone(), settings));
        Fixture {
            orchestrator,
            parts,
            executor,
            alerter,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testing::fixture;
    use super::*;
    use crate::isp::AgentType;

    #[tokio::test]
    async fn test_pause_survives_restart() {
        let f = fixture(EngineSettings::default()).await;
        let key = AgentKey::new(Isp::Gmail, AgentType::Deferral);
        f.orchestrator
            .pause_agent(key, Some("maintenance".to_string()))
            .await
            .unwrap();

        let restarted = Orchestrator::new(f.parts.clone(), EngineSettings::default());
        restarted.initialize().await.unwrap();
        let state = restarted.get_agent_state(key);
        assert_eq!(state.status, AgentStatus::Paused);
        assert_eq!(state.last_reason.as_deref(), Some("maintenance"));

        restarted.resume_agent(key).await.unwrap();
        let again = Orchestrator::new(f.parts, EngineSettings::default());
        again.initialize().await.unwrap();
        assert_eq!(again.get_agent_state(key).status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_loops_stop_on_shutdown() {
        let f = fixture(EngineSettings {
            evaluation_interval_secs: 1,
            ..EngineSettings::default()
        })
        .await;
        let (tx, rx) = watch::channel(false);
        let mut tasks = f.orchestrator.start(rx);
        assert_eq!(tasks.len(), Isp::ALL.len() * AgentType::ALL.len());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tx.send(true).unwrap();
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        assert!(f.orchestrator.get_agent_state(AgentKey::new(Isp::Yahoo, AgentType::Bounce))
            .last_evaluated_at
            .is_some());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(
            parse_key("yahoo/bounce"),
            Some(AgentKey::new(Isp::Yahoo, AgentType::Bounce))
        );
        assert_eq!(parse_key("yahoo"), None);
        assert_eq!(parse_key("nope/bounce"), None);
    }
}
