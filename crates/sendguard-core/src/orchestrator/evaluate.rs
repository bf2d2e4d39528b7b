//! One agent evaluation cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::Error;
use crate::alerter::{Alert, Severity};
use crate::context::MicroContext;
use crate::convictions::{Conviction, RecallSynthesis, Verdict, synthesize};
use crate::decisions::{ActionTaken, Decision, DecisionOutcome};
use crate::isp::{AgentKey, AgentStatus, AgentType};
use crate::rules::IspConfig;
use crate::signals::{ContextInputs, EventKind, SignalSnapshot};
use crate::suppression::SuppressionSource;
use crate::thoughts::ThoughtKind;

/// Confidence floor of the `Will` conviction recorded when an action succeeds.
const FIRED_CONFIDENCE: f64 = 0.6;

/// Outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// The agent is paused by an operator.
    Paused,
    /// Below the warning threshold, or too little volume to judge.
    Quiet {
        /// Primary metric.
        metric: f64,
    },
    /// Above the warning threshold but not the action threshold.
    Warning {
        /// Primary metric.
        metric: f64,
        /// Warning threshold.
        threshold: f64,
    },
    /// Breached, but the agent fired within the cooldown.
    Cooldown,
    /// Breached, but similar precedent says not to act.
    Held {
        /// Why.
        reason: String,
    },
    /// Breached, but remote commands are suspended.
    Degraded,
    /// An action was executed.
    Fired(Box<Decision>),
    /// An action was attempted and failed.
    Failed(Box<Decision>),
}

impl Evaluation {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Quiet { .. } => "quiet",
            Self::Warning { .. } => "warning",
            Self::Cooldown => "cooldown",
            Self::Held { .. } => "held",
            Self::Degraded => "degraded",
            Self::Fired(_) => "fired",
            Self::Failed(_) => "failed",
        }
    }
}

/// The agent's primary metric against its thresholds.
#[derive(Debug, Clone, Copy)]
pub(super) struct Reading {
    pub metric: f64,
    pub warn: f64,
    pub action: f64,
    /// Enough volume behind the metric to trust it.
    pub trusted: bool,
}

impl Reading {
    pub(super) fn take(
        agent_type: AgentType,
        config: &IspConfig,
        snapshot: &SignalSnapshot,
        min_volume: u64,
    ) -> Self {
        let (warn, action) = config.thresholds(agent_type);
        let hour = &snapshot.window_1h;
        let (metric, volume) = match agent_type {
            AgentType::Bounce => (
                snapshot.bounce_rate_1h,
                hour.delivered.saturating_add(hour.bounced),
            ),
            AgentType::Complaint => (snapshot.complaint_rate_1h, hour.delivered),
            AgentType::Deferral => (snapshot.deferral_rate_5m, snapshot.window_5m.attempts()),
            #[allow(clippy::cast_precision_loss)]
            AgentType::Warmup => (hour.sent as f64, u64::MAX),
        };

        Self {
            metric,
            warn,
            action,
            trusted: volume >= min_volume,
        }
    }

    /// A zero action threshold disables the agent.
    fn enabled(&self) -> bool {
        self.action > 0.0
    }

    fn breached(&self) -> bool {
        self.enabled() && self.trusted && self.metric >= self.action
    }

    fn warning(&self) -> bool {
        self.enabled() && self.trusted && self.metric >= self.warn
    }
}

impl Orchestrator {
    /// Runs one evaluation cycle for `key`.
    ///
    /// Never fails: remote-command errors are recorded in the decision, sent
    /// to the alerter, and retried on a later cycle.
    pub async fn evaluate_once(&self, key: AgentKey) -> Evaluation {
        let _turn = self.turn(key).lock().await;
        let now = Utc::now();

        match self.registry.status(key) {
            AgentStatus::Paused => return Evaluation::Paused,
            AgentStatus::Degraded if self.parts.executor.is_available() => {
                self.registry
                    .transition(key, AgentStatus::Active, "remote commands available again");
                self.parts.thoughts.think(
                    ThoughtKind::Recovery,
                    key,
                    "Remote commands are available again",
                );
                info!(agent = %key, "Agent recovered from degraded state");
            }
            _ => {}
        }

        let config = self.parts.rules.isp_config(key.isp);
        let snapshot = self.parts.signals.snapshot_at(key.isp, now);
        let reading = Reading::take(key.agent_type, &config, &snapshot, self.settings.min_volume);
        self.registry.update(key, |s| {
            s.last_evaluated_at = Some(now);
            s.last_metric = Some(reading.metric);
        });

        let Some(reason) = self.breach(key, &reading, &snapshot) else {
            return self.settle(key, &reading, now);
        };

        if self.registry.status(key) == AgentStatus::Firing && self.within_cooldown(key, now) {
            debug!(agent = %key, "Breach during cooldown");
            return Evaluation::Cooldown;
        }

        let inputs = self.parts.signals.context_inputs_at(key.isp, now);
        let context = MicroContext::capture(&snapshot, &inputs, now);
        let synthesis = self.recall(key, &context, now);

        if self.vetoes(&synthesis) {
            let held = format!(
                "{reason}; held by {} similar precedents against acting ({:.0}% confidence)",
                synthesis.matches,
                synthesis.confidence * 100.0
            );
            self.registry.transition(key, AgentStatus::Active, held.clone());
            self.parts.thoughts.think(ThoughtKind::Hold, key, held.clone());
            info!(agent = %key, matches = synthesis.matches, "Action held by precedent");
            return Evaluation::Held { reason: held };
        }

        self.suppress_offenders(key, &reason, &context, now).await;

        if !self.parts.executor.is_available() {
            return self.degrade(key, &reason).await;
        }

        let action = choose_action(key.agent_type, &config, &inputs);
        self.act(key, action, reason, context, &synthesis).await
    }

    /// Action-threshold or rule breach, with the reason.
    fn breach(&self, key: AgentKey, reading: &Reading, snapshot: &SignalSnapshot) -> Option<String> {
        if reading.breached() {
            return Some(describe_breach(key.agent_type, reading));
        }

        self.parts
            .rules
            .rules_for(key)
            .into_iter()
            .find(|rule| rule.matches(snapshot) && (reading.trusted || !rule.metric.is_ratio()))
            .map(|rule| {
                format!(
                    "rule #{}: {} {:.4} {} {}",
                    rule.id,
                    rule.metric,
                    rule.metric.value(snapshot),
                    rule.comparison.as_str(),
                    rule.threshold
                )
            })
    }

    /// Status changes when nothing needs doing.
    fn settle(&self, key: AgentKey, reading: &Reading, now: DateTime<Utc>) -> Evaluation {
        let warning = reading.warning();
        let status = self.registry.status(key);
        let holds = match status {
            AgentStatus::Degraded => true,
            AgentStatus::Firing => self.within_cooldown(key, now),
            _ => false,
        };

        if !holds {
            let next = if warning {
                AgentStatus::Active
            } else {
                AgentStatus::Idle
            };
            if next != status {
                let why = if warning {
                    format!(
                        "{} {:.4} above warning threshold {:.4}",
                        key.agent_type, reading.metric, reading.warn
                    )
                } else {
                    format!("{} back below warning threshold", key.agent_type)
                };
                self.registry.transition(key, next, why.clone());
                if warning {
                    self.parts.thoughts.think(ThoughtKind::Observation, key, why);
                }
            }
        }

        if warning {
            Evaluation::Warning {
                metric: reading.metric,
                threshold: reading.warn,
            }
        } else {
            Evaluation::Quiet {
                metric: reading.metric,
            }
        }
    }

    fn within_cooldown(&self, key: AgentKey, now: DateTime<Utc>) -> bool {
        let cooldown = self.cooldown();
        self.registry
            .get(key)
            .last_decision_at
            .is_some_and(|at| now - at < cooldown)
    }

    fn recall(&self, key: AgentKey, context: &MicroContext, now: DateTime<Utc>) -> RecallSynthesis {
        let matches: Vec<_> = self
            .parts
            .convictions
            .recall_similar(key.isp, key.agent_type, context, self.settings.recall_limit)
            .into_iter()
            .filter(|m| m.score >= self.settings.min_similarity)
            .collect();
        let synthesis = synthesize(&matches, context, now, self.settings.recall_half_life_days);

        if synthesis.matches > 0 {
            let leaning = synthesis
                .dominant_verdict
                .map_or("split", |v| v.as_str());
            self.parts.thoughts.think(
                ThoughtKind::Recall,
                key,
                format!(
                    "{} similar precedents, leaning {leaning} ({:.0}%): {}",
                    synthesis.matches,
                    synthesis.confidence * 100.0,
                    synthesis.key_observations.join("; ")
                ),
            );
        }
        synthesis
    }

    fn vetoes(&self, synthesis: &RecallSynthesis) -> bool {
        synthesis.dominant_verdict == Some(Verdict::Wont)
            && synthesis.confidence >= self.settings.veto_confidence
            && synthesis.matches >= self.settings.veto_min_matches
    }

    /// Suppresses the recipients behind a bounce or complaint breach for the
    /// agent's ISP and records the suppression as its own decision.
    ///
    /// Suppression is local, so it does not wait on remote commands.
    async fn suppress_offenders(
        &self,
        key: AgentKey,
        reason: &str,
        context: &MicroContext,
        now: DateTime<Utc>,
    ) -> Option<Decision> {
        let kind = match key.agent_type {
            AgentType::Bounce => EventKind::Bounced,
            AgentType::Complaint => EventKind::Complained,
            AgentType::Deferral | AgentType::Warmup => return None,
        };
        let emails = self.parts.signals.take_recipients(key.isp, kind, now);
        if emails.is_empty() {
            return None;
        }

        let result = self
            .suppress_recipients(key.isp, &emails, SuppressionSource::Agent, reason)
            .await;
        let outcome = match &result {
            Ok(_) => DecisionOutcome::Executed,
            Err(e) => DecisionOutcome::Failed {
                error: e.to_string(),
            },
        };
        let mut decision = Decision::new(
            key,
            ActionTaken::SuppressRecipients { emails },
            format!("recipients behind {reason}"),
            outcome,
        );
        decision.context = Some(context.clone());
        self.parts.decisions.record(&decision).await;

        match result {
            Ok(summary) => {
                self.parts
                    .thoughts
                    .think(ThoughtKind::Action, key, format!("{}: {summary}", decision.action));
                info!(agent = %key, summary = %summary, "Agent suppressed recipients");
            }
            Err(e) => warn!(agent = %key, error = %e, "Agent recipient suppression failed"),
        }
        Some(decision)
    }

    async fn degrade(&self, key: AgentKey, reason: &str) -> Evaluation {
        if self.registry.status(key) != AgentStatus::Degraded {
            let why = format!("{reason}; remote commands suspended");
            self.registry.transition(key, AgentStatus::Degraded, why.clone());
            self.parts.thoughts.think(ThoughtKind::Failure, key, why.clone());
            warn!(agent = %key, "Agent degraded: remote commands suspended");
            self.parts
                .alerter
                .send(
                    &Alert::new(Severity::Critical, format!("{key} degraded"), why)
                        .for_agent(key.isp, key.agent_type),
                )
                .await;
        }
        Evaluation::Degraded
    }

    async fn act(
        &self,
        key: AgentKey,
        action: ActionTaken,
        reason: String,
        context: MicroContext,
        synthesis: &RecallSynthesis,
    ) -> Evaluation {
        let result = self.parts.executor.execute(&action).await;
        let outcome = match &result {
            Ok(_) => DecisionOutcome::Executed,
            Err(e) => DecisionOutcome::Failed {
                error: e.to_string(),
            },
        };

        let mut decision = Decision::new(key, action, reason.clone(), outcome);
        decision.context = Some(context.clone());
        self.parts.decisions.record(&decision).await;

        match result {
            Ok(output) => {
                self.parts
                    .alerter
                    .send(
                        &Alert::new(
                            Severity::Warning,
                            format!("{key}: {}", decision.action),
                            reason.clone(),
                        )
                        .for_agent(key.isp, key.agent_type)
                        .with_decision(decision.id),
                    )
                    .await;
                self.registry.update(key, |s| {
                    s.status = AgentStatus::Firing;
                    s.last_decision_at = Some(decision.timestamp);
                    s.last_reason = Some(reason.clone());
                });

                let leaned_will = synthesis.dominant_verdict == Some(Verdict::Will);
                let confidence = if leaned_will {
                    synthesis.confidence.max(FIRED_CONFIDENCE)
                } else {
                    FIRED_CONFIDENCE
                };
                self.parts
                    .convictions
                    .record(Conviction::new(key, Verdict::Will, context, confidence));

                self.parts.thoughts.think(
                    ThoughtKind::Action,
                    key,
                    format!("{}: {reason}", decision.action),
                );
                info!(agent = %key, action = %decision.action, output = %output.trim(), "Agent fired");
                Evaluation::Fired(Box::new(decision))
            }
            Err(e) => {
                let why = format!("{} failed: {e}", decision.action);
                self.parts
                    .alerter
                    .send(
                        &Alert::new(Severity::Critical, format!("{key}: action failed"), why.clone())
                            .for_agent(key.isp, key.agent_type)
                            .with_decision(decision.id),
                    )
                    .await;

                let status = if matches!(e, Error::CircuitOpen) || !self.parts.executor.is_available()
                {
                    AgentStatus::Degraded
                } else {
                    AgentStatus::Active
                };
                self.registry.transition(key, status, why.clone());
                self.parts.thoughts.think(ThoughtKind::Failure, key, why);
                warn!(agent = %key, action = %decision.action, error = %e, "Agent action failed");
                Evaluation::Failed(Box::new(decision))
            }
        }
    }
}

fn describe_breach(agent_type: AgentType, reading: &Reading) -> String {
    match agent_type {
        AgentType::Warmup => format!(
            "sent {:.0} in the last hour, warmup limit {:.0}",
            reading.metric, reading.action
        ),
        _ => format!(
            "{agent_type} rate {:.2}% at or above action threshold {:.2}%",
            reading.metric * 100.0,
            reading.action * 100.0
        ),
    }
}

/// The remediation for a breach.
fn choose_action(agent_type: AgentType, config: &IspConfig, inputs: &ContextInputs) -> ActionTaken {
    let queue = config.queue.clone();
    match agent_type {
        AgentType::Bounce => match &inputs.top_bounce_ip {
            Some(ip) => ActionTaken::QuarantineIp { ip: ip.clone() },
            None => ActionTaken::PauseQueue { queue },
        },
        AgentType::Complaint => ActionTaken::PauseQueue { queue },
        AgentType::Deferral => ActionTaken::ThrottleQueue {
            queue,
            max_msg_rate: config.max_msg_rate,
            max_connections: config.max_connections,
        },
        AgentType::Warmup => ActionTaken::PauseWarmup { queue },
    }
}
