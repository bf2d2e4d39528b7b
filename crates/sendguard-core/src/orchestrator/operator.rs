//! Operator interventions: pause, resume, override and teaching.

use chrono::{TimeDelta, Utc};
use sendguard_acct::Address;
use tracing::{debug, info, warn};

use super::{Orchestrator, PAUSES_NAMESPACE, PauseRecord};
use crate::alerter::{Alert, Severity};
use crate::context::MicroContext;
use crate::convictions::{Conviction, Verdict};
use crate::decisions::{ActionTaken, Decision, DecisionOutcome};
use crate::isp::{AgentKey, AgentStatus, Isp};
use crate::suppression::{Scope, Suppression, SuppressionSource};
use crate::thoughts::ThoughtKind;
use crate::{Error, Result};

/// Confidence of a `Wont` learned from an operator undoing an action.
const REVERSAL_CONFIDENCE: f64 = 0.8;

/// Confidence of a verdict taught directly by an operator.
const TAUGHT_CONFIDENCE: f64 = 0.9;

impl Orchestrator {
    /// Freezes one agent. The pause survives restarts.
    ///
    /// Waits for an in-flight evaluation of the agent to finish first.
    ///
    /// # Errors
    ///
    /// Returns an error if the pause cannot be persisted.
    pub async fn pause_agent(
        &self,
        key: AgentKey,
        reason: Option<String>,
    ) -> Result<super::AgentState> {
        let _turn = self.turn(key).lock().await;
        let record = PauseRecord {
            paused_at: Utc::now(),
            reason: reason.clone(),
        };
        self.parts
            .memory
            .put_json(PAUSES_NAMESPACE, &key.to_string(), &record)
            .await?;

        let why = reason.unwrap_or_else(|| "paused by operator".to_string());
        let state = self.registry.transition(key, AgentStatus::Paused, why.clone());
        self.parts
            .thoughts
            .think(ThoughtKind::Operator, key, format!("Paused: {why}"));
        info!(agent = %key, reason = %why, "Agent paused");
        Ok(state)
    }

    /// Unfreezes one agent. Resuming an agent that is not paused is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored pause cannot be removed.
    pub async fn resume_agent(&self, key: AgentKey) -> Result<super::AgentState> {
        let _turn = self.turn(key).lock().await;
        if self.registry.status(key) != AgentStatus::Paused {
            return Ok(self.registry.get(key));
        }

        self.parts
            .memory
            .delete(PAUSES_NAMESPACE, &key.to_string())
            .await?;
        let state = self
            .registry
            .transition(key, AgentStatus::Active, "resumed by operator");
        self.parts
            .thoughts
            .think(ThoughtKind::Operator, key, "Resumed");
        info!(agent = %key, "Agent resumed");
        Ok(state)
    }

    /// Issues an action on behalf of an operator, bypassing evaluation.
    ///
    /// The attempt is recorded as an operator decision whether or not it
    /// succeeds. Undoing an agent's recent action teaches the agent a `Wont`
    /// for the situation it acted in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty recipient list; execution failures
    /// are reported in the returned decision instead.
    pub async fn override_action(
        &self,
        key: AgentKey,
        action: ActionTaken,
        reason: impl Into<String>,
    ) -> Result<Decision> {
        let reason = reason.into();
        if let ActionTaken::SuppressRecipients { emails } = &action
            && emails.is_empty()
        {
            return Err(Error::InvalidInput("no recipients to suppress".to_string()));
        }

        let _turn = self.turn(key).lock().await;
        let result = match &action {
            ActionTaken::SuppressRecipients { emails } => {
                self.suppress_recipients(key.isp, emails, SuppressionSource::Operator, &reason)
                    .await
            }
            ActionTaken::PushSuppressionFile => self
                .parts
                .hub
                .sync_now()
                .await
                .map(|report| format!("pushed {} entries", report.entries)),
            other => self.parts.executor.execute(other).await,
        };

        let outcome = match &result {
            Ok(_) => DecisionOutcome::Executed,
            Err(e) => DecisionOutcome::Failed {
                error: e.to_string(),
            },
        };
        let mut decision = Decision::new(key, action, reason.clone(), outcome);
        decision.operator = true;
        self.parts.decisions.record(&decision).await;

        let (severity, title) = match &result {
            Ok(_) => (Severity::Info, format!("{key}: operator {}", decision.action)),
            Err(_) => (
                Severity::Critical,
                format!("{key}: operator {} failed", decision.action),
            ),
        };
        let message = match &result {
            Ok(output) => format!("{reason} ({})", output.trim()),
            Err(e) => format!("{reason}: {e}"),
        };
        self.parts
            .alerter
            .send(
                &Alert::new(severity, title, message)
                    .for_agent(key.isp, key.agent_type)
                    .with_decision(decision.id),
            )
            .await;

        match &result {
            Ok(_) => {
                self.parts.thoughts.think(
                    ThoughtKind::Operator,
                    key,
                    format!("Operator issued {}: {reason}", decision.action),
                );
                info!(agent = %key, action = %decision.action, "Operator override executed");
                self.learn_from_reversal(key, &decision);
            }
            Err(e) => {
                warn!(agent = %key, action = %decision.action, error = %e, "Operator override failed");
            }
        }

        Ok(decision)
    }

    /// Suppresses `emails` for `isp`.
    ///
    /// Invalid addresses and entries that fail to store are counted and
    /// skipped. Fails only when no recipient could be stored.
    pub(super) async fn suppress_recipients(
        &self,
        isp: Isp,
        emails: &[String],
        source: SuppressionSource,
        reason: &str,
    ) -> Result<String> {
        let mut added = 0;
        let mut invalid = 0;
        let mut failed = 0;
        let mut last_error = None;

        for email in emails {
            let Ok(address) = Address::new(email) else {
                debug!(%isp, email = %email, "Skipping invalid recipient");
                invalid += 1;
                continue;
            };
            let entry = Suppression::new(address.as_str(), Scope::Isp(isp), source, reason);
            match self.parts.suppressions.suppress(&entry).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%isp, email = %entry.email, error = %e, "Failed to suppress recipient");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if invalid + failed == emails.len() {
            return Err(last_error
                .unwrap_or_else(|| Error::InvalidInput("no valid recipients".to_string())));
        }
        Ok(format!(
            "suppressed {added} of {} recipients ({invalid} invalid, {failed} failed)",
            emails.len()
        ))
    }

    /// Records a `Wont` when `decision` undoes the agent's last firing within
    /// the reversal window.
    fn learn_from_reversal(&self, key: AgentKey, decision: &Decision) {
        let Some(fired) = self.parts.decisions.last_fired(key.isp, key.agent_type) else {
            return;
        };
        let window =
            TimeDelta::from_std(self.settings.reversal_window()).unwrap_or(TimeDelta::hours(6));
        if !decision.action.reverses(&fired.action) || decision.timestamp - fired.timestamp > window
        {
            return;
        }

        let context = fired.context.clone().unwrap_or_default();
        self.parts.convictions.record(
            Conviction::new(key, Verdict::Wont, context, REVERSAL_CONFIDENCE).with_note(format!(
                "operator reversed {}: {}",
                fired.action, decision.reason
            )),
        );
        if self.registry.status(key) == AgentStatus::Firing {
            self.registry
                .transition(key, AgentStatus::Active, "reversed by operator");
        }
        self.parts.thoughts.think(
            ThoughtKind::Operator,
            key,
            format!("Learned not to {} in situations like this", fired.action),
        );
        info!(agent = %key, reversed = %fired.action, "Operator reversal recorded as precedent");
    }

    /// Records a verdict taught by an operator. Without a context, the
    /// current situation of the agent's ISP is used.
    pub fn teach(
        &self,
        key: AgentKey,
        verdict: Verdict,
        note: Option<String>,
        context: Option<MicroContext>,
    ) -> Conviction {
        let context = context.unwrap_or_else(|| {
            let now = Utc::now();
            MicroContext::capture(
                &self.parts.signals.snapshot_at(key.isp, now),
                &self.parts.signals.context_inputs_at(key.isp, now),
                now,
            )
        });

        let mut conviction = Conviction::new(key, verdict, context, TAUGHT_CONFIDENCE);
        if let Some(note) = note {
            conviction = conviction.with_note(note);
        }
        self.parts.convictions.record(conviction.clone());
        self.parts.thoughts.think(
            ThoughtKind::Operator,
            key,
            format!("Operator taught {verdict}"),
        );
        conviction
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::Evaluation;
    use super::super::testing::fixture;
    use super::*;
    use crate::isp::AgentType;
    use crate::settings::EngineSettings;
    use crate::signals::EventKind;

    const YAHOO_BOUNCE: AgentKey = AgentKey::new(Isp::Yahoo, AgentType::Bounce);

    #[tokio::test]
    async fn test_resume_after_firing_teaches_wont() {
        let f = fixture(EngineSettings::default()).await;
        f.parts.signals.record_event(Isp::Yahoo, EventKind::Delivered, 94);
        f.parts.signals.record_event(Isp::Yahoo, EventKind::Bounced, 6);
        let Evaluation::Fired(fired) = f.orchestrator.evaluate_once(YAHOO_BOUNCE).await else {
            panic!("expected the agent to fire");
        };
        let ActionTaken::PauseQueue { queue } = fired.action.clone() else {
            panic!("expected a queue pause");
        };

        let decision = f
            .orchestrator
            .override_action(YAHOO_BOUNCE, ActionTaken::ResumeQueue { queue }, "false alarm")
            .await
            .unwrap();
        assert!(decision.operator);
        assert!(decision.outcome.is_executed());

        let wont = f
            .parts
            .convictions
            .recall_by_verdict(Isp::Yahoo, AgentType::Bounce, Verdict::Wont);
        assert_eq!(wont.len(), 1);
        assert_eq!(Some(&wont[0].context), fired.context.as_ref());
        assert_eq!(
            f.orchestrator.get_agent_state(YAHOO_BOUNCE).status,
            AgentStatus::Active
        );
        assert_eq!(f.orchestrator.get_recent_decisions(10).len(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_override_teaches_nothing() {
        let f = fixture(EngineSettings::default()).await;
        f.orchestrator
            .override_action(
                YAHOO_BOUNCE,
                ActionTaken::ReleaseIp {
                    ip: "10.0.0.1".to_string(),
                },
                "routine",
            )
            .await
            .unwrap();

        assert_eq!(
            f.parts.convictions.stats(Isp::Yahoo, AgentType::Bounce).total(),
            0
        );
        assert_eq!(f.alerter.sent()[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_operator_suppression_reaches_hub() {
        let f = fixture(EngineSettings::default()).await;
        let decision = f
            .orchestrator
            .override_action(
                YAHOO_BOUNCE,
                ActionTaken::SuppressRecipients {
                    emails: vec!["A@yahoo.com".to_string(), "a@yahoo.com".to_string()],
                },
                "spam trap",
            )
            .await
            .unwrap();

        assert!(decision.outcome.is_executed());
        assert!(f.parts.suppressions.is_suppressed(Isp::Yahoo, "a@yahoo.com"));
        assert!(!f.parts.hub.check_send("a@yahoo.com"));
        assert_eq!(f.parts.hub.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_a_failed_decision() {
        let f = fixture(EngineSettings::default()).await;
        let decision = f
            .orchestrator
            .override_action(
                YAHOO_BOUNCE,
                ActionTaken::SuppressRecipients {
                    emails: vec!["not-an-address".to_string()],
                },
                "typo",
            )
            .await
            .unwrap();
        assert!(!decision.outcome.is_executed());

        let empty = f
            .orchestrator
            .override_action(
                YAHOO_BOUNCE,
                ActionTaken::SuppressRecipients { emails: vec![] },
                "nothing",
            )
            .await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_invalid_recipient_does_not_abort_the_list() {
        let f = fixture(EngineSettings::default()).await;
        let decision = f
            .orchestrator
            .override_action(
                YAHOO_BOUNCE,
                ActionTaken::SuppressRecipients {
                    emails: vec![
                        "first@yahoo.com".to_string(),
                        "broken".to_string(),
                        "last@yahoo.com".to_string(),
                    ],
                },
                "spam traps",
            )
            .await
            .unwrap();

        assert!(decision.outcome.is_executed());
        assert!(f.parts.suppressions.is_suppressed(Isp::Yahoo, "first@yahoo.com"));
        assert!(f.parts.suppressions.is_suppressed(Isp::Yahoo, "last@yahoo.com"));
        assert_eq!(f.parts.hub.entry_count(), 2);
        assert!(f.alerter.sent()[0].message.contains("1 invalid"));
    }

    #[tokio::test]
    async fn test_teach_uses_current_context() {
        let f = fixture(EngineSettings::default()).await;
        let conviction = f.orchestrator.teach(
            YAHOO_BOUNCE,
            Verdict::Wont,
            Some("holiday spike is expected".to_string()),
            None,
        );
        assert_eq!(conviction.verdict, Verdict::Wont);
        assert_eq!(
            f.parts.convictions.stats(Isp::Yahoo, AgentType::Bounce).wont,
            1
        );
    }
}
