//! Decision data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::MicroContext;
use crate::isp::{AgentKey, AgentType, Isp};

/// An operational action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionTaken {
    /// Stop delivering a queue.
    PauseQueue {
        /// Queue selector.
        queue: String,
    },
    /// Resume a paused queue.
    ResumeQueue {
        /// Queue selector.
        queue: String,
    },
    /// Slow a queue down.
    ThrottleQueue {
        /// Queue selector.
        queue: String,
        /// Messages per hour.
        max_msg_rate: u32,
        /// Concurrent connections.
        max_connections: u32,
    },
    /// Take a source IP out of rotation.
    QuarantineIp {
        /// Source IP.
        ip: String,
    },
    /// Return a source IP to rotation.
    ReleaseIp {
        /// Source IP.
        ip: String,
    },
    /// Hold a warmup queue.
    PauseWarmup {
        /// Queue selector.
        queue: String,
    },
    /// Add addresses to the provider's suppression list.
    SuppressRecipients {
        /// Addresses.
        emails: Vec<String>,
    },
    /// Push the global suppression list to the transfer agent.
    PushSuppressionFile,
}

impl ActionTaken {
    /// Returns the snake-case action name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PauseQueue { .. } => "pause_queue",
            Self::ResumeQueue { .. } => "resume_queue",
            Self::ThrottleQueue { .. } => "throttle_queue",
            Self::QuarantineIp { .. } => "quarantine_ip",
            Self::ReleaseIp { .. } => "release_ip",
            Self::PauseWarmup { .. } => "pause_warmup",
            Self::SuppressRecipients { .. } => "suppress_recipients",
            Self::PushSuppressionFile => "push_suppression_file",
        }
    }

    /// Returns what the action targets (queue, IP, address count).
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::PauseQueue { queue }
            | Self::ResumeQueue { queue }
            | Self::PauseWarmup { queue }
            | Self::ThrottleQueue { queue, .. } => queue.clone(),
            Self::QuarantineIp { ip } | Self::ReleaseIp { ip } => ip.clone(),
            Self::SuppressRecipients { emails } => format!("{} recipients", emails.len()),
            Self::PushSuppressionFile => "global".to_string(),
        }
    }

    /// Returns true if this action undoes `earlier`.
    #[must_use]
    pub fn reverses(&self, earlier: &Self) -> bool {
        match (self, earlier) {
            (
                Self::ResumeQueue { queue },
                Self::PauseQueue { queue: q }
                | Self::PauseWarmup { queue: q }
                | Self::ThrottleQueue { queue: q, .. },
            ) => queue == q,
            (Self::ReleaseIp { ip }, Self::QuarantineIp { ip: i }) => ip == i,
            _ => false,
        }
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.target())
    }
}

/// How an action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The action completed.
    Executed,
    /// The action failed.
    Failed {
        /// Failure description.
        error: String,
    },
}

impl DecisionOutcome {
    /// Returns true for `Executed`.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

/// Audit record of one action. Never mutated once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Identifier.
    pub id: Uuid,
    /// Provider.
    pub isp: Isp,
    /// Agent type.
    pub agent_type: AgentType,
    /// Action.
    pub action: ActionTaken,
    /// Value the action targeted.
    pub target_value: String,
    /// Why the action was taken.
    pub reason: String,
    /// When it was taken.
    pub timestamp: DateTime<Utc>,
    /// How it ended.
    pub outcome: DecisionOutcome,
    /// Issued by an operator rather than an agent.
    pub operator: bool,
    /// Situation at the time, for agent decisions.
    #[serde(default)]
    pub context: Option<MicroContext>,
}

impl Decision {
    /// Creates a decision taken now.
    #[must_use]
    pub fn new(
        key: AgentKey,
        action: ActionTaken,
        reason: impl Into<String>,
        outcome: DecisionOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            isp: key.isp,
            agent_type: key.agent_type,
            target_value: action.target(),
            action,
            reason: reason.into(),
            timestamp: Utc::now(),
            outcome,
            operator: false,
            context: None,
        }
    }

    /// Returns the agent the decision belongs to.
    #[must_use]
    pub const fn key(&self) -> AgentKey {
        AgentKey::new(self.isp, self.agent_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reverses() {
        let pause = ActionTaken::PauseQueue {
            queue: "yahoo.com/*".to_string(),
        };
        let resume = ActionTaken::ResumeQueue {
            queue: "yahoo.com/*".to_string(),
        };
        let other = ActionTaken::ResumeQueue {
            queue: "gmail.com/*".to_string(),
        };
        assert!(resume.reverses(&pause));
        assert!(!other.reverses(&pause));
        assert!(
            ActionTaken::ReleaseIp { ip: "1.2.3.4".into() }
                .reverses(&ActionTaken::QuarantineIp { ip: "1.2.3.4".into() })
        );
    }

    #[test]
    fn test_action_json_shape() {
        let json = serde_json::to_value(ActionTaken::QuarantineIp {
            ip: "10.0.0.5".to_string(),
        })
        .unwrap();
        assert_eq!(json["action"], "quarantine_ip");
        assert_eq!(json["ip"], "10.0.0.5");

        let parsed: ActionTaken = serde_json::from_str(r#"{"action":"push_suppression_file"}"#).unwrap();
        assert_eq!(parsed, ActionTaken::PushSuppressionFile);
    }
}
