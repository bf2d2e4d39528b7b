//! Human-readable narration of what the engine observes and does.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::{Broadcaster, Subscription};
use crate::isp::{AgentKey, AgentType, Isp};
use crate::sync::lock;

/// Thoughts kept for late joiners.
pub const THOUGHT_CAPACITY: usize = 500;

/// What prompted a thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtKind {
    /// A signal crossed a threshold.
    Observation,
    /// Precedent was recalled.
    Recall,
    /// An action was withheld.
    Hold,
    /// An action was executed.
    Action,
    /// An action failed.
    Failure,
    /// An operator intervened.
    Operator,
    /// Signals or the executor recovered.
    Recovery,
}

impl fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Observation => "observation",
            Self::Recall => "recall",
            Self::Hold => "hold",
            Self::Action => "action",
            Self::Failure => "failure",
            Self::Operator => "operator",
            Self::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

/// One narrated thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    /// Monotonic identifier.
    pub id: u64,
    /// Kind.
    pub kind: ThoughtKind,
    /// Provider, when the thought concerns one agent.
    pub isp: Option<Isp>,
    /// Agent type, when the thought concerns one agent.
    pub agent_type: Option<AgentType>,
    /// Narration.
    pub message: String,
    /// When it was thought.
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring of recent thoughts plus a live stream.
pub struct ThoughtStream {
    next_id: AtomicU64,
    recent: Mutex<VecDeque<Thought>>,
    broadcaster: Broadcaster<Thought>,
}

impl ThoughtStream {
    /// Creates a stream whose subscribers buffer `subscriber_buffer` thoughts.
    #[must_use]
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            recent: Mutex::new(VecDeque::with_capacity(THOUGHT_CAPACITY)),
            broadcaster: Broadcaster::new("thoughts", subscriber_buffer),
        }
    }

    /// Records a thought about one agent.
    pub fn think(&self, kind: ThoughtKind, key: AgentKey, message: impl Into<String>) -> Thought {
        self.push(kind, Some(key.isp), Some(key.agent_type), message.into())
    }

    /// Records a thought not tied to an agent.
    pub fn note(&self, kind: ThoughtKind, isp: Option<Isp>, message: impl Into<String>) -> Thought {
        self.push(kind, isp, None, message.into())
    }

    fn push(
        &self,
        kind: ThoughtKind,
        isp: Option<Isp>,
        agent_type: Option<AgentType>,
        message: String,
    ) -> Thought {
        let thought = Thought {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            isp,
            agent_type,
            message,
            timestamp: Utc::now(),
        };

        {
            let mut recent = lock(&self.recent);
            if recent.len() == THOUGHT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(thought.clone());
        }
        self.broadcaster.publish(&thought);
        thought
    }

    /// Returns up to `limit` most recent thoughts, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Thought> {
        let recent = lock(&self.recent);
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Subscribes to new thoughts.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Thought> {
        self.broadcaster.subscribe()
    }

    /// Returns the broadcaster, for reaping.
    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster<Thought> {
        &self.broadcaster
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let stream = ThoughtStream::new(8);
        for i in 0..(THOUGHT_CAPACITY + 10) {
            stream.note(ThoughtKind::Observation, None, format!("t{i}"));
        }

        let recent = stream.recent(usize::MAX);
        assert_eq!(recent.len(), THOUGHT_CAPACITY);
        assert_eq!(recent[0].message, "t10");
        assert_eq!(stream.recent(2).last().unwrap().message, format!("t{}", THOUGHT_CAPACITY + 9));
    }

    #[tokio::test]
    async fn test_live_subscription() {
        let stream = ThoughtStream::new(8);
        let mut sub = stream.subscribe();
        let key = AgentKey::new(Isp::Gmail, AgentType::Deferral);
        stream.think(ThoughtKind::Hold, key, "holding");

        let thought = sub.recv().await.unwrap();
        assert_eq!(thought.kind, ThoughtKind::Hold);
        assert_eq!(thought.isp, Some(Isp::Gmail));
    }
}
