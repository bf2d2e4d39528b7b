//! Conviction data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::MicroContext;
use crate::isp::{AgentKey, AgentType, Isp};
use crate::{Error, Result};

/// A verdict about acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Acting was right.
    Will,
    /// Acting was wrong.
    Wont,
}

impl Verdict {
    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Will => "will",
            Self::Wont => "wont",
        }
    }

    /// Parses `will` or `wont`.
    ///
    /// # Errors
    ///
    /// Returns an error for anything else.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "will" => Ok(Self::Will),
            "wont" | "won't" => Ok(Self::Wont),
            other => Err(Error::InvalidInput(format!("unknown verdict: {other}"))),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded verdict. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conviction {
    /// Provider.
    pub isp: Isp,
    /// Agent type.
    pub agent_type: AgentType,
    /// Verdict.
    pub verdict: Verdict,
    /// Situation at the time.
    pub context: MicroContext,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
    /// How sure the recorder was, 0..=1.
    pub confidence: f64,
    /// Free-form note, e.g. from an operator.
    #[serde(default)]
    pub note: Option<String>,
}

impl Conviction {
    /// Creates a conviction recorded now.
    #[must_use]
    pub fn new(key: AgentKey, verdict: Verdict, context: MicroContext, confidence: f64) -> Self {
        Self {
            isp: key.isp,
            agent_type: key.agent_type,
            verdict,
            context,
            timestamp: Utc::now(),
            confidence: confidence.clamp(0.0, 1.0),
            note: None,
        }
    }

    /// Adds a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Returns the agent this conviction belongs to.
    #[must_use]
    pub const fn key(&self) -> AgentKey {
        AgentKey::new(self.isp, self.agent_type)
    }
}

/// A recalled conviction with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredConviction {
    /// The conviction.
    pub conviction: Conviction,
    /// Similarity, 0..=1.
    pub score: f64,
}

/// Verdict counts for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvictionStats {
    /// `Will` convictions.
    pub will: usize,
    /// `Wont` convictions.
    pub wont: usize,
}

impl ConvictionStats {
    /// Total convictions.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.will + self.wont
    }
}

/// Summary of recalled precedent.
#[derive(Debug, Clone, Serialize)]
pub struct RecallSynthesis {
    /// Human-readable observations.
    pub key_observations: Vec<String>,
    /// Verdict the precedent leans to; `None` when there is none or it is split evenly.
    pub dominant_verdict: Option<Verdict>,
    /// Share of weighted precedent agreeing with the dominant verdict.
    pub confidence: f64,
    /// Number of precedents considered.
    pub matches: usize,
}

impl RecallSynthesis {
    /// Synthesis of no precedent.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            key_observations: vec!["No similar precedent".to_string()],
            dominant_verdict: None,
            confidence: 0.0,
            matches: 0,
        }
    }
}
