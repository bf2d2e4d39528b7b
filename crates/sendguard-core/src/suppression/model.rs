//! Suppression data types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::isp::Isp;
use crate::{Error, Result};

/// Normalizes an address for storage and lookup: trimmed, lowercase.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Which list an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Scope {
    /// The global list.
    Global,
    /// One provider's list.
    Isp(Isp),
}

impl Scope {
    /// Returns `global` or the ISP identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Isp(isp) => isp.as_str(),
        }
    }

    /// Parses `global` or an ISP identifier.
    ///
    /// # Errors
    ///
    /// Returns an error for anything else.
    pub fn parse(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("global") {
            Ok(Self::Global)
        } else {
            Isp::parse(s).map(Self::Isp)
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_str().to_string()
    }
}

impl TryFrom<String> for Scope {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// What triggered a suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionSource {
    /// An agent decision.
    Agent,
    /// A permanent recipient-level bounce.
    HardBounce,
    /// A complaint in the accounting stream.
    Complaint,
    /// An ARF/FBL abuse report.
    FeedbackLoop,
    /// A list-unsubscribe request.
    Unsubscribe,
    /// No engagement over many deliveries.
    Inactivity,
    /// A CSV import.
    Import,
    /// Added by an operator.
    Operator,
}

impl SuppressionSource {
    /// Every source.
    pub const ALL: [Self; 8] = [
        Self::Agent,
        Self::HardBounce,
        Self::Complaint,
        Self::FeedbackLoop,
        Self::Unsubscribe,
        Self::Inactivity,
        Self::Import,
        Self::Operator,
    ];

    /// Returns the snake-case identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::HardBounce => "hard_bounce",
            Self::Complaint => "complaint",
            Self::FeedbackLoop => "feedback_loop",
            Self::Unsubscribe => "unsubscribe",
            Self::Inactivity => "inactivity",
            Self::Import => "import",
            Self::Operator => "operator",
        }
    }

    /// Parses an identifier, defaulting to `Operator` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|src| src.as_str() == s)
            .unwrap_or(Self::Operator)
    }
}

impl fmt::Display for SuppressionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A do-not-send entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    /// Normalized address.
    pub email: String,
    /// List the entry belongs to.
    pub scope: Scope,
    /// Why it was suppressed.
    pub reason: String,
    /// Status code that triggered it.
    pub dsn_code: Option<String>,
    /// Source IP of the triggering delivery.
    pub source_ip: Option<String>,
    /// Campaign of the triggering message.
    pub campaign_id: Option<String>,
    /// Trigger kind.
    pub source: SuppressionSource,
    /// When it was suppressed.
    pub suppressed_at: DateTime<Utc>,
}

impl Suppression {
    /// Creates an entry suppressed now.
    #[must_use]
    pub fn new(
        email: &str,
        scope: Scope,
        source: SuppressionSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            email: normalize_email(email),
            scope,
            reason: reason.into(),
            dsn_code: None,
            source_ip: None,
            campaign_id: None,
            source,
            suppressed_at: Utc::now(),
        }
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_dsn_code(mut self, code: Option<String>) -> Self {
        self.dsn_code = code;
        self
    }

    /// Sets the source IP.
    #[must_use]
    pub fn with_source_ip(mut self, ip: Option<String>) -> Self {
        self.source_ip = ip;
        self
    }

    /// Sets the campaign.
    #[must_use]
    pub fn with_campaign_id(mut self, campaign_id: Option<String>) -> Self {
        self.campaign_id = campaign_id;
        self
    }

    /// Returns a copy of this entry for another list.
    #[must_use]
    pub fn rescoped(&self, scope: Scope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }
}

/// Summary of one list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuppressionStats {
    /// Entries.
    pub total: u64,
    /// Entries added in the last 24 hours.
    pub last_24h: u64,
    /// Entries per source.
    pub by_source: BTreeMap<String, u64>,
    /// Most recent entry time.
    pub latest: Option<DateTime<Utc>>,
}

/// Outcome of a CSV import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Data rows read.
    pub rows: usize,
    /// Newly suppressed.
    pub imported: usize,
    /// Already suppressed.
    pub duplicates: usize,
    /// Rows without a usable address.
    pub invalid: usize,
    /// Rows that could not be stored.
    pub failed: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!(Scope::parse("GLOBAL").unwrap(), Scope::Global);
        assert_eq!(Scope::parse("yahoo").unwrap(), Scope::Isp(Isp::Yahoo));
        assert!(Scope::parse("nowhere").is_err());
    }

    #[test]
    fn test_new_normalizes() {
        let s = Suppression::new(" User@Yahoo.COM ", Scope::Global, SuppressionSource::Operator, "x");
        assert_eq!(s.email, "user@yahoo.com");
    }

    #[test]
    fn test_scope_serde() {
        let json = serde_json::to_string(&Scope::Isp(Isp::Gmail)).unwrap();
        assert_eq!(json, "\"gmail\"");
        assert_eq!(serde_json::from_str::<Scope>("\"global\"").unwrap(), Scope::Global);
    }
}
