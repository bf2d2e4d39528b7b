//! ISP and agent identity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Destination mailbox provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isp {
    /// Gmail and Google Workspace consumer domains.
    Gmail,
    /// Yahoo and AOL.
    Yahoo,
    /// Outlook.com, Hotmail, Live, MSN.
    Microsoft,
    /// iCloud.
    Apple,
    /// Comcast (Xfinity).
    Comcast,
    /// AT&T, including SBCGlobal and BellSouth.
    Att,
    /// Cox.
    Cox,
    /// Charter (Spectrum).
    Charter,
    /// Every other domain.
    Other,
}

impl Isp {
    /// Every provider, in display order.
    pub const ALL: [Self; 9] = [
        Self::Gmail,
        Self::Yahoo,
        Self::Microsoft,
        Self::Apple,
        Self::Comcast,
        Self::Att,
        Self::Cox,
        Self::Charter,
        Self::Other,
    ];

    /// Returns the lowercase identifier used in URLs and storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Yahoo => "yahoo",
            Self::Microsoft => "microsoft",
            Self::Apple => "apple",
            Self::Comcast => "comcast",
            Self::Att => "att",
            Self::Cox => "cox",
            Self::Charter => "charter",
            Self::Other => "other",
        }
    }

    /// Parses an identifier produced by [`Isp::as_str`].
    ///
    /// # Errors
    ///
    /// Returns an error for unknown identifiers.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|isp| isp.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown ISP: {s}")))
    }

    /// Maps a recipient domain to its provider.
    #[must_use]
    pub fn from_domain(domain: &str) -> Self {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        let base = domain.as_str();

        match base {
            "gmail.com" | "googlemail.com" => Self::Gmail,
            "ymail.com" | "rocketmail.com" | "aol.com" | "aim.com" => Self::Yahoo,
            "msn.com" | "passport.com" => Self::Microsoft,
            "icloud.com" | "me.com" | "mac.com" => Self::Apple,
            "comcast.net" | "xfinity.com" => Self::Comcast,
            "att.net" | "sbcglobal.net" | "bellsouth.net" | "pacbell.net" | "swbell.net" => {
                Self::Att
            }
            "cox.net" => Self::Cox,
            "charter.net" | "spectrum.net" | "twc.com" | "rr.com" => Self::Charter,
            _ if has_label(base, "yahoo") => Self::Yahoo,
            _ if has_label(base, "hotmail")
                || has_label(base, "outlook")
                || has_label(base, "live") =>
            {
                Self::Microsoft
            }
            _ if base.ends_with(".rr.com") => Self::Charter,
            _ => Self::Other,
        }
    }

    /// Maps a recipient address to its provider.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        email
            .rsplit_once('@')
            .map_or(Self::Other, |(_, domain)| Self::from_domain(domain))
    }
}

/// True for `label.tld` and `label.co.tld` style domains (`yahoo.co.uk`).
fn has_label(domain: &str, label: &str) -> bool {
    domain
        .strip_prefix(label)
        .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
}

impl fmt::Display for Isp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Governance concern watched by one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Watches the one-hour bounce rate.
    Bounce,
    /// Watches the one-hour complaint rate.
    Complaint,
    /// Watches the five-minute deferral rate.
    Deferral,
    /// Keeps hourly volume under the warmup limit.
    Warmup,
}

impl AgentType {
    /// Every agent type.
    pub const ALL: [Self; 4] = [Self::Bounce, Self::Complaint, Self::Deferral, Self::Warmup];

    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::Complaint => "complaint",
            Self::Deferral => "deferral",
            Self::Warmup => "warmup",
        }
    }

    /// Parses an identifier produced by [`AgentType::as_str`].
    ///
    /// # Errors
    ///
    /// Returns an error for unknown identifiers.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown agent type: {s}")))
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lifecycle status of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Signals are below the warning threshold.
    #[default]
    Idle,
    /// Signals crossed the warning threshold.
    Active,
    /// An action was executed.
    Firing,
    /// Frozen by an operator.
    Paused,
    /// Remote commands are suspended by the circuit breaker.
    Degraded,
}

impl AgentStatus {
    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Firing => "firing",
            Self::Paused => "paused",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one agent: the (ISP, agent type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentKey {
    /// Destination provider.
    pub isp: Isp,
    /// Governance concern.
    pub agent_type: AgentType,
}

impl AgentKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(isp: Isp, agent_type: AgentType) -> Self {
        Self { isp, agent_type }
    }

    /// Returns every (ISP, agent type) pair.
    pub fn all() -> impl Iterator<Item = Self> {
        Isp::ALL
            .into_iter()
            .flat_map(|isp| AgentType::ALL.into_iter().map(move |t| Self::new(isp, t)))
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.isp, self.agent_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_domain() {
        assert_eq!(Isp::from_domain("gmail.com"), Isp::Gmail);
        assert_eq!(Isp::from_domain("Yahoo.co.uk"), Isp::Yahoo);
        assert_eq!(Isp::from_domain("aol.com"), Isp::Yahoo);
        assert_eq!(Isp::from_domain("hotmail.fr"), Isp::Microsoft);
        assert_eq!(Isp::from_domain("outlook.com"), Isp::Microsoft);
        assert_eq!(Isp::from_domain("me.com"), Isp::Apple);
        assert_eq!(Isp::from_domain("sbcglobal.net"), Isp::Att);
        assert_eq!(Isp::from_domain("nyc.rr.com"), Isp::Charter);
        assert_eq!(Isp::from_domain("example.com"), Isp::Other);
        assert_eq!(Isp::from_domain("yahoo"), Isp::Other);
    }

    #[test]
    fn test_from_email() {
        assert_eq!(Isp::from_email("user@cox.net"), Isp::Cox);
        assert_eq!(Isp::from_email("no-domain"), Isp::Other);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Isp::parse("Yahoo").unwrap(), Isp::Yahoo);
        assert!(Isp::parse("hotmail").is_err());
        assert_eq!("warmup".parse::<AgentType>().unwrap(), AgentType::Warmup);
    }

    #[test]
    fn test_all_keys() {
        assert_eq!(AgentKey::all().count(), Isp::ALL.len() * AgentType::ALL.len());
        assert_eq!(AgentKey::new(Isp::Yahoo, AgentType::Bounce).to_string(), "yahoo/bounce");
    }
}
