//! Rule and threshold types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::isp::{AgentType, Isp};
use crate::signals::SignalSnapshot;
use crate::{Error, Result};

/// A value a rule can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Bounce rate over the last hour.
    BounceRate1h,
    /// Deferral rate over the last five minutes.
    DeferralRate5m,
    /// Complaint rate over the last hour.
    ComplaintRate1h,
    /// Attempts per minute over the last five minutes.
    AttemptedRate,
    /// Messages sent in the last hour.
    Sent1h,
}

impl Metric {
    /// Returns the metric's name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BounceRate1h => "bounce_rate_1h",
            Self::DeferralRate5m => "deferral_rate_5m",
            Self::ComplaintRate1h => "complaint_rate_1h",
            Self::AttemptedRate => "attempted_rate",
            Self::Sent1h => "sent_1h",
        }
    }

    /// Parses a metric name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "bounce_rate_1h" => Ok(Self::BounceRate1h),
            "deferral_rate_5m" => Ok(Self::DeferralRate5m),
            "complaint_rate_1h" => Ok(Self::ComplaintRate1h),
            "attempted_rate" => Ok(Self::AttemptedRate),
            "sent_1h" => Ok(Self::Sent1h),
            _ => Err(Error::InvalidInput(format!("unknown metric: {s}"))),
        }
    }

    /// Reads the metric from a snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn value(&self, snapshot: &SignalSnapshot) -> f64 {
        match self {
            Self::BounceRate1h => snapshot.bounce_rate_1h,
            Self::DeferralRate5m => snapshot.deferral_rate_5m,
            Self::ComplaintRate1h => snapshot.complaint_rate_1h,
            Self::AttemptedRate => snapshot.attempted_rate,
            Self::Sent1h => snapshot.window_1h.sent as f64,
        }
    }

    /// Returns true for ratios bounded by 0 and 1.
    #[must_use]
    pub const fn is_ratio(&self) -> bool {
        matches!(
            self,
            Self::BounceRate1h | Self::DeferralRate5m | Self::ComplaintRate1h
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a metric is compared with a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl Comparison {
    /// Returns the comparison's name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    /// Parses a comparison name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            _ => Err(Error::InvalidInput(format!("unknown comparison: {s}"))),
        }
    }

    /// Applies the comparison.
    #[must_use]
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
        }
    }
}

/// Operator-defined condition. An enabled rule that holds counts as an
/// action-threshold breach for its agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier.
    pub id: i64,
    /// Provider.
    pub isp: Isp,
    /// Agent the rule drives.
    pub agent_type: AgentType,
    /// Metric tested.
    pub metric: Metric,
    /// Comparison.
    pub comparison: Comparison,
    /// Threshold.
    pub threshold: f64,
    /// Whether the rule is evaluated.
    pub enabled: bool,
    /// Operator notes.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Returns true if the rule is enabled and its condition holds.
    #[must_use]
    pub fn matches(&self, snapshot: &SignalSnapshot) -> bool {
        self.enabled
            && self
                .comparison
                .holds(self.metric.value(snapshot), self.threshold)
    }
}

/// Fields of a rule supplied by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    /// Provider.
    pub isp: Isp,
    /// Agent the rule drives.
    pub agent_type: AgentType,
    /// Metric tested.
    pub metric: Metric,
    /// Comparison.
    pub comparison: Comparison,
    /// Threshold.
    pub threshold: f64,
    /// Whether the rule is evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Operator notes.
    #[serde(default)]
    pub description: String,
}

const fn default_enabled() -> bool {
    true
}

/// Thresholds and sending limits for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IspConfig {
    /// Provider.
    pub isp: Isp,
    /// Bounce rate that raises a warning.
    pub bounce_warn: f64,
    /// Bounce rate that triggers action.
    pub bounce_action: f64,
    /// Complaint rate that raises a warning.
    pub complaint_warn: f64,
    /// Complaint rate that triggers action.
    pub complaint_action: f64,
    /// Deferral rate that raises a warning.
    pub deferral_warn: f64,
    /// Deferral rate that triggers action.
    pub deferral_action: f64,
    /// Connections allowed when throttled.
    pub max_connections: u32,
    /// Messages per hour allowed when throttled.
    pub max_msg_rate: u32,
    /// Deferral codes that indicate provider throttling.
    pub deferral_codes: Vec<String>,
    /// Hourly volume limit while warming up. Zero disables the warmup agent.
    pub warmup_hourly_limit: u64,
    /// Transfer-agent queue selector for this provider.
    pub queue: String,
}

impl IspConfig {
    /// Seeded defaults for `isp`.
    #[must_use]
    pub fn defaults(isp: Isp) -> Self {
        let (queue, max_connections, max_msg_rate, deferral_codes): (&str, u32, u32, &[&str]) =
            match isp {
                Isp::Gmail => ("gmail.com/*", 10, 20_000, &["4.7.28", "4.7.0", "421"]),
                Isp::Yahoo => ("yahoo.com/*", 5, 10_000, &["TSS04", "TS03", "4.7.0", "421"]),
                Isp::Microsoft => ("hotmail.com/*", 5, 10_000, &["4.7.650", "4.7.500", "451"]),
                Isp::Apple => ("icloud.com/*", 4, 5_000, &["4.7.1", "421"]),
                Isp::Comcast => ("comcast.net/*", 2, 2_000, &["RL000001", "421"]),
                Isp::Att => ("att.net/*", 2, 2_000, &["421", "4.3.2"]),
                Isp::Cox => ("cox.net/*", 2, 2_000, &["CXTHRT", "421"]),
                Isp::Charter => ("charter.net/*", 2, 2_000, &["421"]),
                Isp::Other => ("*/*", 5, 10_000, &["421"]),
            };

        let (complaint_warn, complaint_action) = match isp {
            Isp::Gmail | Isp::Yahoo => (0.001, 0.003),
            _ => (0.002, 0.005),
        };

        Self {
            isp,
            bounce_warn: 0.03,
            bounce_action: 0.05,
            complaint_warn,
            complaint_action,
            deferral_warn: 0.15,
            deferral_action: 0.30,
            max_connections,
            max_msg_rate,
            deferral_codes: deferral_codes.iter().map(ToString::to_string).collect(),
            warmup_hourly_limit: 0,
            queue: queue.to_string(),
        }
    }

    /// Returns (warn, action) thresholds for an agent type's primary metric.
    ///
    /// The warmup agent's thresholds are message counts: 80% of the hourly
    /// limit warns, the limit itself triggers action.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn thresholds(&self, agent_type: AgentType) -> (f64, f64) {
        match agent_type {
            AgentType::Bounce => (self.bounce_warn, self.bounce_action),
            AgentType::Complaint => (self.complaint_warn, self.complaint_action),
            AgentType::Deferral => (self.deferral_warn, self.deferral_action),
            AgentType::Warmup => {
                let limit = self.warmup_hourly_limit as f64;
                (limit * 0.8, limit)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_matches() {
        let mut snapshot = SignalSnapshot::empty(Isp::Yahoo, Utc::now());
        snapshot.bounce_rate_1h = 0.06;

        let mut rule = Rule {
            id: 1,
            isp: Isp::Yahoo,
            agent_type: AgentType::Bounce,
            metric: Metric::BounceRate1h,
            comparison: Comparison::Gt,
            threshold: 0.05,
            enabled: true,
            description: String::new(),
            created_at: Utc::now(),
        };
        assert!(rule.matches(&snapshot));

        rule.enabled = false;
        assert!(!rule.matches(&snapshot));
    }

    #[test]
    fn test_defaults_are_ordered() {
        for isp in Isp::ALL {
            let config = IspConfig::defaults(isp);
            for agent in [AgentType::Bounce, AgentType::Complaint, AgentType::Deferral] {
                let (warn, action) = config.thresholds(agent);
                assert!(warn < action, "{isp} {agent}");
            }
        }
        assert_eq!(IspConfig::defaults(Isp::Yahoo).bounce_action, 0.05);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(Metric::parse("sent_1h").unwrap(), Metric::Sent1h);
        assert_eq!(Comparison::parse(">=").unwrap(), Comparison::Gte);
        assert!(Metric::parse("opens").is_err());
    }
}
