//! Per-ISP health score.

use serde::Serialize;

use super::Orchestrator;
use crate::isp::{AgentStatus, Isp};
use crate::rules::IspConfig;
use crate::signals::SignalSnapshot;

const BOUNCE_WEIGHT: f64 = 30.0;
const COMPLAINT_WEIGHT: f64 = 30.0;
const DEFERRAL_WEIGHT: f64 = 20.0;
const FIRING_PENALTY: f64 = 10.0;
const DEGRADED_PENALTY: f64 = 5.0;

/// Health summary of one ISP.
#[derive(Debug, Clone, Serialize)]
pub struct IspHealth {
    /// Provider.
    pub isp: Isp,
    /// 0 (critical) to 100 (healthy).
    pub score: u8,
    /// `healthy`, `warning` or `critical`.
    pub grade: &'static str,
    /// One-hour bounce rate.
    pub bounce_rate_1h: f64,
    /// One-hour complaint rate.
    pub complaint_rate_1h: f64,
    /// Five-minute deferral rate.
    pub deferral_rate_5m: f64,
    /// Agents currently firing.
    pub firing: usize,
    /// Agents paused by an operator.
    pub paused: usize,
    /// Agents whose remote commands are suspended.
    pub degraded: usize,
}

impl Orchestrator {
    /// Scores the ISP from its rates relative to its action thresholds and
    /// from its agents' states.
    #[must_use]
    pub fn isp_health(&self, isp: Isp) -> IspHealth {
        let snapshot = self.parts.signals.snapshot(isp);
        let config = self.parts.rules.isp_config(isp);
        let agents = self.registry.for_isp(isp);
        let count = |status| agents.iter().filter(|a| a.status == status).count();

        let firing = count(AgentStatus::Firing);
        let degraded = count(AgentStatus::Degraded);
        let score = score(&snapshot, &config, firing, degraded);

        IspHealth {
            isp,
            score,
            grade: grade(score),
            bounce_rate_1h: snapshot.bounce_rate_1h,
            complaint_rate_1h: snapshot.complaint_rate_1h,
            deferral_rate_5m: snapshot.deferral_rate_5m,
            firing,
            paused: count(AgentStatus::Paused),
            degraded,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn score(snapshot: &SignalSnapshot, config: &IspConfig, firing: usize, degraded: usize) -> u8 {
    let penalty = penalty(snapshot.bounce_rate_1h, config.bounce_action, BOUNCE_WEIGHT)
        + penalty(snapshot.complaint_rate_1h, config.complaint_action, COMPLAINT_WEIGHT)
        + penalty(snapshot.deferral_rate_5m, config.deferral_action, DEFERRAL_WEIGHT)
        + firing as f64 * FIRING_PENALTY
        + degraded as f64 * DEGRADED_PENALTY;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = (100.0 - penalty).clamp(0.0, 100.0).round() as u8;
    score
}

/// Up to `weight`, reached when `rate` hits the action threshold.
fn penalty(rate: f64, action: f64, weight: f64) -> f64 {
    if action <= 0.0 {
        return 0.0;
    }
    (rate / action).clamp(0.0, 1.0) * weight
}

const fn grade(score: u8) -> &'static str {
    match score {
        80..=100 => "healthy",
        50..=79 => "warning",
        _ => "critical",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_quiet_isp_is_healthy() {
        let snapshot = SignalSnapshot::empty(Isp::Gmail, Utc::now());
        let config = IspConfig::defaults(Isp::Gmail);
        assert_eq!(score(&snapshot, &config, 0, 0), 100);
        assert_eq!(grade(100), "healthy");
    }

    #[test]
    fn test_breaches_and_firing_lower_score() {
        let mut snapshot = SignalSnapshot::empty(Isp::Yahoo, Utc::now());
        let config = IspConfig::defaults(Isp::Yahoo);
        snapshot.bounce_rate_1h = config.bounce_action * 2.0;
        snapshot.deferral_rate_5m = config.deferral_action / 2.0;

        // 30 for bounces, 10 for deferrals, 10 for one firing agent.
        assert_eq!(score(&snapshot, &config, 1, 0), 50);
        assert_eq!(grade(50), "warning");

        snapshot.complaint_rate_1h = 1.0;
        assert_eq!(score(&snapshot, &config, 2, 1), 5);
        assert_eq!(grade(5), "critical");
    }
}
