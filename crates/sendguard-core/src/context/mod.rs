//! Situational fingerprints used to record and recall precedent.

mod holidays;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::signals::{ContextInputs, SignalSnapshot};

pub use holidays::holiday_on;

/// The situation an agent was in when it judged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MicroContext {
    /// Day of week, Monday = 0.
    pub day_of_week: u8,
    /// Hour of day, UTC.
    pub hour_utc: u8,
    /// Status codes seen recently.
    pub dsn_codes: Vec<String>,
    /// Five-minute deferral rate.
    pub deferral_rate: f64,
    /// One-hour bounce rate.
    pub bounce_rate: f64,
    /// One-hour complaint rate.
    pub complaint_rate: f64,
    /// Attempts per minute.
    pub attempted_rate: f64,
    /// Source IP most involved.
    pub ip: Option<String>,
    /// Sending domain.
    pub domain: Option<String>,
    /// Whether `at` fell on a sending holiday.
    pub is_holiday: bool,
    /// Name of that holiday.
    pub holiday_name: Option<String>,
}

impl MicroContext {
    /// Captures the current situation from a snapshot and tracked inputs.
    #[must_use]
    pub fn capture(snapshot: &SignalSnapshot, inputs: &ContextInputs, at: DateTime<Utc>) -> Self {
        let holiday = holiday_on(at.date_naive());

        Self {
            day_of_week: u8::try_from(at.weekday().num_days_from_monday()).unwrap_or(0),
            hour_utc: u8::try_from(at.hour()).unwrap_or(0),
            dsn_codes: inputs.dsn_codes.clone(),
            deferral_rate: snapshot.deferral_rate_5m,
            bounce_rate: snapshot.bounce_rate_1h,
            complaint_rate: snapshot.complaint_rate_1h,
            attempted_rate: snapshot.attempted_rate,
            ip: inputs.top_bounce_ip.clone(),
            domain: inputs.domain.clone(),
            is_holiday: holiday.is_some(),
            holiday_name: holiday.map(ToString::to_string),
        }
    }

    /// Three-hour bucket of the day (0..=7).
    #[must_use]
    pub const fn hour_bucket(&self) -> u8 {
        self.hour_utc / 3
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::isp::Isp;
    use chrono::TimeZone;

    #[test]
    fn test_capture() {
        let at = Utc.with_ymd_and_hms(2024, 11, 29, 14, 5, 0).unwrap();
        let mut snapshot = SignalSnapshot::empty(Isp::Yahoo, at);
        snapshot.bounce_rate_1h = 0.06;
        let inputs = ContextInputs {
            dsn_codes: vec!["5.1.1".to_string()],
            top_bounce_ip: Some("10.0.0.9".to_string()),
            domain: None,
        };

        let ctx = MicroContext::capture(&snapshot, &inputs, at);
        assert_eq!(ctx.day_of_week, 4);
        assert_eq!(ctx.hour_utc, 14);
        assert_eq!(ctx.hour_bucket(), 4);
        assert!(ctx.is_holiday);
        assert_eq!(ctx.holiday_name.as_deref(), Some("Black Friday"));
        assert_eq!(ctx.ip.as_deref(), Some("10.0.0.9"));
        assert!((ctx.bounce_rate - 0.06).abs() < f64::EPSILON);
    }
}
