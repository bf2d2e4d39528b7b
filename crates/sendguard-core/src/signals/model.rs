//! Signal data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::isp::Isp;

/// Kind of delivery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Message accepted for delivery.
    Sent,
    /// Delivered.
    Delivered,
    /// Permanently failed.
    Bounced,
    /// Temporarily failed.
    Deferred,
    /// Recipient complained.
    Complained,
}

impl EventKind {
    /// Every kind.
    pub const ALL: [Self; 5] = [
        Self::Sent,
        Self::Delivered,
        Self::Bounced,
        Self::Deferred,
        Self::Complained,
    ];

    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Bounced => "bounced",
            Self::Deferred => "deferred",
            Self::Complained => "complained",
        }
    }

    /// Parses an identifier produced by [`EventKind::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Messages accepted.
    pub sent: u64,
    /// Messages delivered.
    pub delivered: u64,
    /// Messages bounced.
    pub bounced: u64,
    /// Delivery attempts deferred.
    pub deferred: u64,
    /// Complaints.
    pub complained: u64,
}

impl Counts {
    /// Adds `delta` to the counter for `kind`.
    pub const fn add(&mut self, kind: EventKind, delta: u64) {
        let slot = match kind {
            EventKind::Sent => &mut self.sent,
            EventKind::Delivered => &mut self.delivered,
            EventKind::Bounced => &mut self.bounced,
            EventKind::Deferred => &mut self.deferred,
            EventKind::Complained => &mut self.complained,
        };
        *slot = slot.saturating_add(delta);
    }

    /// Adds every counter of `other`.
    pub const fn merge(&mut self, other: &Self) {
        self.sent = self.sent.saturating_add(other.sent);
        self.delivered = self.delivered.saturating_add(other.delivered);
        self.bounced = self.bounced.saturating_add(other.bounced);
        self.deferred = self.deferred.saturating_add(other.deferred);
        self.complained = self.complained.saturating_add(other.complained);
    }

    /// Delivery attempts with a final or temporary outcome.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.delivered
            .saturating_add(self.bounced)
            .saturating_add(self.deferred)
    }
}

/// One delivery event for the signal processor.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    /// Destination provider.
    pub isp: Isp,
    /// Event kind.
    pub kind: EventKind,
    /// Amount to count.
    pub delta: u64,
    /// When the event happened.
    pub at: DateTime<Utc>,
    /// Identifier for duplicate suppression, when the source has one.
    pub event_id: Option<String>,
    /// Enhanced status code reported with the event.
    pub dsn_code: Option<String>,
    /// Local IP the message was sent from.
    pub source_ip: Option<String>,
    /// Sending domain.
    pub domain: Option<String>,
    /// Recipient, for bounces and complaints.
    pub recipient: Option<String>,
}

impl SignalEvent {
    /// Creates an event happening now with no identifying details.
    #[must_use]
    pub fn new(isp: Isp, kind: EventKind, delta: u64) -> Self {
        Self {
            isp,
            kind,
            delta,
            at: Utc::now(),
            event_id: None,
            dsn_code: None,
            source_ip: None,
            domain: None,
            recipient: None,
        }
    }
}

/// Rolling-window rates for one ISP.
///
/// Derived on demand; never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// Provider.
    pub isp: Isp,
    /// Bounces over delivered plus bounced, trailing hour.
    pub bounce_rate_1h: f64,
    /// Deferrals over attempts, trailing five minutes.
    pub deferral_rate_5m: f64,
    /// Complaints over delivered, trailing hour.
    pub complaint_rate_1h: f64,
    /// Attempts per minute, trailing five minutes.
    pub attempted_rate: f64,
    /// Raw counters, trailing hour.
    pub window_1h: Counts,
    /// Raw counters, trailing five minutes.
    pub window_5m: Counts,
    /// Query instant.
    pub computed_at: DateTime<Utc>,
}

impl SignalSnapshot {
    /// An all-zero snapshot.
    #[must_use]
    pub fn empty(isp: Isp, at: DateTime<Utc>) -> Self {
        Self {
            isp,
            bounce_rate_1h: 0.0,
            deferral_rate_5m: 0.0,
            complaint_rate_1h: 0.0,
            attempted_rate: 0.0,
            window_1h: Counts::default(),
            window_5m: Counts::default(),
            computed_at: at,
        }
    }
}

/// Situational details the processor tracks besides counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInputs {
    /// Distinct status codes seen in the trailing hour, most recent first.
    pub dsn_codes: Vec<String>,
    /// Source IP with the most bounces in the trailing hour.
    pub top_bounce_ip: Option<String>,
    /// Most recently seen sending domain.
    pub domain: Option<String>,
}
