//! Consumers of ingested events.

use std::sync::Arc;

use async_trait::async_trait;
use sendguard_acct::{AccountingRecord, RecordType};
use tracing::{debug, warn};

use super::IngestEvent;
use crate::isp::Isp;
use crate::signals::{EventKind, SignalEvent, SignalProcessor};
use crate::suppression::{
    Scope, Suppression, SuppressionHub, SuppressionSource, SuppressionStore,
};
use crate::tracker::CampaignTracker;

/// Receives every ingested event.
#[async_trait]
pub trait AccountingSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one event. Failures are logged by the sink.
    async fn handle(&self, event: &IngestEvent);
}

/// Hands each event to every sink in order.
#[derive(Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn AccountingSink>>,
}

impl Fanout {
    /// Creates a fan-out over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AccountingSink>>) -> Self {
        Self { sinks }
    }

    /// Delivers `event` to every sink.
    pub async fn dispatch(&self, event: &IngestEvent) {
        for sink in &self.sinks {
            debug!(sink = sink.name(), kind = event.kind(), "Dispatching event");
            sink.handle(event).await;
        }
    }
}

const fn event_kind(record_type: RecordType) -> Option<EventKind> {
    match record_type {
        RecordType::Reception => Some(EventKind::Sent),
        RecordType::Delivery => Some(EventKind::Delivered),
        RecordType::Bounce | RecordType::RemoteBounce => Some(EventKind::Bounced),
        RecordType::Transient => Some(EventKind::Deferred),
        RecordType::Feedback => Some(EventKind::Complained),
        RecordType::RemoteStatus => None,
    }
}

fn sender_domain(record: &AccountingRecord) -> Option<String> {
    record
        .orig
        .as_deref()
        .and_then(|orig| orig.rsplit_once('@'))
        .map(|(_, domain)| domain.to_lowercase())
        .filter(|d| !d.is_empty())
}

/// Feeds delivery outcomes to the signal processor.
pub struct SignalSink {
    processor: Arc<SignalProcessor>,
}

impl SignalSink {
    /// Creates the sink.
    #[must_use]
    pub const fn new(processor: Arc<SignalProcessor>) -> Self {
        Self { processor }
    }

    /// Converts an accounting record into a signal event.
    #[must_use]
    pub fn signal_event(record: &AccountingRecord) -> Option<SignalEvent> {
        let kind = event_kind(record.record_type)?;
        Some(SignalEvent {
            isp: Isp::from_domain(record.rcpt.domain()),
            kind,
            delta: 1,
            at: record.time_logged,
            event_id: Some(record.event_id()),
            dsn_code: record.status().map(|s| s.to_string()),
            source_ip: record.source_ip.clone(),
            domain: sender_domain(record),
            recipient: Some(record.rcpt.as_str().to_string()),
        })
    }
}

#[async_trait]
impl AccountingSink for SignalSink {
    fn name(&self) -> &'static str {
        "signals"
    }

    async fn handle(&self, event: &IngestEvent) {
        match event {
            IngestEvent::Accounting(record) => {
                if let Some(signal) = Self::signal_event(record) {
                    self.processor.record(&signal);
                }
            }
            IngestEvent::Feedback(report) if report.feedback_type.is_complaint() => {
                let mut signal = SignalEvent::new(
                    Isp::from_domain(report.recipient.domain()),
                    EventKind::Complained,
                    1,
                );
                if let Some(at) = report.arrival_date {
                    signal.at = at;
                }
                signal.event_id = report
                    .message_id
                    .as_ref()
                    .map(|id| format!("arf|{id}|{}", report.recipient));
                signal.source_ip.clone_from(&report.source_ip);
                signal.recipient = Some(report.recipient.as_str().to_string());
                self.processor.record(&signal);
            }
            _ => {}
        }
    }
}

/// Feeds campaign attribution.
pub struct TrackerSink {
    tracker: Arc<CampaignTracker>,
}

impl TrackerSink {
    /// Creates the sink.
    #[must_use]
    pub const fn new(tracker: Arc<CampaignTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl AccountingSink for TrackerSink {
    fn name(&self) -> &'static str {
        "tracker"
    }

    async fn handle(&self, event: &IngestEvent) {
        match event {
            IngestEvent::Accounting(record) => self.tracker.record_accounting(record).await,
            IngestEvent::Feedback(report) if report.feedback_type.is_complaint() => {
                self.tracker.record_complaint(
                    report.campaign_id.as_deref(),
                    report.arrival_date.unwrap_or_else(chrono::Utc::now),
                );
            }
            IngestEvent::Feedback(_) => {}
            IngestEvent::Unsubscribe(request) => self
                .tracker
                .record_unsubscribe(&request.email, request.campaign_id.as_deref()),
            IngestEvent::Engagement(engagement) => self.tracker.record_engagement(engagement),
        }
    }
}

/// Auto-suppresses hard bounces, complaints and unsubscribes.
///
/// Bounces and complaints land in the recipient's per-ISP list, which
/// forwards new entries to the hub. Unsubscribes are not tied to a provider
/// and go to the hub directly.
pub struct SuppressionFeed {
    store: Arc<SuppressionStore>,
    hub: Arc<SuppressionHub>,
}

impl SuppressionFeed {
    /// Creates the sink.
    #[must_use]
    pub const fn new(store: Arc<SuppressionStore>, hub: Arc<SuppressionHub>) -> Self {
        Self { store, hub }
    }

    /// Builds the suppression an accounting record calls for, if any.
    #[must_use]
    pub fn suppression_for(record: &AccountingRecord) -> Option<Suppression> {
        let (source, reason) = if record.is_hard_bounce() {
            let reason = if record.dsn_diag.text.is_empty() {
                format!("hard bounce ({})", record.bounce_category)
            } else {
                record.dsn_diag.text.clone()
            };
            (SuppressionSource::HardBounce, reason)
        } else if record.is_complaint() {
            let kind = record.feedback_type.as_deref().unwrap_or("abuse");
            (SuppressionSource::Complaint, format!("complaint ({kind})"))
        } else {
            return None;
        };

        let isp = Isp::from_domain(record.rcpt.domain());
        Some(
            Suppression::new(record.rcpt.as_str(), Scope::Isp(isp), source, reason)
                .with_dsn_code(record.status().map(|s| s.to_string()))
                .with_source_ip(record.source_ip.clone())
                .with_campaign_id(record.campaign_id.clone()),
        )
    }

    async fn store(&self, entry: &Suppression) {
        if let Err(e) = self.store.suppress(entry).await {
            warn!(email = %entry.email, error = %e, "Auto-suppression failed");
        }
    }
}

#[async_trait]
impl AccountingSink for SuppressionFeed {
    fn name(&self) -> &'static str {
        "suppression"
    }

    async fn handle(&self, event: &IngestEvent) {
        match event {
            IngestEvent::Accounting(record) => {
                if let Some(entry) = Self::suppression_for(record) {
                    self.store(&entry).await;
                }
            }
            IngestEvent::Feedback(report) if report.feedback_type.is_complaint() => {
                let isp = Isp::from_domain(report.recipient.domain());
                let entry = Suppression::new(
                    report.recipient.as_str(),
                    Scope::Isp(isp),
                    SuppressionSource::FeedbackLoop,
                    format!("feedback report ({})", report.feedback_type.as_str()),
                )
                .with_source_ip(report.source_ip.clone())
                .with_campaign_id(report.campaign_id.clone());
                self.store(&entry).await;
            }
            IngestEvent::Unsubscribe(request) => {
                let reason = if request.one_click {
                    "one-click unsubscribe"
                } else {
                    "unsubscribe"
                };
                let mut entry = Suppression::new(
                    &request.email,
                    Scope::Global,
                    SuppressionSource::Unsubscribe,
                    reason,
                )
                .with_campaign_id(request.campaign_id.clone());
                entry.suppressed_at = request.received_at;
                if let Err(e) = self.hub.suppress(&entry).await {
                    warn!(email = %entry.email, error = %e, "Unsubscribe suppression failed");
                }
            }
            IngestEvent::Feedback(_) | IngestEvent::Engagement(_) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use sendguard_acct::{AccountingParser, Address};

    use super::*;

    #[test]
    fn test_signal_event_mapping() {
        let record = AccountingParser::new()
            .parse_line(
                "b,2024-01-15 10:23:45-0500,,news@brand.example,user@yahoo.com,,failed,5.1.1,\
                 smtp;550 5.1.1 user unknown,mta5.am0.yahoodns.net,bad-mailbox,,,,10.0.0.5",
            )
            .unwrap();
        let signal = SignalSink::signal_event(&record).unwrap();
        assert_eq!(signal.isp, Isp::Yahoo);
        assert_eq!(signal.kind, EventKind::Bounced);
        assert_eq!(signal.dsn_code.as_deref(), Some("5.1.1"));
        assert_eq!(signal.domain.as_deref(), Some("brand.example"));
        assert!(signal.event_id.is_some());

        let rs = AccountingRecord::new(
            RecordType::RemoteStatus,
            Address::new("a@gmail.com").unwrap(),
            Utc::now(),
        );
        assert!(SignalSink::signal_event(&rs).is_none());
    }

    #[test]
    fn test_suppression_for_hard_bounce_only() {
        let parser = AccountingParser::new();
        let hard = parser
            .parse_line(
                "b,2024-01-15 10:23:45-0500,,,user@gmail.com,,failed,5.1.1,\
                 smtp;550 5.1.1 no such user,gmail-smtp-in.l.google.com,bad-mailbox",
            )
            .unwrap();
        let entry = SuppressionFeed::suppression_for(&hard).unwrap();
        assert_eq!(entry.scope, Scope::Isp(Isp::Gmail));
        assert_eq!(entry.source, SuppressionSource::HardBounce);
        assert_eq!(entry.dsn_code.as_deref(), Some("5.1.1"));

        let policy = parser
            .parse_line(
                "b,2024-01-15 10:23:45-0500,,,user@gmail.com,,failed,5.7.1,\
                 smtp;550 5.7.1 blocked for spam,gmail-smtp-in.l.google.com,spam-related",
            )
            .unwrap();
        assert!(SuppressionFeed::suppression_for(&policy).is_none());

        let delivered = AccountingRecord::new(
            RecordType::Delivery,
            Address::new("user@gmail.com").unwrap(),
            Utc::now(),
        );
        assert!(SuppressionFeed::suppression_for(&delivered).is_none());
    }
}
