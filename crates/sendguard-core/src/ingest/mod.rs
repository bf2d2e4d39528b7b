//! Event ingestion.
//!
//! Webhooks and the accounting-file tail turn wire formats into
//! [`IngestEvent`]s. Webhook events pass through a bounded queue so the
//! request path never waits on consumers; a worker drains the queue and
//! hands every event, unchanged, to each [`AccountingSink`].

mod queue;
mod sinks;
mod tail;

use chrono::{DateTime, Utc};
use sendguard_acct::AccountingRecord;
use sendguard_arf::FeedbackReport;
use serde::{Deserialize, Serialize};

pub use queue::{IngestReport, IngestWorker, Ingestor};
pub use sinks::{AccountingSink, Fanout, SignalSink, SuppressionFeed, TrackerSink};
pub use tail::AccountingTail;

use crate::tracker::EngagementEvent;

/// Body of a one-click unsubscribe post (RFC 8058).
pub const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";

/// An unsubscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Recipient.
    pub email: String,
    /// Campaign the request came from.
    #[serde(default)]
    pub campaign_id: Option<String>,
    /// Sent through the mail client's one-click button.
    #[serde(default)]
    pub one_click: bool,
    /// When it was received.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// One typed inbound event.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// Transfer-agent accounting record.
    Accounting(Box<AccountingRecord>),
    /// Abuse or feedback-loop report.
    Feedback(Box<FeedbackReport>),
    /// Unsubscribe.
    Unsubscribe(UnsubscribeRequest),
    /// Open or click.
    Engagement(EngagementEvent),
}

impl IngestEvent {
    /// Short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Accounting(_) => "accounting",
            Self::Feedback(_) => "feedback",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Engagement(_) => "engagement",
        }
    }
}
