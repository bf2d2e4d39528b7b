//! Operational notifications.
//!
//! Delivery failures are logged and swallowed: an alert that cannot be sent
//! must never stall or fail the control loop.

mod webhook;

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use webhook::WebhookAlerter;

use crate::isp::{AgentType, Isp};
use crate::settings::AlerterSettings;
use crate::sync::lock;

/// How urgent an alert is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention.
    #[default]
    Warning,
    /// Needs attention now.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// One notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Urgency.
    pub severity: Severity,
    /// Provider concerned.
    pub isp: Option<Isp>,
    /// Agent concerned.
    pub agent_type: Option<AgentType>,
    /// Short summary.
    pub title: String,
    /// Details.
    pub message: String,
    /// Decision that caused the alert.
    pub decision_id: Option<Uuid>,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Creates an alert raised now.
    #[must_use]
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            isp: None,
            agent_type: None,
            title: title.into(),
            message: message.into(),
            decision_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the agent the alert concerns.
    #[must_use]
    pub const fn for_agent(mut self, isp: Isp, agent_type: AgentType) -> Self {
        self.isp = Some(isp);
        self.agent_type = Some(agent_type);
        self
    }

    /// Attaches the decision that caused the alert.
    #[must_use]
    pub const fn with_decision(mut self, id: Uuid) -> Self {
        self.decision_id = Some(id);
        self
    }
}

/// Dispatches alerts.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Sends `alert`. Implementations log failures instead of returning them.
    async fn send(&self, alert: &Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send(&self, alert: &Alert) {
        let isp = alert.isp.map(|i| i.to_string()).unwrap_or_default();
        let agent = alert.agent_type.map(|a| a.to_string()).unwrap_or_default();
        match alert.severity {
            Severity::Info => info!(%isp, %agent, title = %alert.title, "{}", alert.message),
            Severity::Warning => warn!(%isp, %agent, title = %alert.title, "{}", alert.message),
            Severity::Critical => error!(%isp, %agent, title = %alert.title, "{}", alert.message),
        }
    }
}

/// Sends every alert to each inner alerter in turn.
pub struct FanoutAlerter {
    alerters: Vec<Arc<dyn Alerter>>,
}

impl FanoutAlerter {
    /// Creates a fan-out over `alerters`.
    #[must_use]
    pub fn new(alerters: Vec<Arc<dyn Alerter>>) -> Self {
        Self { alerters }
    }
}

#[async_trait]
impl Alerter for FanoutAlerter {
    async fn send(&self, alert: &Alert) {
        for alerter in &self.alerters {
            alerter.send(alert).await;
        }
    }
}

/// Keeps alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlerter {
    sent: Mutex<Vec<Alert>>,
}

impl MemoryAlerter {
    /// Creates an empty alerter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Alert> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Alerter for MemoryAlerter {
    async fn send(&self, alert: &Alert) {
        lock(&self.sent).push(alert.clone());
    }
}

/// Builds the configured alerter: always the log, plus the webhook if set.
#[must_use]
pub fn from_settings(settings: &AlerterSettings) -> Arc<dyn Alerter> {
    let mut alerters: Vec<Arc<dyn Alerter>> = vec![Arc::new(LogAlerter)];
    if let Some(url) = &settings.webhook_url {
        match WebhookAlerter::new(url, settings.min_severity, settings.timeout_secs) {
            Ok(webhook) => alerters.push(Arc::new(webhook)),
            Err(e) => warn!(error = %e, "Alert webhook disabled"),
        }
    }
    Arc::new(FanoutAlerter::new(alerters))
}
