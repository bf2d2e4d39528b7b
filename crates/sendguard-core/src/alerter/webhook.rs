//! JSON webhook alerter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{Alert, Alerter, Severity};
use crate::{Error, Result};

/// Posts alerts as JSON to a URL.
pub struct WebhookAlerter {
    client: Client,
    url: String,
    min_severity: Severity,
}

impl WebhookAlerter {
    /// Creates an alerter posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL is not http(s) or the client cannot be built.
    pub fn new(url: &str, min_severity: Severity, timeout_secs: u64) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("alert webhook must be http(s): {url}")));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("alert webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            min_severity,
        })
    }

    /// Returns true if `severity` passes the filter.
    #[must_use]
    pub fn accepts(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn send(&self, alert: &Alert) {
        if !self.accepts(alert.severity) {
            return;
        }

        match self.client.post(&self.url).json(alert).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title = %alert.title, "Alert delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), title = %alert.title, "Alert webhook rejected alert");
            }
            Err(e) => warn!(error = %e, title = %alert.title, "Alert webhook unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_filter() {
        let Ok(alerter) = WebhookAlerter::new("https://hooks.example.net/x", Severity::Warning, 5)
        else {
            panic!("valid webhook rejected");
        };
        assert!(!alerter.accepts(Severity::Info));
        assert!(alerter.accepts(Severity::Warning));
        assert!(alerter.accepts(Severity::Critical));
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(WebhookAlerter::new("ftp://example.net", Severity::Info, 5).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail() {
        let Ok(alerter) = WebhookAlerter::new("http://127.0.0.1:9/alerts", Severity::Info, 1)
        else {
            panic!("valid webhook rejected");
        };
        alerter
            .send(&Alert::new(Severity::Critical, "test", "unreachable"))
            .await;
    }
}
