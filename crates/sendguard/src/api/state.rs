//! Shared application state for API handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sendguard_core::Engine;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The governance engine.
    pub engine: Arc<Engine>,
    /// Secret webhooks must present, if configured.
    pub webhook_secret: Option<Arc<str>>,
    /// Interval between stream keepalive pings.
    pub keepalive: Duration,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates state around a started engine.
    pub fn new(engine: Arc<Engine>, webhook_secret: Option<String>) -> Self {
        let keepalive = Duration::from_secs(engine.settings.streams.keepalive_secs.max(1));
        Self {
            engine,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()).map(Arc::from),
            keepalive,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Utc::now(),
        }
    }
}
