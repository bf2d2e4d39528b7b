//! Engine settings.
//!
//! Every section deserializes with defaults for missing fields, so a partial
//! configuration file only needs to name what it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Control-loop tuning.
    pub engine: EngineSettings,
    /// Remote command execution.
    pub executor: ExecutorSettings,
    /// Operational notifications.
    pub alerter: AlerterSettings,
    /// Event ingestion.
    pub ingest: IngestSettings,
    /// Global suppression list sync.
    pub suppression: SuppressionSettings,
    /// Campaign tracking.
    pub tracker: TrackerSettings,
    /// Streaming subscribers.
    pub streams: StreamSettings,
}

/// Control-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Seconds between evaluations of one agent.
    pub evaluation_interval_secs: u64,
    /// Seconds a firing agent waits before it may fire again.
    pub cooldown_secs: u64,
    /// Minimum synthesis confidence for a `Wont` precedent to veto an action.
    pub veto_confidence: f64,
    /// Minimum number of similar precedents before a veto is considered.
    pub veto_min_matches: usize,
    /// Similarity below which a precedent is ignored.
    pub min_similarity: f64,
    /// Number of precedents recalled per evaluation.
    pub recall_limit: usize,
    /// Half-life, in days, of a precedent's weight in synthesis.
    pub recall_half_life_days: f64,
    /// Attempts required in a window before its rate is trusted.
    pub min_volume: u64,
    /// Seconds after a firing decision during which an operator undo teaches a `Wont`.
    pub reversal_window_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 30,
            cooldown_secs: 900,
            veto_confidence: 0.7,
            veto_min_matches: 3,
            min_similarity: 0.5,
            recall_limit: 10,
            recall_half_life_days: 7.0,
            min_volume: 20,
            reversal_window_secs: 6 * 3600,
        }
    }
}

impl EngineSettings {
    /// Evaluation interval as a duration.
    #[must_use]
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    /// Cooldown as a duration.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Reversal window as a duration.
    #[must_use]
    pub const fn reversal_window(&self) -> Duration {
        Duration::from_secs(self.reversal_window_secs)
    }
}

/// How remote commands are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Log commands without running them.
    #[default]
    DryRun,
    /// Run commands on the transfer-agent host over SSH.
    Ssh,
}

/// Remote command templates.
///
/// Placeholders: `{queue}`, `{ip}`, `{max_msg_rate}`, `{max_connections}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Pause a queue.
    pub pause_queue: String,
    /// Resume a queue.
    pub resume_queue: String,
    /// Throttle a queue.
    pub throttle_queue: String,
    /// Take a source IP out of rotation.
    pub quarantine_ip: String,
    /// Return a source IP to rotation.
    pub release_ip: String,
    /// Hold a warmup queue.
    pub pause_warmup: String,
    /// Run after a suppression file is replaced.
    pub reload: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            pause_queue: "pmta pause queue {queue}".to_string(),
            resume_queue: "pmta resume queue {queue}".to_string(),
            throttle_queue: "pmta set queue --max-msg-rate={max_msg_rate}/h --max-smtp-out={max_connections} {queue}"
                .to_string(),
            quarantine_ip: "pmta disable source {ip}".to_string(),
            release_ip: "pmta enable source {ip}".to_string(),
            pause_warmup: "pmta pause queue {queue}".to_string(),
            reload: "pmta reload".to_string(),
        }
    }
}

/// Remote command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Execution mode.
    pub mode: ExecutorMode,
    /// Transfer-agent host.
    pub host: String,
    /// SSH user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// SSH private key.
    pub identity_file: Option<PathBuf>,
    /// Seconds to wait for the SSH connection.
    pub connect_timeout_secs: u64,
    /// Seconds one remote call may take, retries excluded.
    pub timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Initial retry backoff in milliseconds, doubled per retry.
    pub backoff_ms: u64,
    /// Consecutive failed calls that open the circuit breaker.
    pub breaker_failure_threshold: u32,
    /// Successful half-open calls that close it again.
    pub breaker_success_threshold: u32,
    /// Seconds the breaker stays open before allowing a trial call.
    pub breaker_open_secs: u64,
    /// Command templates.
    pub commands: CommandTemplates,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::DryRun,
            host: "localhost".to_string(),
            user: "pmta".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            timeout_secs: 30,
            retries: 2,
            backoff_ms: 500,
            breaker_failure_threshold: 3,
            breaker_success_threshold: 1,
            breaker_open_secs: 120,
            commands: CommandTemplates::default(),
        }
    }
}

/// Operational notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlerterSettings {
    /// Webhook receiving JSON alerts.
    pub webhook_url: Option<String>,
    /// Alerts below this severity are not sent to the webhook.
    pub min_severity: crate::alerter::Severity,
    /// Seconds before a webhook post is abandoned.
    pub timeout_secs: u64,
}

impl Default for AlerterSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_severity: crate::alerter::Severity::Warning,
            timeout_secs: 10,
        }
    }
}

/// Event ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Bounded queue between webhooks and the worker.
    pub queue_capacity: usize,
    /// Accounting file to tail, if any.
    pub accounting_file: Option<PathBuf>,
    /// Milliseconds between polls of the accounting file.
    pub poll_interval_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            accounting_file: None,
            poll_interval_ms: 1_000,
        }
    }
}

/// Global suppression list sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionSettings {
    /// Local copy of the exported list.
    pub local_path: Option<PathBuf>,
    /// Path of the list on the transfer-agent host.
    pub remote_path: String,
    /// Seconds between unconditional syncs.
    pub sync_interval_secs: u64,
}

impl Default for SuppressionSettings {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_path: "/etc/pmta/suppressions/global.txt".to_string(),
            sync_interval_secs: 300,
        }
    }
}

/// Campaign tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Consecutive deliveries without engagement before a recipient is
    /// suppressed as inactive. Zero disables inactivity suppression.
    pub inactivity_threshold: u32,
    /// Days without activity after which a campaign or streak is forgotten.
    pub idle_days: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            inactivity_threshold: 0,
            idle_days: 30,
        }
    }
}

/// Streaming subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Per-subscriber buffer; a subscriber that fills it is disconnected.
    pub subscriber_buffer: usize,
    /// Seconds between keepalive pings and dead-subscriber sweeps.
    pub keepalive_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            keepalive_secs: 15,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"engine":{"cooldown_secs":60},"executor":{"mode":"ssh"}}"#)
                .unwrap();
        assert_eq!(settings.engine.cooldown_secs, 60);
        assert_eq!(settings.engine.recall_limit, 10);
        assert_eq!(settings.executor.mode, ExecutorMode::Ssh);
        assert_eq!(settings.executor.port, 22);
    }
}
