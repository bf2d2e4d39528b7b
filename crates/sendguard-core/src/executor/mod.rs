//! Remote operational commands against the transfer-agent host.
//!
//! Every command issued here is idempotent on the remote side: pausing a
//! paused queue or replacing a file with identical contents is a no-op, so
//! callers may retry freely.

mod breaker;
mod dry_run;
mod resilient;
mod ssh;

use std::sync::Arc;

use async_trait::async_trait;

pub use breaker::{CircuitBreaker, CircuitState};
pub use dry_run::DryRunExecutor;
pub use resilient::ResilientExecutor;
pub use ssh::SshExecutor;

use crate::decisions::ActionTaken;
use crate::settings::{CommandTemplates, ExecutorMode, ExecutorSettings};
use crate::{Error, Result};

/// Issues actions on the transfer-agent host.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `action`, returning the remote output.
    async fn execute(&self, action: &ActionTaken) -> Result<String>;

    /// Atomically replaces `remote_path` with `contents` and reloads.
    async fn push_file(&self, remote_path: &str, contents: &str) -> Result<()>;

    /// Returns false while remote commands are suspended.
    fn is_available(&self) -> bool {
        true
    }
}

/// Builds the configured executor, wrapped with timeout, retry and breaker.
///
/// `force_dry_run` overrides the configured mode.
#[must_use]
pub fn from_settings(settings: &ExecutorSettings, force_dry_run: bool) -> Arc<dyn Executor> {
    let inner: Arc<dyn Executor> = if force_dry_run || settings.mode == ExecutorMode::DryRun {
        Arc::new(DryRunExecutor::new(settings.commands.clone()))
    } else {
        Arc::new(SshExecutor::new(settings))
    };
    Arc::new(ResilientExecutor::new(inner, settings))
}

fn check_value(value: &str) -> Result<&str> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._/@:*-=".contains(c));
    if valid {
        Ok(value)
    } else {
        Err(Error::InvalidInput(format!("unsafe command argument: {value:?}")))
    }
}

fn quoted(value: &str) -> Result<String> {
    check_value(value).map(|v| format!("'{v}'"))
}

/// Renders the shell command for `action` from `templates`.
///
/// Substituted values are restricted to a safe character set and single
/// quoted.
///
/// # Errors
///
/// Returns `InvalidInput` for unsafe values or actions that are not remote
/// commands.
pub fn render_command(templates: &CommandTemplates, action: &ActionTaken) -> Result<String> {
    let command = match action {
        ActionTaken::PauseQueue { queue } => templates.pause_queue.replace("{queue}", &quoted(queue)?),
        ActionTaken::ResumeQueue { queue } => {
            templates.resume_queue.replace("{queue}", &quoted(queue)?)
        }
        ActionTaken::PauseWarmup { queue } => {
            templates.pause_warmup.replace("{queue}", &quoted(queue)?)
        }
        ActionTaken::ThrottleQueue {
            queue,
            max_msg_rate,
            max_connections,
        } => templates
            .throttle_queue
            .replace("{queue}", &quoted(queue)?)
            .replace("{max_msg_rate}", &max_msg_rate.to_string())
            .replace("{max_connections}", &max_connections.to_string()),
        ActionTaken::QuarantineIp { ip } => templates.quarantine_ip.replace("{ip}", &quoted(ip)?),
        ActionTaken::ReleaseIp { ip } => templates.release_ip.replace("{ip}", &quoted(ip)?),
        ActionTaken::SuppressRecipients { .. } | ActionTaken::PushSuppressionFile => {
            return Err(Error::InvalidInput(format!(
                "{} is not a remote command",
                action.kind()
            )));
        }
    };
    Ok(command)
}

/// Renders the remote script that replaces `remote_path` from stdin.
///
/// # Errors
///
/// Returns `InvalidInput` if the path contains unsafe characters.
pub fn render_push(templates: &CommandTemplates, remote_path: &str) -> Result<String> {
    let path = check_value(remote_path)?;
    Ok(format!(
        "cat > '{path}.tmp' && mv '{path}.tmp' '{path}' && {}",
        templates.reload
    ))
}
