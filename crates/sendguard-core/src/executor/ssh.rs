//! Executor that runs commands through the system `ssh` client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Executor, render_command, render_push};
use crate::decisions::ActionTaken;
use crate::settings::{CommandTemplates, ExecutorSettings};
use crate::{Error, Result};

/// Runs commands on the transfer-agent host over SSH.
///
/// Uses key authentication only (`BatchMode=yes`); the child is killed if
/// the calling future is dropped, e.g. on timeout.
pub struct SshExecutor {
    host: String,
    user: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
    commands: CommandTemplates,
}

impl SshExecutor {
    /// Creates an executor from settings.
    #[must_use]
    pub fn new(settings: &ExecutorSettings) -> Self {
        Self {
            host: settings.host.clone(),
            user: settings.user.clone(),
            port: settings.port,
            identity_file: settings.identity_file.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            commands: settings.commands.clone(),
        }
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.user, self.host))
            .arg(remote)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, remote: &str, input: Option<&str>) -> Result<String> {
        debug!(host = %self.host, command = %remote, "Running remote command");

        let mut cmd = self.command(remote);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let mut child = cmd.spawn()?;

        if let Some(input) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Remote(format!(
                "{} (exit {})",
                stderr.trim(),
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string())
            )))
        }
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn execute(&self, action: &ActionTaken) -> Result<String> {
        let remote = render_command(&self.commands, action)?;
        self.run(&remote, None).await
    }

    async fn push_file(&self, remote_path: &str, contents: &str) -> Result<()> {
        let remote = render_push(&self.commands, remote_path)?;
        self.run(&remote, Some(contents)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let settings = ExecutorSettings {
            host: "mta1.example.net".to_string(),
            user: "ops".to_string(),
            port: 2222,
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
            ..ExecutorSettings::default()
        };
        let executor = SshExecutor::new(&settings);
        let cmd = executor.command("pmta reload");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.as_std().get_program(), "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id_ed25519"));
        assert_eq!(args[args.len() - 2], "ops@mta1.example.net");
        assert_eq!(args[args.len() - 1], "pmta reload");
    }
}
