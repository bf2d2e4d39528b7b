use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::{Executor, render_command, render_push};
use crate::Result;
use crate::decisions::ActionTaken;
use crate::settings::CommandTemplates;
use crate::sync::lock;

/// Logs the commands it would run and keeps them for inspection.
pub struct DryRunExecutor {
    commands: CommandTemplates,
    history: Mutex<Vec<String>>,
}

impl DryRunExecutor {
    /// Creates a dry-run executor rendering with `commands`.
    #[must_use]
    pub const fn new(commands: CommandTemplates) -> Self {
        Self {
            commands,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Commands rendered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn execute(&self, action: &ActionTaken) -> Result<String> {
        let command = render_command(&self.commands, action)?;
        info!(command = %command, "Dry run: remote command not executed");
        lock(&self.history).push(command);
        Ok("dry-run".to_string())
    }

    async fn push_file(&self, remote_path: &str, contents: &str) -> Result<()> {
        let command = render_push(&self.commands, remote_path)?;
        info!(
            command = %command,
            lines = contents.lines().count(),
            "Dry run: file push not executed"
        );
        lock(&self.history).push(command);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_history() {
        let executor = DryRunExecutor::new(CommandTemplates::default());
        executor
            .execute(&ActionTaken::QuarantineIp {
                ip: "10.0.0.5".to_string(),
            })
            .await
            .unwrap();
        executor.push_file("/tmp/global.txt", "a@b.com\n").await.unwrap();

        let history = executor.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], "pmta disable source '10.0.0.5'");
        assert!(history[1].starts_with("cat > '/tmp/global.txt.tmp'"));
    }
}
