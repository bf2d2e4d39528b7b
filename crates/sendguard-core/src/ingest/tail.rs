//! Follows the transfer agent's accounting file.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sendguard_acct::AccountingParser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::IngestEvent;
use super::sinks::Fanout;
use crate::Result;
use crate::memory::MemoryStore;

const NAMESPACE: &str = "ingest";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Position {
    offset: u64,
    header: Option<String>,
}

/// Polls an accounting file from a persisted byte offset.
///
/// Only complete lines are consumed. A file that shrinks is taken to be
/// truncated or rotated and is read again from the start.
pub struct AccountingTail {
    path: PathBuf,
    poll_interval: Duration,
    memory: Arc<MemoryStore>,
    fanout: Fanout,
}

impl AccountingTail {
    /// Creates a tail of `path`.
    #[must_use]
    pub const fn new(
        path: PathBuf,
        poll_interval: Duration,
        memory: Arc<MemoryStore>,
        fanout: Fanout,
    ) -> Self {
        Self {
            path,
            poll_interval,
            memory,
            fanout,
        }
    }

    fn key(&self) -> String {
        format!("tail:{}", self.path.display())
    }

    async fn position(&self) -> Position {
        match self.memory.get_json(NAMESPACE, &self.key()).await {
            Ok(position) => position.unwrap_or_default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable tail position, starting over");
                Position::default()
            }
        }
    }

    /// Reads and dispatches whatever complete lines were appended since the
    /// last poll. Returns the number of records dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the position cannot be
    /// saved. A missing file is not an error.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut position = self.position().await;
        let len = file.metadata().await?.len();
        if len < position.offset {
            info!(path = %self.path.display(), "Accounting file truncated or rotated");
            position = Position::default();
        }
        if len == position.offset {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(position.offset)).await?;
        let mut buf = Vec::new();
        file.take(len - position.offset).read_to_end(&mut buf).await?;

        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(0);
        };
        let chunk = String::from_utf8_lossy(&buf[..=end]);

        let mut parser = match position.header.as_deref() {
            Some(header) => AccountingParser::with_header(header).unwrap_or_default(),
            None => AccountingParser::new(),
        };

        let mut dispatched = 0;
        for line in chunk.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if AccountingParser::is_header(line) {
                match AccountingParser::with_header(line) {
                    Ok(p) => {
                        parser = p;
                        position.header = Some(line.to_string());
                    }
                    Err(e) => warn!(error = %e, "Ignoring unusable accounting header"),
                }
                continue;
            }
            match parser.parse_line(line) {
                Ok(record) => {
                    self.fanout
                        .dispatch(&IngestEvent::Accounting(Box::new(record)))
                        .await;
                    dispatched += 1;
                }
                Err(e) => debug!(error = %e, "Skipping accounting line"),
            }
        }

        position.offset += (end + 1) as u64;
        self.memory.put_json(NAMESPACE, &self.key(), &position).await?;
        Ok(dispatched)
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), "Tailing accounting file");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(n) => debug!(records = n, "Accounting records ingested"),
                        Err(e) => warn!(path = %self.path.display(), error = %e, "Accounting tail failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Accounting tail stopped");
    }
}
