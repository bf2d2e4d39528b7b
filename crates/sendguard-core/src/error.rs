//! Error types for the governance engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Accounting record could not be parsed.
    #[error("Accounting error: {0}")]
    Accounting(#[from] sendguard_acct::Error),

    /// Feedback report could not be parsed.
    #[error("Report error: {0}")]
    Report(#[from] sendguard_arf::Error),

    /// Requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote command failed on the transfer-agent host.
    #[error("Remote command failed: {0}")]
    Remote(String),

    /// Remote commands are suspended after repeated failures.
    #[error("Circuit breaker open; remote commands suspended")]
    CircuitOpen,

    /// Remote command did not finish in time.
    #[error("Remote command timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ingest queue is full.
    #[error("Ingest queue is full")]
    QueueFull,

    /// The engine is shutting down.
    #[error("Engine is shutting down")]
    Shutdown,
}

impl Error {
    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::Timeout(_) | Self::Io(_) | Self::QueueFull
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
