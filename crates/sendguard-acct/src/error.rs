//! Error types for accounting record handling.

/// Result type alias for accounting operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Accounting error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Invalid enhanced status code.
    #[error("Invalid status code: {0}")]
    InvalidStatus(String),

    /// Unknown accounting record type.
    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    /// A required accounting field is missing or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Timestamp could not be parsed.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Malformed CSV line.
    #[error("Malformed record: {0}")]
    Malformed(String),
}

impl Error {
    /// Returns true if the error concerns the recipient address.
    #[must_use]
    pub const fn is_address_error(&self) -> bool {
        matches!(self, Self::InvalidAddress(_))
    }
}
