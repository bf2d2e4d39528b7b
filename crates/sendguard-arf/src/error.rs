//! Error types for abuse-report parsing.

use std::string::FromUtf8Error;

/// Result type alias for report parsing.
pub type Result<T> = std::result::Result<T, Error>;

/// Report parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer encoding.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// UTF-8 decode error.
    #[error("UTF-8 decode error: {0}")]
    Utf8Decode(#[from] FromUtf8Error),

    /// Missing boundary in multipart message.
    #[error("Missing boundary in multipart message")]
    MissingBoundary,

    /// Invalid multipart structure.
    #[error("Invalid multipart structure: {0}")]
    InvalidMultipart(String),

    /// The report names no recipient that could be suppressed.
    #[error("Report has no identifiable recipient")]
    MissingRecipient,

    /// Recipient address in the report is invalid.
    #[error(transparent)]
    Address(#[from] sendguard_acct::Error),
}
