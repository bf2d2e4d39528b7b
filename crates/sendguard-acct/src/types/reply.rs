//! SMTP reply codes and remote diagnostics.

use super::status::EnhancedStatus;

/// SMTP reply code as reported by the receiving MTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if the code is within the range SMTP defines.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 200 && self.0 < 600
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Reply codes that matter for deliverability
impl ReplyCode {
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 450 Mailbox unavailable (busy or temporarily blocked)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 451 Local error in processing (often greylisting or rate limiting)
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 550 Mailbox unavailable (not found, access denied, policy block)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 551 User not local
    pub const USER_NOT_LOCAL: Self = Self(551);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 553 Mailbox name not allowed
    pub const MAILBOX_NAME_INVALID: Self = Self(553);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

/// Remote diagnostic attached to a delivery attempt.
///
/// Transfer agents record the remote answer as `smtp;550 5.1.1 <user@example.com>: unknown`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    /// Diagnostic type (usually `smtp`).
    pub kind: String,
    /// Reply code, when the remote answered with one.
    pub reply_code: Option<ReplyCode>,
    /// Enhanced status code embedded in the text, if any.
    pub status: Option<EnhancedStatus>,
    /// Remaining human-readable text.
    pub text: String,
}

impl Diagnostic {
    /// Returns true if the diagnostic text mentions one of the given markers.
    ///
    /// Matching is case-insensitive.
    #[must_use]
    pub fn mentions_any(&self, markers: &[&str]) -> bool {
        let text = self.text.to_lowercase();
        markers.iter().any(|m| text.contains(&m.to_lowercase()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        assert!(ReplyCode::MAILBOX_BUSY.is_transient());
        assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
        assert!(ReplyCode::LOCAL_ERROR.is_transient());
        assert!(!ReplyCode::LOCAL_ERROR.is_permanent());
    }

    #[test]
    fn permanent_codes() {
        assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
        assert!(ReplyCode::TRANSACTION_FAILED.is_permanent());
        assert!(!ReplyCode::OK.is_permanent());
    }

    #[test]
    fn validity() {
        assert!(ReplyCode::OK.is_valid());
        assert!(!ReplyCode::new(199).is_valid());
        assert!(!ReplyCode::new(600).is_valid());
    }

    #[test]
    fn display() {
        assert_eq!(ReplyCode::MAILBOX_UNAVAILABLE.to_string(), "550");
    }

    #[test]
    fn diagnostic_mentions() {
        let diag = Diagnostic {
            kind: "smtp".into(),
            reply_code: Some(ReplyCode::LOCAL_ERROR),
            status: None,
            text: "Messages from 1.2.3.4 temporarily deferred due to user complaints".into(),
        };
        assert!(diag.mentions_any(&["TEMPORARILY DEFERRED"]));
        assert!(!diag.mentions_any(&["mailbox full"]));
    }
}
