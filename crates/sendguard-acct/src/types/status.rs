//! RFC 3463 enhanced mail system status codes.

use crate::error::{Error, Result};

/// Class of an enhanced status code (first digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusClass {
    /// 2.X.X Success.
    Success,
    /// 4.X.X Persistent transient failure.
    Transient,
    /// 5.X.X Permanent failure.
    Permanent,
}

/// Enhanced status code (`class.subject.detail`), e.g. `5.1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnhancedStatus {
    /// Class of the status.
    pub class: StatusClass,
    /// Subject sub-code (addressing, mailbox, system, network, protocol, content, policy).
    pub subject: u16,
    /// Detail sub-code.
    pub detail: u16,
}

impl EnhancedStatus {
    /// Parses a status code such as `5.1.1` or `4.7.0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a well-formed status code.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut parts = s.split('.');
        let (Some(class), Some(subject), Some(detail), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidStatus(s.to_string()));
        };

        let class = match class {
            "2" => StatusClass::Success,
            "4" => StatusClass::Transient,
            "5" => StatusClass::Permanent,
            _ => return Err(Error::InvalidStatus(s.to_string())),
        };

        let subject = parse_component(subject, 3).ok_or_else(|| Error::InvalidStatus(s.into()))?;
        let detail = parse_component(detail, 3).ok_or_else(|| Error::InvalidStatus(s.into()))?;

        Ok(Self {
            class,
            subject,
            detail,
        })
    }

    /// Returns true if this is a permanent failure (5.X.X).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.class, StatusClass::Permanent)
    }

    /// Returns true if this is a transient failure (4.X.X).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class, StatusClass::Transient)
    }

    /// Returns true for mailbox/addressing failures (X.1.X and X.2.X).
    ///
    /// These describe the recipient itself rather than the sender's reputation.
    #[must_use]
    pub const fn is_recipient_failure(&self) -> bool {
        self.subject == 1 || (self.subject == 2 && self.detail != 2)
    }

    /// Returns true for security or policy status (X.7.X).
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        self.subject == 7
    }
}

fn parse_component(s: &str, max_digits: usize) -> Option<u16> {
    if s.is_empty() || s.len() > max_digits || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl std::fmt::Display for EnhancedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let class = match self.class {
            StatusClass::Success => 2,
            StatusClass::Transient => 4,
            StatusClass::Permanent => 5,
        };
        write!(f, "{class}.{}.{}", self.subject, self.detail)
    }
}

impl std::str::FromStr for EnhancedStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_user_unknown() {
        let status = EnhancedStatus::parse("5.1.1").unwrap();
        assert!(status.is_permanent());
        assert!(status.is_recipient_failure());
        assert_eq!(status.to_string(), "5.1.1");
    }

    #[test]
    fn parse_policy_deferral() {
        let status = EnhancedStatus::parse("4.7.0").unwrap();
        assert!(status.is_transient());
        assert!(status.is_policy());
        assert!(!status.is_recipient_failure());
    }

    #[test]
    fn mailbox_full_is_not_recipient_failure() {
        // 5.2.2 is "mailbox full", a condition that clears on its own.
        let status = EnhancedStatus::parse("5.2.2").unwrap();
        assert!(!status.is_recipient_failure());
    }

    #[test]
    fn rejects_malformed() {
        assert!(EnhancedStatus::parse("").is_err());
        assert!(EnhancedStatus::parse("5.1").is_err());
        assert!(EnhancedStatus::parse("3.1.1").is_err());
        assert!(EnhancedStatus::parse("5.1.1.1").is_err());
        assert!(EnhancedStatus::parse("5.x.1").is_err());
        assert!(EnhancedStatus::parse("5.1234.1").is_err());
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in "\\PC*") {
            let _ = EnhancedStatus::parse(&s);
        }
    }
}
