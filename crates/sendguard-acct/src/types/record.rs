//! Accounting record types.

use chrono::{DateTime, Utc};

use super::address::Address;
use super::category::BounceCategory;
use super::reply::Diagnostic;
use super::status::EnhancedStatus;
use crate::error::{Error, Result};

/// Kind of accounting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordType {
    /// Message accepted by the transfer agent for delivery (`r`).
    Reception,
    /// Successful delivery (`d`).
    Delivery,
    /// Permanent failure during the SMTP transaction (`b`).
    Bounce,
    /// Temporary failure, message stays queued (`t`, `tq`).
    Transient,
    /// Asynchronous bounce received after acceptance (`rb`).
    RemoteBounce,
    /// Asynchronous status report (`rs`).
    RemoteStatus,
    /// Feedback-loop complaint (`f`).
    Feedback,
}

impl RecordType {
    /// Parses the `type` accounting field.
    ///
    /// # Errors
    ///
    /// Returns an error for record types this crate does not model.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "r" => Ok(Self::Reception),
            "d" => Ok(Self::Delivery),
            "b" => Ok(Self::Bounce),
            "t" | "tq" => Ok(Self::Transient),
            "rb" => Ok(Self::RemoteBounce),
            "rs" => Ok(Self::RemoteStatus),
            "f" => Ok(Self::Feedback),
            other => Err(Error::UnknownRecordType(other.to_string())),
        }
    }

    /// Returns the accounting field representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reception => "r",
            Self::Delivery => "d",
            Self::Bounce => "b",
            Self::Transient => "t",
            Self::RemoteBounce => "rb",
            Self::RemoteStatus => "rs",
            Self::Feedback => "f",
        }
    }

    /// Returns true for records that represent a failed delivery.
    #[must_use]
    pub const fn is_bounce(&self) -> bool {
        matches!(self, Self::Bounce | Self::RemoteBounce)
    }
}

/// One parsed accounting record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccountingRecord {
    /// Record kind.
    pub record_type: RecordType,
    /// When the transfer agent logged the record.
    pub time_logged: DateTime<Utc>,
    /// Envelope sender.
    pub orig: Option<String>,
    /// Recipient.
    pub rcpt: Address,
    /// DSN action (`delivered`, `failed`, `delayed`, `relayed`).
    pub dsn_action: Option<String>,
    /// Enhanced status code.
    pub dsn_status: Option<EnhancedStatus>,
    /// Remote diagnostic.
    pub dsn_diag: Diagnostic,
    /// Remote MTA that produced the status.
    pub dsn_mta: Option<String>,
    /// Bounce category.
    pub bounce_category: BounceCategory,
    /// Local IP the delivery was attempted from.
    pub source_ip: Option<String>,
    /// Remote IP.
    pub destination_ip: Option<String>,
    /// Virtual MTA.
    pub vmta: Option<String>,
    /// Job identifier.
    pub job_id: Option<String>,
    /// Envelope identifier.
    pub env_id: Option<String>,
    /// Queue name (`domain/vmta`).
    pub queue: Option<String>,
    /// Campaign the message belongs to.
    pub campaign_id: Option<String>,
    /// Feedback type for complaint records (`abuse`, `fraud`, ...).
    pub feedback_type: Option<String>,
}

impl AccountingRecord {
    /// Creates a minimal record; optional fields start empty.
    #[must_use]
    pub fn new(record_type: RecordType, rcpt: Address, time_logged: DateTime<Utc>) -> Self {
        Self {
            record_type,
            time_logged,
            orig: None,
            rcpt,
            dsn_action: None,
            dsn_status: None,
            dsn_diag: Diagnostic::default(),
            dsn_mta: None,
            bounce_category: BounceCategory::Other,
            source_ip: None,
            destination_ip: None,
            vmta: None,
            job_id: None,
            env_id: None,
            queue: None,
            campaign_id: None,
            feedback_type: None,
        }
    }

    /// Returns the effective enhanced status, preferring the explicit field.
    #[must_use]
    pub fn status(&self) -> Option<EnhancedStatus> {
        self.dsn_status.or(self.dsn_diag.status)
    }

    /// Returns true if this is a permanent, recipient-level failure.
    ///
    /// Policy and reputation blocks are permanent too, but they say nothing
    /// about the mailbox and must not lead to suppression.
    #[must_use]
    pub fn is_hard_bounce(&self) -> bool {
        if !self.record_type.is_bounce() {
            return false;
        }

        let permanent = self.status().map_or_else(
            || self.dsn_diag.reply_code.is_some_and(|c| c.is_permanent()),
            |s| s.is_permanent(),
        );
        if !permanent {
            return false;
        }

        if self.bounce_category.is_recipient_level() {
            return true;
        }

        self.bounce_category == BounceCategory::Other
            && self.status().is_some_and(|s| s.is_recipient_failure())
    }

    /// Returns true if this record is a complaint.
    #[must_use]
    pub const fn is_complaint(&self) -> bool {
        matches!(self.record_type, RecordType::Feedback)
    }

    /// Returns a stable identifier for duplicate detection.
    ///
    /// Two deliveries of the same accounting line produce the same identifier.
    #[must_use]
    pub fn event_id(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.record_type.as_str(),
            self.time_logged.timestamp(),
            self.rcpt,
            self.job_id.as_deref().unwrap_or(""),
            self.env_id.as_deref().unwrap_or(""),
            self.status().map(|s| s.to_string()).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;

    fn bounce(status: &str, category: BounceCategory) -> AccountingRecord {
        let mut record = AccountingRecord::new(
            RecordType::Bounce,
            Address::new("user@yahoo.com").unwrap(),
            Utc::now(),
        );
        record.dsn_status = Some(EnhancedStatus::parse(status).unwrap());
        record.bounce_category = category;
        record
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!(RecordType::parse("d").unwrap(), RecordType::Delivery);
        assert_eq!(RecordType::parse("TQ").unwrap(), RecordType::Transient);
        assert_eq!(RecordType::parse("rb").unwrap(), RecordType::RemoteBounce);
        assert!(RecordType::parse("x").is_err());
    }

    #[test]
    fn test_hard_bounce_bad_mailbox() {
        assert!(bounce("5.1.1", BounceCategory::BadMailbox).is_hard_bounce());
    }

    #[test]
    fn test_policy_block_is_not_hard_bounce() {
        assert!(!bounce("5.7.1", BounceCategory::PolicyRelated).is_hard_bounce());
        assert!(!bounce("5.7.1", BounceCategory::Other).is_hard_bounce());
    }

    #[test]
    fn test_transient_status_is_not_hard_bounce() {
        assert!(!bounce("4.1.1", BounceCategory::BadMailbox).is_hard_bounce());
    }

    #[test]
    fn test_uncategorized_recipient_status_is_hard_bounce() {
        assert!(bounce("5.1.1", BounceCategory::Other).is_hard_bounce());
    }

    #[test]
    fn test_reply_code_fallback() {
        let mut record = bounce("5.1.1", BounceCategory::BadMailbox);
        record.dsn_status = None;
        record.dsn_diag.reply_code = Some(ReplyCode::MAILBOX_UNAVAILABLE);
        assert!(record.is_hard_bounce());
    }

    #[test]
    fn test_delivery_never_hard_bounce() {
        let mut record = bounce("5.1.1", BounceCategory::BadMailbox);
        record.record_type = RecordType::Delivery;
        assert!(!record.is_hard_bounce());
    }

    #[test]
    fn test_event_id_stable() {
        let a = bounce("5.1.1", BounceCategory::BadMailbox);
        let b = a.clone();
        assert_eq!(a.event_id(), b.event_id());
    }
}
