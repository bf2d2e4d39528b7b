//! Bounce categories assigned by the transfer agent.

/// The transfer agent's classification of a failed delivery.
///
/// The string forms match the `bounceCat` accounting field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BounceCategory {
    /// Recipient mailbox does not exist.
    BadMailbox,
    /// Recipient domain does not exist or has no MX.
    BadDomain,
    /// Mailbox exists but has been disabled.
    InactiveMailbox,
    /// Mailbox is over quota.
    QuotaIssues,
    /// Rejected as spam or for sender reputation.
    SpamRelated,
    /// Rejected by local policy (rate limits, blocklists).
    PolicyRelated,
    /// Rejected because of message content.
    ContentRelated,
    /// Virus detected.
    VirusRelated,
    /// The envelope sender was rejected.
    InvalidSender,
    /// Relaying denied.
    RelayingIssues,
    /// Routing failure.
    RoutingErrors,
    /// Remote host did not answer.
    NoAnswerFromHost,
    /// Connection dropped or refused.
    BadConnection,
    /// SMTP protocol error.
    ProtocolErrors,
    /// Message expired in the queue.
    MessageExpired,
    /// Anything else.
    #[default]
    Other,
}

impl BounceCategory {
    /// Parse from the accounting field representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "bad-mailbox" => Self::BadMailbox,
            "bad-domain" => Self::BadDomain,
            "inactive-mailbox" => Self::InactiveMailbox,
            "quota-issues" => Self::QuotaIssues,
            "spam-related" => Self::SpamRelated,
            "policy-related" => Self::PolicyRelated,
            "content-related" => Self::ContentRelated,
            "virus-related" => Self::VirusRelated,
            "invalid-sender" => Self::InvalidSender,
            "relaying-issues" => Self::RelayingIssues,
            "routing-errors" => Self::RoutingErrors,
            "no-answer-from-host" => Self::NoAnswerFromHost,
            "bad-connection" => Self::BadConnection,
            "protocol-errors" => Self::ProtocolErrors,
            "message-expired" => Self::MessageExpired,
            _ => Self::Other,
        }
    }

    /// Convert to the accounting field representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadMailbox => "bad-mailbox",
            Self::BadDomain => "bad-domain",
            Self::InactiveMailbox => "inactive-mailbox",
            Self::QuotaIssues => "quota-issues",
            Self::SpamRelated => "spam-related",
            Self::PolicyRelated => "policy-related",
            Self::ContentRelated => "content-related",
            Self::VirusRelated => "virus-related",
            Self::InvalidSender => "invalid-sender",
            Self::RelayingIssues => "relaying-issues",
            Self::RoutingErrors => "routing-errors",
            Self::NoAnswerFromHost => "no-answer-from-host",
            Self::BadConnection => "bad-connection",
            Self::ProtocolErrors => "protocol-errors",
            Self::MessageExpired => "message-expired",
            Self::Other => "other",
        }
    }

    /// Returns true if the failure is a property of the recipient address.
    ///
    /// Recipient-level failures are the ones that justify suppression.
    #[must_use]
    pub const fn is_recipient_level(&self) -> bool {
        matches!(
            self,
            Self::BadMailbox | Self::BadDomain | Self::InactiveMailbox
        )
    }

    /// Returns true if the failure reflects on the sender's reputation.
    #[must_use]
    pub const fn is_reputation_related(&self) -> bool {
        matches!(
            self,
            Self::SpamRelated | Self::PolicyRelated | Self::ContentRelated | Self::VirusRelated
        )
    }
}

impl std::fmt::Display for BounceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known() {
        assert_eq!(BounceCategory::parse("bad-mailbox"), BounceCategory::BadMailbox);
        assert_eq!(BounceCategory::parse(" Spam-Related "), BounceCategory::SpamRelated);
        assert_eq!(BounceCategory::parse("unheard-of"), BounceCategory::Other);
    }

    #[test]
    fn test_recipient_level() {
        assert!(BounceCategory::BadMailbox.is_recipient_level());
        assert!(BounceCategory::InactiveMailbox.is_recipient_level());
        assert!(!BounceCategory::QuotaIssues.is_recipient_level());
        assert!(!BounceCategory::SpamRelated.is_recipient_level());
    }

    #[test]
    fn test_reputation_related() {
        assert!(BounceCategory::PolicyRelated.is_reputation_related());
        assert!(!BounceCategory::BadDomain.is_reputation_related());
    }
}
