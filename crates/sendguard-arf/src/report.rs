//! Abuse Reporting Format (RFC 5965) feedback reports.
//!
//! Mailbox providers send complaints either as a proper
//! `multipart/report; report-type=feedback-report` message or, for some
//! feedback loops, as a plain forward of the original message. Both shapes
//! are accepted; the recipient is recovered from `Original-Rcpt-To` or from
//! the original message's `To` header.

use chrono::{DateTime, Utc};
use sendguard_acct::Address;

use crate::error::{Error, Result};
use crate::header::Headers;
use crate::part::Part;

/// Campaign header stamped on outgoing mail.
pub const CAMPAIGN_HEADER: &str = "X-Campaign-ID";

/// Feedback type (RFC 5965 section 7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeedbackType {
    /// Unsolicited mail.
    Abuse,
    /// Authentication failure report.
    AuthFailure,
    /// Phishing or fraud.
    Fraud,
    /// Report that a message is not spam.
    NotSpam,
    /// Virus report.
    Virus,
    /// Anything else.
    Other,
}

impl FeedbackType {
    /// Parses a `Feedback-Type` value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "abuse" => Self::Abuse,
            "auth-failure" => Self::AuthFailure,
            "fraud" => Self::Fraud,
            "not-spam" => Self::NotSpam,
            "virus" => Self::Virus,
            _ => Self::Other,
        }
    }

    /// Returns the RFC 5965 name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Abuse => "abuse",
            Self::AuthFailure => "auth-failure",
            Self::Fraud => "fraud",
            Self::NotSpam => "not-spam",
            Self::Virus => "virus",
            Self::Other => "other",
        }
    }

    /// Returns true if the report is a complaint about the sender.
    ///
    /// `not-spam` and authentication reports never suppress a recipient.
    #[must_use]
    pub const fn is_complaint(&self) -> bool {
        matches!(self, Self::Abuse | Self::Fraud | Self::Virus | Self::Other)
    }
}

/// A parsed feedback report.
#[derive(Debug, Clone)]
pub struct FeedbackReport {
    /// Feedback type.
    pub feedback_type: FeedbackType,
    /// Reporting software (`User-Agent`).
    pub user_agent: Option<String>,
    /// Complaining recipient.
    pub recipient: Address,
    /// Envelope sender of the original message.
    pub original_mail_from: Option<String>,
    /// When the original message arrived at the provider.
    pub arrival_date: Option<DateTime<Utc>>,
    /// IP the original message was sent from.
    pub source_ip: Option<String>,
    /// Domains the provider attributes the message to.
    pub reported_domains: Vec<String>,
    /// Headers of the original message, when included.
    pub original_headers: Headers,
    /// Campaign identifier from the original message.
    pub campaign_id: Option<String>,
    /// Message-ID of the original message.
    pub message_id: Option<String>,
}

impl FeedbackReport {
    /// Parses a raw feedback report message.
    ///
    /// # Errors
    ///
    /// Returns an error if the MIME structure is malformed or no recipient
    /// can be found.
    pub fn parse(raw: &str) -> Result<Self> {
        let message = Part::parse(raw)?;

        let fields = message
            .find("message", "feedback-report")
            .map(|p| Headers::parse(&p.body).0)
            .unwrap_or_default();
        let original_headers = original_headers(&message);

        let feedback_type = fields
            .get("feedback-type")
            .map_or(FeedbackType::Abuse, FeedbackType::parse);

        let recipient = fields
            .get("original-rcpt-to")
            .or_else(|| original_headers.get("to"))
            .or_else(|| message.headers.get("x-original-to"))
            .ok_or(Error::MissingRecipient)?;
        let recipient = Address::new(first_address(recipient))?;

        let arrival_date = fields
            .get("arrival-date")
            .or_else(|| fields.get("received-date"))
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(Self {
            feedback_type,
            user_agent: fields.get("user-agent").map(ToString::to_string),
            recipient,
            original_mail_from: fields
                .get("original-mail-from")
                .map(|s| s.trim_matches(['<', '>']).to_string()),
            arrival_date,
            source_ip: fields.get("source-ip").map(ToString::to_string),
            reported_domains: fields
                .get_all("reported-domain")
                .into_iter()
                .map(|d| d.trim().to_lowercase())
                .collect(),
            campaign_id: original_headers.get(CAMPAIGN_HEADER).map(ToString::to_string),
            message_id: original_headers.get("message-id").map(ToString::to_string),
            original_headers,
        })
    }
}

/// Extracts the original message headers from `message/rfc822` or
/// `text/rfc822-headers`, falling back to the outer body for plain forwards.
fn original_headers(message: &Part) -> Headers {
    if let Some(p) = message
        .find("message", "rfc822")
        .or_else(|| message.find("text", "rfc822-headers"))
    {
        return Headers::parse(&p.body).0;
    }

    if message.parts.is_empty() {
        let (headers, _) = Headers::parse(&message.body);
        if headers.get("to").is_some() {
            return headers;
        }
    }
    Headers::new()
}

/// Returns the first address of a header value like `"Name" <a@b>, c@d`.
fn first_address(value: &str) -> &str {
    let first = value.split(',').next().unwrap_or(value).trim();
    match (first.find('<'), first.rfind('>')) {
        (Some(open), Some(close)) if open < close => &first[open + 1..close],
        _ => first,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ARF: &str = "From: <staff@hotmail.example>\r\n\
Date: Thu, 8 Mar 2024 14:00:00 EDT\r\n\
Subject: FW: Earn money\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/report; report-type=feedback-report;\r\n\
     boundary=\"part1_13d.2e68ed54_boundary\"\r\n\
\r\n\
--part1_13d.2e68ed54_boundary\r\n\
Content-Type: text/plain; charset=\"US-ASCII\"\r\n\
Content-Transfer-Encoding: 7bit\r\n\
\r\n\
This is an email abuse report for an email message received from IP\r\n\
192.0.2.1 on Thu, 8 Mar 2024 14:00:00 EDT.\r\n\
--part1_13d.2e68ed54_boundary\r\n\
Content-Type: message/feedback-report\r\n\
\r\n\
Feedback-Type: abuse\r\n\
User-Agent: SomeGenerator/1.0\r\n\
Version: 1\r\n\
Original-Mail-From: <bounces@example.net>\r\n\
Original-Rcpt-To: <User@Yahoo.com>\r\n\
Arrival-Date: Fri, 8 Mar 2024 14:00:00 -0400\r\n\
Source-IP: 192.0.2.1\r\n\
Reported-Domain: Example.net\r\n\
\r\n\
--part1_13d.2e68ed54_boundary\r\n\
Content-Type: message/rfc822\r\n\
Content-Disposition: inline\r\n\
\r\n\
From: <news@example.net>\r\n\
To: <user@yahoo.com>\r\n\
Subject: Earn money\r\n\
Message-ID: <8787KJKJ3K4J3K4J3K4J3.mail@example.net>\r\n\
X-Campaign-ID: spring-sale\r\n\
\r\n\
Spam Spam Spam\r\n\
--part1_13d.2e68ed54_boundary--\r\n";

    #[test]
    fn test_parse_arf() {
        let report = FeedbackReport::parse(ARF).unwrap();

        assert_eq!(report.feedback_type, FeedbackType::Abuse);
        assert_eq!(report.recipient.as_str(), "user@yahoo.com");
        assert_eq!(report.source_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(report.reported_domains, vec!["example.net"]);
        assert_eq!(report.original_mail_from.as_deref(), Some("bounces@example.net"));
        assert_eq!(report.campaign_id.as_deref(), Some("spring-sale"));
        assert_eq!(report.user_agent.as_deref(), Some("SomeGenerator/1.0"));
        assert!(report.arrival_date.is_some());
    }

    #[test]
    fn test_plain_forward_uses_to_header() {
        let raw = "From: fbl@provider.example\n\
Content-Type: message/rfc822\n\
\n\
To: \"Someone\" <someone@comcast.net>\n\
X-Campaign-ID: c-9\n\
\n\
body\n";
        let report = FeedbackReport::parse(raw).unwrap();
        assert_eq!(report.feedback_type, FeedbackType::Abuse);
        assert_eq!(report.recipient.as_str(), "someone@comcast.net");
        assert_eq!(report.campaign_id.as_deref(), Some("c-9"));
    }

    #[test]
    fn test_missing_recipient() {
        assert!(matches!(
            FeedbackReport::parse("Subject: nothing\n\nhello\n"),
            Err(Error::MissingRecipient)
        ));
    }

    #[test]
    fn test_not_spam_is_not_complaint() {
        assert!(!FeedbackType::parse("not-spam").is_complaint());
        assert!(FeedbackType::parse("abuse").is_complaint());
    }

    #[test]
    fn test_first_address() {
        assert_eq!(first_address("\"A\" <a@b.com>, c@d.com"), "a@b.com");
        assert_eq!(first_address("plain@x.com"), "plain@x.com");
    }
}
