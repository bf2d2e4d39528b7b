//! Accounting CSV and diagnostic-string parsers.
//!
//! The transfer agent writes one CSV line per event. The column layout is set
//! by the accounting file's header line, so the parser is header-driven and
//! falls back to [`DEFAULT_COLUMNS`] for headerless input (webhook posts).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{
    AccountingRecord, Address, BounceCategory, Diagnostic, EnhancedStatus, RecordType, ReplyCode,
};

/// Column order of the default accounting record definition.
pub const DEFAULT_COLUMNS: &[&str] = &[
    "type",
    "timeLogged",
    "timeQueued",
    "orig",
    "rcpt",
    "orcpt",
    "dsnAction",
    "dsnStatus",
    "dsnDiag",
    "dsnMta",
    "bounceCat",
    "srcType",
    "srcMta",
    "dlvType",
    "dlvSourceIp",
    "dlvDestinationIp",
    "dlvEsmtpAvailable",
    "dlvSize",
    "vmta",
    "jobId",
    "envId",
    "queue",
    "vmtaPool",
    "header_x-campaign-id",
];

/// Timestamp layout written by the transfer agent (`2024-01-15 10:23:45-0500`).
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";
const NAIVE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header-driven accounting record parser.
#[derive(Debug, Clone)]
pub struct AccountingParser {
    columns: Vec<String>,
}

impl Default for AccountingParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountingParser {
    /// Creates a parser using [`DEFAULT_COLUMNS`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: DEFAULT_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Creates a parser from an accounting file header line.
    ///
    /// # Errors
    ///
    /// Returns an error if the header has no `type` or `rcpt` column.
    pub fn with_header(header: &str) -> Result<Self> {
        let columns: Vec<String> = split_csv_line(header)?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        for required in ["type", "rcpt"] {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(required)) {
                return Err(Error::MissingField(required));
            }
        }

        Ok(Self { columns })
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the line looks like a header for this format.
    #[must_use]
    pub fn is_header(line: &str) -> bool {
        line.split(',')
            .next()
            .is_some_and(|first| first.trim().eq_ignore_ascii_case("type"))
    }

    /// Parses one accounting line.
    ///
    /// Lines shorter than the header leave the remaining columns empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is malformed, the record type is unknown,
    /// or the recipient is invalid.
    pub fn parse_line(&self, line: &str) -> Result<AccountingRecord> {
        let values = split_csv_line(line.trim_end_matches(['\r', '\n']))?;
        let fields: HashMap<String, String> = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.clone(), value))
            .collect();

        record_from_fields(&fields)
    }

    /// Parses a whole document, switching layout on header lines.
    ///
    /// Blank lines are skipped. Each line's outcome is returned so callers can
    /// count failures without aborting the batch.
    #[must_use]
    pub fn parse_document(&self, text: &str) -> Vec<Result<AccountingRecord>> {
        let mut parser = self.clone();
        let mut results = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if Self::is_header(line) {
                match Self::with_header(line) {
                    Ok(p) => parser = p,
                    Err(e) => results.push(Err(e)),
                }
                continue;
            }
            results.push(parser.parse_line(line));
        }

        results
    }
}

/// Builds a record from named fields.
///
/// Field names are matched case-insensitively, so the same function serves
/// CSV lines and JSON webhook objects.
///
/// # Errors
///
/// Returns an error if `type` or `rcpt` is missing or invalid, or if a
/// present timestamp cannot be parsed.
pub fn record_from_fields<S: std::hash::BuildHasher>(
    fields: &HashMap<String, String, S>,
) -> Result<AccountingRecord> {
    let get = |name: &str| -> Option<&str> {
        fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    };
    let owned = |name: &str| get(name).map(ToString::to_string);

    let record_type = RecordType::parse(get("type").ok_or(Error::MissingField("type"))?)?;
    let rcpt = Address::new(get("rcpt").ok_or(Error::MissingField("rcpt"))?)?;
    let time_logged = match get("timeLogged") {
        Some(t) => parse_timestamp(t)?,
        None => Utc::now(),
    };

    let mut record = AccountingRecord::new(record_type, rcpt, time_logged);
    record.orig = owned("orig");
    record.dsn_action = owned("dsnAction");
    record.dsn_status = get("dsnStatus").and_then(|s| EnhancedStatus::parse(s).ok());
    record.dsn_diag = get("dsnDiag").map(parse_diagnostic).unwrap_or_default();
    record.dsn_mta = owned("dsnMta");
    record.bounce_category = get("bounceCat").map(BounceCategory::parse).unwrap_or_default();
    record.source_ip = owned("dlvSourceIp");
    record.destination_ip = owned("dlvDestinationIp");
    record.vmta = owned("vmta");
    record.job_id = owned("jobId");
    record.env_id = owned("envId");
    record.queue = owned("queue");
    record.campaign_id = owned("header_x-campaign-id")
        .or_else(|| owned("campaignId"))
        .or_else(|| owned("campaign_id"));
    record.feedback_type = owned("feedbackType").or_else(|| owned("format"));

    Ok(record)
}

/// Parses an accounting timestamp.
///
/// Accepts the transfer agent's own layout, RFC 3339, and a naive
/// `YYYY-MM-DD HH:MM:SS` taken as UTC.
///
/// # Errors
///
/// Returns an error if no layout matches.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_str(s, TIME_FORMAT) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, NAIVE_TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| Error::InvalidTimestamp(s.to_string()))
}

/// Parses a remote diagnostic such as `smtp;550 5.1.1 <user@example.com>: unknown`.
///
/// Missing parts are left empty; this never fails.
#[must_use]
pub fn parse_diagnostic(s: &str) -> Diagnostic {
    let s = s.trim();
    let (kind, rest) = match s.split_once(';') {
        Some((kind, rest)) if !kind.contains(' ') => (kind.trim().to_lowercase(), rest.trim()),
        _ => (String::new(), s),
    };

    let mut rest = rest;
    let mut reply_code = None;
    if rest.len() >= 3 && rest.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        let boundary = rest.as_bytes().get(3).is_none_or(|b| matches!(b, b' ' | b'-'));
        if boundary {
            if let Ok(code) = rest[..3].parse::<u16>() {
                reply_code = Some(ReplyCode::new(code));
                rest = rest[3..].trim_start_matches(['-', ' ']);
            }
        }
    }

    let mut status = None;
    if let Some(token) = rest.split_whitespace().next() {
        if let Ok(parsed) = EnhancedStatus::parse(token) {
            status = Some(parsed);
            rest = rest[token.len()..].trim_start();
        }
    }

    Diagnostic {
        kind,
        reply_code,
        status,
        text: rest.to_string(),
    }
}

/// Splits one CSV line into fields.
///
/// Supports double-quoted fields with `""` escapes.
///
/// # Errors
///
/// Returns an error if a quoted field is never closed.
pub fn split_csv_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(Error::Malformed(format!("unterminated quote: {line}")));
    }
    fields.push(current);
    Ok(fields)
}
