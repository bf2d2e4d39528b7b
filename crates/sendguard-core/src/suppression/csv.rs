//! Suppression CSV import and export.
//!
//! Columns: `email,reason,dsn_code,source_ip,campaign_id,suppressed_at`.
//! The header line is optional on import.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use sendguard_acct::{Address, parse_timestamp, split_csv_line};

use super::model::Suppression;

/// Header line written on export.
pub const CSV_HEADER: &str = "email,reason,dsn_code,source_ip,campaign_id,suppressed_at";

/// One imported row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// Validated, normalized address.
    pub email: String,
    /// Reason column.
    pub reason: Option<String>,
    /// Status code column.
    pub dsn_code: Option<String>,
    /// Source IP column.
    pub source_ip: Option<String>,
    /// Campaign column.
    pub campaign_id: Option<String>,
    /// Suppression time column, when parseable.
    pub suppressed_at: Option<DateTime<Utc>>,
}

/// Renders entries as CSV with a header line.
#[must_use]
pub fn export(entries: &[Suppression]) -> String {
    let mut out = String::with_capacity(64 * (entries.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for e in entries {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            escape(&e.email),
            escape(&e.reason),
            escape(e.dsn_code.as_deref().unwrap_or("")),
            escape(e.source_ip.as_deref().unwrap_or("")),
            escape(e.campaign_id.as_deref().unwrap_or("")),
            e.suppressed_at.to_rfc3339(),
        );
    }
    out
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Parses CSV text into rows.
///
/// Blank lines and a leading header are skipped. Each remaining line yields
/// either a row or the reason it was rejected.
#[must_use]
pub fn parse(text: &str) -> Vec<Result<CsvRow, String>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    if lines.peek().is_some_and(|first| is_header(first)) {
        lines.next();
    }

    lines.map(parse_row).collect()
}

fn is_header(line: &str) -> bool {
    line.split(',')
        .next()
        .is_some_and(|f| f.trim().trim_matches('"').eq_ignore_ascii_case("email"))
}

fn parse_row(line: &str) -> Result<CsvRow, String> {
    let fields = split_csv_line(line).map_err(|e| e.to_string())?;
    let field = |i: usize| {
        fields
            .get(i)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(ToString::to_string)
    };

    let raw = field(0).ok_or_else(|| "missing email".to_string())?;
    let email = Address::new(&raw).map_err(|e| e.to_string())?;

    Ok(CsvRow {
        email: email.into_string(),
        reason: field(1),
        dsn_code: field(2),
        source_ip: field(3),
        campaign_id: field(4),
        suppressed_at: field(5).and_then(|t| parse_timestamp(&t).ok()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::suppression::{Scope, SuppressionSource};

    #[test]
    fn test_parse_with_and_without_header() {
        let with = parse("email,reason\nA@Gmail.com,bounced\n\nb@gmail.com\n");
        assert_eq!(with.len(), 2);
        assert_eq!(with[0].as_ref().unwrap().email, "a@gmail.com");
        assert_eq!(with[0].as_ref().unwrap().reason.as_deref(), Some("bounced"));

        let without = parse("c@gmail.com,,5.1.1,10.0.0.1,spring,2024-01-15T10:00:00Z\n");
        let row = without[0].as_ref().unwrap();
        assert_eq!(row.dsn_code.as_deref(), Some("5.1.1"));
        assert!(row.suppressed_at.is_some());
    }

    #[test]
    fn test_address_starting_with_email_is_data() {
        let rows = parse("email@example.com,x\n");
        assert_eq!(rows[0].as_ref().unwrap().email, "email@example.com");
    }

    #[test]
    fn test_invalid_rows() {
        let rows = parse("no-at-sign,x\n@gmail.com,x\n\"unterminated,x\nok@gmail.com\n");
        assert_eq!(rows.iter().filter(|r| r.is_err()).count(), 3);
    }

    #[test]
    fn test_export_escapes() {
        let entry = Suppression::new(
            "a@gmail.com",
            Scope::Global,
            SuppressionSource::Operator,
            "said \"stop\", twice",
        );
        let csv = export(&[entry]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert!(lines.next().unwrap().starts_with("a@gmail.com,\"said \"\"stop\"\", twice\",,,,"));
    }
}
