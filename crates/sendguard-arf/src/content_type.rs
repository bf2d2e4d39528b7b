//! Content type handling.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "message", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "feedback-report", "report").
    pub sub_type: String,
    /// Parameters with lowercase names (e.g., boundary, report-type).
    pub parameters: HashMap<String, String>,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::new("text", "plain")
    }
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks for an exact `type/subtype` match.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type == main_type && self.sub_type == sub_type
    }

    /// Checks if this is an RFC 5965 feedback report container.
    #[must_use]
    pub fn is_feedback_report(&self) -> bool {
        self.is("multipart", "report")
            && self
                .parameters
                .get("report-type")
                .is_some_and(|t| t.eq_ignore_ascii_case("feedback-report"))
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let type_str = parts.next().unwrap_or_default().trim();

        let Some((main_type, sub_type)) = type_str.split_once('/') else {
            return Err(Error::InvalidContentType(s.to_string()));
        };
        let (main_type, sub_type) = (main_type.trim(), sub_type.trim());
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.to_string()));
        }

        let mut ct = Self::new(main_type.to_lowercase(), sub_type.to_lowercase());
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                let value = value.trim().trim_matches('"');
                ct.parameters
                    .insert(key.trim().to_lowercase(), value.to_string());
            }
        }

        Ok(ct)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let ct = ContentType::parse(
            "multipart/report; report-type=feedback-report;\n boundary=\"part1_13d.2e68ed54_boundary\"",
        )
        .unwrap();
        assert!(ct.is_multipart());
        assert!(ct.is_feedback_report());
        assert_eq!(ct.boundary(), Some("part1_13d.2e68ed54_boundary"));
    }

    #[test]
    fn test_parse_case_insensitive() {
        let ct = ContentType::parse("Message/RFC822").unwrap();
        assert!(ct.is("message", "rfc822"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }
}
