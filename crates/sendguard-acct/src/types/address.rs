//! Recipient address type.

use crate::error::{Error, Result};

/// A normalized recipient address.
///
/// Addresses are trimmed, stripped of angle brackets and of an RFC 3464
/// address-type prefix (`rfc822;`), and lower-cased so that the same mailbox
/// always compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl AsRef<str>) -> Result<Self> {
        let normalized = Self::normalize(addr.as_ref());
        Self::validate(&normalized)?;
        Ok(Self(normalized))
    }

    /// Normalizes an address without validating it.
    #[must_use]
    pub fn normalize(addr: &str) -> String {
        let mut s = addr.trim();
        if let Some((kind, rest)) = s.split_once(';') {
            if kind.trim().eq_ignore_ascii_case("rfc822") {
                s = rest.trim();
            }
        }
        s.trim_start_matches('<')
            .trim_end_matches('>')
            .trim()
            .to_lowercase()
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part before the `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map_or("", |(local, _)| local)
    }

    /// Returns the part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }

    /// Consumes the address, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Validates an email address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if !addr.contains('@') {
            return Err(Error::InvalidAddress(format!("{addr}: missing @")));
        }

        let parts: Vec<&str> = addr.split('@').collect();
        if parts.len() != 2 {
            return Err(Error::InvalidAddress(format!(
                "{addr}: must have exactly one @"
            )));
        }

        if parts[0].is_empty() || parts[1].is_empty() {
            return Err(Error::InvalidAddress(format!(
                "{addr}: local and domain parts cannot be empty"
            )));
        }

        if addr.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(Error::InvalidAddress(format!(
                "{addr}: contains whitespace or separator"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
