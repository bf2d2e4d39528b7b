//! Transfer-encoding decoders.
//!
//! Supports Base64 and Quoted-Printable bodies.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes Base64 data, ignoring line breaks and surrounding whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact).map_err(Into::into)
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        // Soft line break
        match bytes.get(i + 1..i + 3) {
            Some([b'\r', b'\n']) => i += 3,
            Some([b'\n', _]) => i += 2,
            None if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            Some(hex) => {
                let hex = std::str::from_utf8(hex)
                    .map_err(|_| Error::InvalidEncoding("Invalid hex".to_string()))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
                result.push(byte);
                i += 3;
            }
            None => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    Ok(result)
}

/// Decodes a body according to its `Content-Transfer-Encoding`.
///
/// Unknown encodings (7bit, 8bit, binary) pass through. Invalid UTF-8 is
/// replaced rather than rejected, since reports often carry mangled bytes.
///
/// # Errors
///
/// Returns an error if a Base64 or Quoted-Printable body is malformed.
pub fn decode_body(body: &str, transfer_encoding: Option<&str>) -> Result<String> {
    let bytes = match transfer_encoding.map(|e| e.trim().to_lowercase()).as_deref() {
        Some("base64") => decode_base64(body)?,
        Some("quoted-printable") => decode_quoted_printable(body)?,
        _ => return Ok(body.to_string()),
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base64_with_line_breaks() {
        assert_eq!(decode_base64("SGVs\r\nbG8=\n").unwrap(), b"Hello");
    }

    #[test]
    fn test_quoted_printable() {
        assert_eq!(decode_quoted_printable("a=3Db").unwrap(), b"a=b");
        assert_eq!(decode_quoted_printable("soft=\r\nbreak").unwrap(), b"softbreak");
        assert_eq!(decode_quoted_printable("soft=\nbreak").unwrap(), b"softbreak");
        assert!(decode_quoted_printable("bad=ZZ").is_err());
        assert!(decode_quoted_printable("cut=4").is_err());
    }

    #[test]
    fn test_decode_body_passthrough() {
        assert_eq!(decode_body("plain", Some("7bit")).unwrap(), "plain");
        assert_eq!(decode_body("plain", None).unwrap(), "plain");
    }

    proptest! {
        #[test]
        fn quoted_printable_never_panics(s in "\\PC{0,64}") {
            let _ = decode_quoted_printable(&s);
        }
    }
}
