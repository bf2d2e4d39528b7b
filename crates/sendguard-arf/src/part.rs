//! MIME entity parsing.

use crate::content_type::ContentType;
use crate::encoding::decode_body;
use crate::error::{Error, Result};
use crate::header::Headers;

/// Maximum multipart nesting accepted before parsing gives up.
const MAX_DEPTH: usize = 8;

/// One MIME entity: headers, decoded body, and child parts for multiparts.
#[derive(Debug, Clone, Default)]
pub struct Part {
    /// Entity headers.
    pub headers: Headers,
    /// Parsed content type (`text/plain` when absent).
    pub content_type: ContentType,
    /// Decoded body. Empty for multiparts.
    pub body: String,
    /// Child entities of a multipart.
    pub parts: Vec<Part>,
}

impl Part {
    /// Parses a raw message or entity.
    ///
    /// # Errors
    ///
    /// Returns an error if a multipart has no boundary or nests too deeply,
    /// or if a body's transfer encoding is malformed.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &str, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidMultipart("nesting too deep".to_string()));
        }

        let (headers, body) = Headers::parse(raw);
        let content_type = headers
            .get("content-type")
            .map(ContentType::parse)
            .transpose()?
            .unwrap_or_default();

        if content_type.is_multipart() {
            let boundary = content_type.boundary().ok_or(Error::MissingBoundary)?;
            let parts = split_multipart(body, boundary)?
                .into_iter()
                .map(|p| Self::parse_at_depth(p, depth + 1))
                .collect::<Result<Vec<_>>>()?;

            return Ok(Self {
                headers,
                content_type,
                body: String::new(),
                parts,
            });
        }

        let body = decode_body(body, headers.get("content-transfer-encoding"))?;
        Ok(Self {
            headers,
            content_type,
            body,
            parts: Vec::new(),
        })
    }

    /// Finds the first entity, depth first, with the given content type.
    #[must_use]
    pub fn find(&self, main_type: &str, sub_type: &str) -> Option<&Self> {
        if self.content_type.is(main_type, sub_type) {
            return Some(self);
        }
        self.parts.iter().find_map(|p| p.find(main_type, sub_type))
    }
}

/// Splits a multipart body into its raw child entities.
///
/// The preamble and epilogue are discarded.
///
/// # Errors
///
/// Returns an error if no delimiter line is found.
pub fn split_multipart<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;
    let mut seen_delimiter = false;

    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end();

        if !trimmed.starts_with(&delimiter) {
            continue;
        }
        let suffix = &trimmed[delimiter.len()..];
        let closing = suffix.starts_with("--");
        if !suffix.is_empty() && !closing {
            continue;
        }

        seen_delimiter = true;
        if let Some(s) = start.take() {
            parts.push(strip_line_break(&body[s..line_start]));
        }
        if closing {
            return Ok(parts);
        }
        start = Some(offset);
    }

    if !seen_delimiter {
        return Err(Error::InvalidMultipart(format!("boundary {boundary} not found")));
    }
    // Tolerate a missing closing delimiter.
    if let Some(s) = start {
        parts.push(&body[s..]);
    }
    Ok(parts)
}

fn strip_line_break(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}
