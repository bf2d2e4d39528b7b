//! # sendguard-arf
//!
//! Abuse report parsing for feedback loops.
//!
//! ## Features
//!
//! - **Headers**: Ordered, case-insensitive header blocks with unfolding
//! - **Content types**: `type/subtype` with parameters (RFC 2045)
//! - **Transfer encodings**: Base64 and Quoted-Printable decoding
//! - **Multipart**: Nested multipart entity parsing (RFC 2046)
//! - **Feedback reports**: Abuse Reporting Format (RFC 5965) and plain FBL forwards
//!
//! ## Quick Start
//!
//! ```ignore
//! use sendguard_arf::FeedbackReport;
//!
//! let report = FeedbackReport::parse(raw_message)?;
//! if report.feedback_type.is_complaint() {
//!     println!("complaint from {}", report.recipient);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`content_type`]: Content type handling
//! - [`encoding`]: Transfer-encoding decoders
//! - [`header`]: Header block parsing
//! - [`part`]: MIME entity parsing
//! - [`report`]: Feedback reports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod content_type;
pub mod encoding;
mod error;
pub mod header;
pub mod part;
pub mod report;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use part::Part;
pub use report::{CAMPAIGN_HEADER, FeedbackReport, FeedbackType};
