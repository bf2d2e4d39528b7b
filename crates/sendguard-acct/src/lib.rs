//! # sendguard-acct
//!
//! Wire-level vocabulary of the mail transfer agent.
//!
//! ## Features
//!
//! - **Reply codes**: SMTP reply codes (RFC 5321) with success/transient/permanent classes
//! - **Delivery status codes**: RFC 3463 enhanced status codes (`5.1.1`, `4.7.0`, ...)
//! - **Bounce categories**: The transfer agent's bounce classification (`bad-mailbox`, `spam-related`, ...)
//! - **Accounting records**: Header-driven CSV parser for accounting files and webhook posts
//!
//! ## Quick Start
//!
//! ```ignore
//! use sendguard_acct::{AccountingParser, RecordType};
//!
//! let parser = AccountingParser::new();
//! let record = parser.parse_line(
//!     "b,2024-01-15 10:23:45-0500,,news@example.com,user@yahoo.com,,failed,5.1.1,\
//!      smtp;550 5.1.1 user unknown,mta5.am0.yahoodns.net,bad-mailbox",
//! )?;
//!
//! assert_eq!(record.record_type, RecordType::Bounce);
//! assert!(record.is_hard_bounce());
//! ```
//!
//! ## Modules
//!
//! - [`parser`]: Accounting CSV and diagnostic-string parsers
//! - [`types`]: Core types (addresses, reply codes, status codes, records)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use parser::{
    AccountingParser, DEFAULT_COLUMNS, parse_diagnostic, parse_timestamp, record_from_fields,
    split_csv_line,
};
pub use types::{
    AccountingRecord, Address, BounceCategory, Diagnostic, EnhancedStatus, RecordType, ReplyCode,
    StatusClass,
};
