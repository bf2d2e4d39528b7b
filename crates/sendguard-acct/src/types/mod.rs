//! Core accounting types.

mod address;
mod category;
mod record;
mod reply;
mod status;

pub use address::Address;
pub use category::BounceCategory;
pub use record::{AccountingRecord, RecordType};
pub use reply::{Diagnostic, ReplyCode};
pub use status::{EnhancedStatus, StatusClass};
