//! Per-ISP delivery signals.
//!
//! The [`SignalProcessor`] keeps second-resolution counters for the last hour
//! and answers rolling-window rate queries; the [`SignalRepository`] keeps
//! durable hourly totals.

mod model;
mod processor;
mod repository;

pub use model::{ContextInputs, Counts, EventKind, SignalEvent, SignalSnapshot};
pub use processor::{HORIZON_SECS, SignalProcessor};
pub use repository::SignalRepository;
