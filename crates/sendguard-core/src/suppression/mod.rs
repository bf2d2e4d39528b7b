//! Suppression lists.
//!
//! Per-ISP lists are kept by the [`SuppressionStore`]; every new entry there
//! also reaches the [`SuppressionHub`], the one global list every send path
//! consults and the one synced to the transfer agent.

pub mod csv;
mod hub;
mod model;
mod repository;
mod store;

pub use hub::{SuppressionHub, SyncReport};
pub use model::{
    ImportReport, Scope, Suppression, SuppressionSource, SuppressionStats, normalize_email,
};
pub use repository::SuppressionRepository;
pub use store::{SuppressionSink, SuppressionStore};
