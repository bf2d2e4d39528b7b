//! # sendguard
//!
//! The deliverability governance daemon.
//!
//! - [`config`]: JSON configuration with defaults for every field
//! - [`api`]: dashboards, operator controls, webhooks and live streams
//! - [`server`]: engine wiring and graceful shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod server;

pub use config::Config;
