//! # sendguard-core
//!
//! Deliverability governance engine for a mail transfer agent.
//!
//! This crate provides:
//! - Rolling per-ISP signal rates (bounce, deferral, complaint) over trailing windows
//! - A precedent memory of "will send" / "won't send" verdicts with similarity recall
//! - Per-ISP suppression lists and the **Global Suppression Hub**, the one list every
//!   send path consults and the one synced to the transfer-agent host
//! - One agent per (ISP, agent type) that acts through a retrying, circuit-broken executor
//! - Event ingestion (accounting records, abuse reports, unsubscribes, engagement)
//! - Campaign counters, a narrated thought stream and bounded live subscriptions
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sendguard_core::{Engine, Settings, alerter, db, executor};
//!
//! let settings = Settings::default();
//! let pool = db::connect("sendguard.db").await?;
//! let engine = Engine::open(
//!     settings.clone(),
//!     pool,
//!     executor::from_settings(&settings.executor, true),
//!     alerter::from_settings(&settings.alerter),
//! )
//! .await?;
//!
//! let running = engine.start()?;
//! assert!(engine.hub.check_send("someone@example.com"));
//! running.stop().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod alerter;
pub mod broadcast;
pub mod context;
pub mod convictions;
pub mod db;
pub mod decisions;
pub mod engine;
mod error;
pub mod executor;
pub mod ingest;
pub mod isp;
pub mod memory;
pub mod orchestrator;
pub mod rules;
pub mod settings;
pub mod signals;
pub mod suppression;
mod sync;
pub mod thoughts;
pub mod tracker;

pub use engine::{Engine, Running};
pub use error::{Error, Result};
pub use isp::{AgentKey, AgentStatus, AgentType, Isp};
pub use settings::Settings;
