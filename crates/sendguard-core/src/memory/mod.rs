//! Durable blob store.
//!
//! A namespaced key/value table for records the engine persists in bulk:
//! convictions, decisions, operator pauses, and ingest cursors.

mod repository;

pub use repository::MemoryStore;
