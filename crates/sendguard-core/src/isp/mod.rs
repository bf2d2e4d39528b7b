//! Destination providers and the governance concerns tracked for each.

mod model;

pub use model::{AgentKey, AgentStatus, AgentType, Isp};
