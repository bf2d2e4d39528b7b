//! API request handlers.

mod agents;
mod campaigns;
mod convictions;
mod health;
mod rules;
mod streams;
mod suppressions;
mod webhooks;

pub use agents::*;
pub use campaigns::*;
pub use convictions::*;
pub use health::*;
pub use rules::*;
pub use streams::*;
pub use suppressions::*;
pub use webhooks::*;

use sendguard_core::{AgentKey, AgentType, Isp};

use super::error::{ApiError, ApiResult};

/// Parses an ISP path segment.
fn parse_isp(isp: &str) -> ApiResult<Isp> {
    Isp::parse(isp).map_err(|_| ApiError::not_found(format!("unknown ISP: {isp}")))
}

/// Parses ISP and agent-type path segments.
fn parse_key(isp: &str, agent: &str) -> ApiResult<AgentKey> {
    let isp = parse_isp(isp)?;
    let agent_type = AgentType::parse(agent)
        .map_err(|_| ApiError::not_found(format!("unknown agent: {agent}")))?;
    Ok(AgentKey::new(isp, agent_type))
}

const fn default_limit() -> u32 {
    100
}

const MAX_PAGE: u32 = 1_000;
