//! Agent state, operator interventions and the decision log.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use sendguard_core::decisions::{ActionTaken, Decision, DecisionFilter};
use sendguard_core::orchestrator::AgentState;
use serde::Deserialize;

use super::{parse_isp, parse_key};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Every agent.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentState>> {
    Json(state.engine.orchestrator.get_agent_states())
}

/// Agents of one ISP.
pub async fn list_isp_agents(
    State(state): State<AppState>,
    Path(isp): Path<String>,
) -> ApiResult<Json<Vec<AgentState>>> {
    let isp = parse_isp(&isp)?;
    Ok(Json(state.engine.orchestrator.get_isp_agent_states(isp)))
}

/// Optional body of a pause request.
#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    /// Shown in the agent's state and thought stream.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Freezes an agent.
pub async fn pause_agent(
    State(state): State<AppState>,
    Path((isp, agent)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<AgentState>> {
    let key = parse_key(&isp, &agent)?;
    let reason = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<PauseRequest>(&body)
            .map_err(|e| ApiError::bad_request(e.to_string()))?
            .reason
    };
    let agent = state.engine.orchestrator.pause_agent(key, reason).await?;
    Ok(Json(agent))
}

/// Unfreezes an agent.
pub async fn resume_agent(
    State(state): State<AppState>,
    Path((isp, agent)): Path<(String, String)>,
) -> ApiResult<Json<AgentState>> {
    let key = parse_key(&isp, &agent)?;
    Ok(Json(state.engine.orchestrator.resume_agent(key).await?))
}

/// Body of an override request.
#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    /// Action to issue, tagged by `action`.
    #[serde(flatten)]
    pub action: ActionTaken,
    /// Why the operator issued it.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Issues an action on an agent's behalf.
pub async fn override_action(
    State(state): State<AppState>,
    Path((isp, agent)): Path<(String, String)>,
    Json(request): Json<OverrideRequest>,
) -> ApiResult<Json<Decision>> {
    let key = parse_key(&isp, &agent)?;
    let reason = request
        .reason
        .unwrap_or_else(|| "operator override".to_string());
    let decision = state
        .engine
        .orchestrator
        .override_action(key, request.action, reason)
        .await?;
    Ok(Json(decision))
}

/// Decisions matching the query, newest first.
pub async fn list_decisions(
    State(state): State<AppState>,
    Query(filter): Query<DecisionFilter>,
) -> Json<Vec<Decision>> {
    Json(state.engine.orchestrator.get_decisions(&filter))
}

/// Query of the recent-decisions endpoint.
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Maximum results.
    #[serde(default = "default_recent")]
    pub limit: usize,
}

const fn default_recent() -> usize {
    50
}

/// Latest decisions, newest first.
pub async fn recent_decisions(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<Decision>> {
    Json(state.engine.orchestrator.get_recent_decisions(query.limit))
}
