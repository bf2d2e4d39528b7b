//! Campaign counters and the thought log.

use axum::Json;
use axum::extract::{Path, Query, State};
use sendguard_core::thoughts::Thought;
use sendguard_core::tracker::CampaignStats;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Every campaign, most recently active first.
pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<CampaignStats>> {
    Json(state.engine.tracker.list())
}

/// One campaign.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignStats>> {
    state
        .engine
        .tracker
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("campaign {id}")))
}

/// Query of the thought log.
#[derive(Debug, Deserialize)]
pub struct ThoughtQuery {
    /// Maximum results.
    #[serde(default = "default_thoughts")]
    pub limit: usize,
}

const fn default_thoughts() -> usize {
    100
}

/// Latest thoughts, oldest first.
pub async fn list_thoughts(
    State(state): State<AppState>,
    Query(query): Query<ThoughtQuery>,
) -> Json<Vec<Thought>> {
    Json(state.engine.thoughts.recent(query.limit))
}
