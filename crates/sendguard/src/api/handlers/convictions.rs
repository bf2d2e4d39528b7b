//! Precedent memory: listing, statistics and operator-taught verdicts.

use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use sendguard_core::context::MicroContext;
use sendguard_core::convictions::{Conviction, Verdict};
use sendguard_core::{AgentKey, AgentType, Isp};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;

/// Query of the conviction listing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConvictionQuery {
    /// Only this provider.
    pub isp: Option<Isp>,
    /// Only this agent type.
    pub agent_type: Option<AgentType>,
    /// Only this verdict.
    pub verdict: Option<Verdict>,
    /// Maximum results.
    pub limit: Option<usize>,
}

impl ConvictionQuery {
    fn keys(&self) -> impl Iterator<Item = AgentKey> + '_ {
        AgentKey::all().filter(|key| {
            self.isp.is_none_or(|isp| key.isp == isp)
                && self.agent_type.is_none_or(|t| key.agent_type == t)
        })
    }
}

/// Convictions matching the query, newest first.
pub async fn list_convictions(
    State(state): State<AppState>,
    Query(query): Query<ConvictionQuery>,
) -> Json<Vec<Conviction>> {
    let store = &state.engine.convictions;
    let mut convictions: Vec<Conviction> = query
        .keys()
        .flat_map(|key| match query.verdict {
            Some(verdict) => store.recall_by_verdict(key.isp, key.agent_type, verdict),
            None => store.recall_recent(key.isp, key.agent_type, None),
        })
        .collect();
    convictions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    convictions.truncate(query.limit.unwrap_or(100));
    Json(convictions)
}

/// Verdict counts of one agent.
#[derive(Debug, Serialize)]
pub struct AgentConvictionStats {
    isp: Isp,
    agent_type: AgentType,
    will: usize,
    wont: usize,
    total: usize,
}

/// Verdict counts of every agent matching the query.
pub async fn conviction_stats(
    State(state): State<AppState>,
    Query(query): Query<ConvictionQuery>,
) -> Json<Vec<AgentConvictionStats>> {
    let store = &state.engine.convictions;
    Json(
        query
            .keys()
            .map(|key| {
                let stats = store.stats(key.isp, key.agent_type);
                AgentConvictionStats {
                    isp: key.isp,
                    agent_type: key.agent_type,
                    will: stats.will,
                    wont: stats.wont,
                    total: stats.total(),
                }
            })
            .collect(),
    )
}

/// Query of the velocity endpoint.
#[derive(Debug, Deserialize)]
pub struct VelocityQuery {
    /// Only this provider.
    #[serde(default)]
    pub isp: Option<Isp>,
    /// Trailing window.
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

const fn default_window() -> u64 {
    3600
}

/// Learning rate.
#[derive(Debug, Serialize)]
pub struct Velocity {
    isp: Option<Isp>,
    window_secs: u64,
    per_hour: f64,
}

/// Convictions recorded per hour.
pub async fn conviction_velocity(
    State(state): State<AppState>,
    Query(query): Query<VelocityQuery>,
) -> Json<Velocity> {
    let window = Duration::from_secs(query.window_secs.max(1));
    Json(Velocity {
        isp: query.isp,
        window_secs: window.as_secs(),
        per_hour: state.engine.convictions.velocity(query.isp, window),
    })
}

/// A verdict taught by an operator.
#[derive(Debug, Deserialize)]
pub struct TeachRequest {
    /// Provider.
    pub isp: Isp,
    /// Agent type.
    pub agent_type: AgentType,
    /// Verdict.
    pub verdict: Verdict,
    /// Explanation kept with the precedent.
    #[serde(default)]
    pub note: Option<String>,
    /// Situation the verdict applies to; defaults to the current one.
    #[serde(default)]
    pub context: Option<MicroContext>,
}

/// Records an operator-taught verdict.
pub async fn teach_conviction(
    State(state): State<AppState>,
    Json(request): Json<TeachRequest>,
) -> (StatusCode, Json<Conviction>) {
    let conviction = state.engine.orchestrator.teach(
        AgentKey::new(request.isp, request.agent_type),
        request.verdict,
        request.note,
        request.context,
    );
    (StatusCode::CREATED, Json(conviction))
}
