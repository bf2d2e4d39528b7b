//! Liveness, overview and per-ISP dashboard.

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use sendguard_core::decisions::{Decision, DecisionFilter};
use sendguard_core::orchestrator::{AgentState, IspHealth};
use sendguard_core::rules::IspConfig;
use sendguard_core::signals::{ContextInputs, SignalSnapshot};
use sendguard_core::suppression::SyncReport;
use sendguard_core::{AgentStatus, Isp};
use serde::Serialize;

use super::parse_isp;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// Decisions shown on the overview and dashboards.
const RECENT_DECISIONS: usize = 20;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the daemon answers.
    pub status: &'static str,
    /// Daemon version.
    pub version: &'static str,
    /// Seconds since start.
    pub uptime_secs: i64,
    /// Whether remote commands are currently allowed.
    pub executor_available: bool,
}

/// Liveness check.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        executor_available: state.engine.executor.is_available(),
    })
}

/// Agent counts by status.
#[derive(Debug, Default, Serialize)]
pub struct AgentCounts {
    idle: usize,
    active: usize,
    firing: usize,
    paused: usize,
    degraded: usize,
}

/// Whole-engine summary.
#[derive(Debug, Serialize)]
pub struct Overview {
    agents: AgentCounts,
    isps: Vec<IspHealth>,
    global_suppressions: usize,
    suppression_sync_pending: bool,
    last_suppression_sync: Option<SyncReport>,
    ingest_queue_depth: usize,
    executor_available: bool,
    conviction_velocity_1h: f64,
    recent_decisions: Vec<Decision>,
    generated_at: DateTime<Utc>,
}

/// Summary of every ISP and agent.
pub async fn overview(State(state): State<AppState>) -> Json<Overview> {
    let engine = &state.engine;
    let orchestrator = &engine.orchestrator;
    let agents = AgentCounts {
        idle: orchestrator.count_agents(AgentStatus::Idle),
        active: orchestrator.count_agents(AgentStatus::Active),
        firing: orchestrator.count_agents(AgentStatus::Firing),
        paused: orchestrator.count_agents(AgentStatus::Paused),
        degraded: orchestrator.count_agents(AgentStatus::Degraded),
    };

    Json(Overview {
        agents,
        isps: Isp::ALL
            .into_iter()
            .map(|isp| orchestrator.isp_health(isp))
            .collect(),
        global_suppressions: engine.hub.entry_count(),
        suppression_sync_pending: engine.hub.is_dirty(),
        last_suppression_sync: engine.hub.last_sync(),
        ingest_queue_depth: engine.ingestor.queue_depth(),
        executor_available: engine.executor.is_available(),
        conviction_velocity_1h: engine
            .convictions
            .velocity(None, std::time::Duration::from_secs(3600)),
        recent_decisions: orchestrator.get_recent_decisions(RECENT_DECISIONS),
        generated_at: Utc::now(),
    })
}

/// Everything about one ISP.
#[derive(Debug, Serialize)]
pub struct IspDashboard {
    health: IspHealth,
    signals: SignalSnapshot,
    context: ContextInputs,
    config: IspConfig,
    agents: Vec<AgentState>,
    suppressions: usize,
    recent_decisions: Vec<Decision>,
}

/// Dashboard of one ISP.
pub async fn isp_dashboard(
    State(state): State<AppState>,
    Path(isp): Path<String>,
) -> ApiResult<Json<IspDashboard>> {
    let isp = parse_isp(&isp)?;
    let engine = &state.engine;
    let recent_decisions = engine.orchestrator.get_decisions(&DecisionFilter {
        isp: Some(isp),
        limit: Some(RECENT_DECISIONS),
        ..DecisionFilter::default()
    });

    Ok(Json(IspDashboard {
        health: engine.orchestrator.isp_health(isp),
        signals: engine.signals.snapshot(isp),
        context: engine.signals.context_inputs(isp),
        config: engine.rules.isp_config(isp),
        agents: engine.orchestrator.get_isp_agent_states(isp),
        suppressions: engine.suppressions.entry_count(isp),
        recent_decisions,
    }))
}
