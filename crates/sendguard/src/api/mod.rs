//! HTTP API: dashboards, operator controls, webhooks and live streams.

pub mod error;
pub mod handlers;
pub mod state;

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
pub use state::AppState;

/// Builds the router.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/overview", get(handlers::overview))
        // Agents and decisions
        .route("/agents", get(handlers::list_agents))
        .route("/isps/{isp}/dashboard", get(handlers::isp_dashboard))
        .route("/isps/{isp}/agents", get(handlers::list_isp_agents))
        .route("/isps/{isp}/agents/{agent}/pause", post(handlers::pause_agent))
        .route("/isps/{isp}/agents/{agent}/resume", post(handlers::resume_agent))
        .route(
            "/isps/{isp}/agents/{agent}/override",
            post(handlers::override_action),
        )
        .route("/decisions", get(handlers::list_decisions))
        .route("/decisions/recent", get(handlers::recent_decisions))
        // Precedent memory
        .route(
            "/convictions",
            get(handlers::list_convictions).post(handlers::teach_conviction),
        )
        .route("/convictions/stats", get(handlers::conviction_stats))
        .route("/convictions/velocity", get(handlers::conviction_velocity))
        // Per-ISP suppression
        .route(
            "/isps/{isp}/suppressions",
            get(handlers::list_isp_suppressions),
        )
        .route(
            "/isps/{isp}/suppressions/stats",
            get(handlers::isp_suppression_stats),
        )
        .route(
            "/isps/{isp}/suppressions/export.csv",
            get(handlers::export_isp_suppressions),
        )
        .route(
            "/isps/{isp}/suppressions/import",
            post(handlers::import_isp_suppressions),
        )
        .route(
            "/isps/{isp}/suppressions/{email}",
            delete(handlers::remove_isp_suppression),
        )
        // Rules and thresholds
        .route(
            "/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/rules/{id}",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route(
            "/isps/{isp}/config",
            get(handlers::get_isp_config).put(handlers::update_isp_config),
        )
        // Global suppression
        .route(
            "/suppressions/global",
            get(handlers::list_global_suppressions).post(handlers::add_global_suppression),
        )
        .route(
            "/suppressions/global/stats",
            get(handlers::global_suppression_stats),
        )
        .route(
            "/suppressions/global/export.csv",
            get(handlers::export_global_suppressions),
        )
        .route(
            "/suppressions/global/check/{email}",
            get(handlers::check_global_suppression),
        )
        .route(
            "/suppressions/global/{email}",
            delete(handlers::remove_global_suppression),
        )
        // Campaigns and narration
        .route("/campaigns", get(handlers::list_campaigns))
        .route("/campaigns/{id}", get(handlers::get_campaign))
        .route("/thoughts", get(handlers::list_thoughts))
        // Live streams
        .route("/stream/convictions", get(handlers::stream_convictions))
        .route("/stream/campaigns", get(handlers::stream_campaigns))
        .route("/stream/thoughts", get(handlers::stream_thoughts));

    let webhooks = Router::new()
        .route("/accounting", post(handlers::accounting_webhook))
        .route("/arf", post(handlers::arf_webhook))
        .route("/unsubscribe", post(handlers::unsubscribe_webhook))
        .route("/engagement", post(handlers::engagement_webhook));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .nest("/webhooks", webhooks)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs.max(1),
        )))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
