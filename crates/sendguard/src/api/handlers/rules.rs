//! Operator rules and per-ISP thresholds.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use sendguard_core::rules::{IspConfig, NewRule, Rule};

use super::parse_isp;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Every rule.
pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.engine.rules.list_rules())
}

/// Creates a rule.
pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let rule = state.engine.rules.create_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Replaces a rule.
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(rule): Json<NewRule>,
) -> ApiResult<Json<Rule>> {
    Ok(Json(state.engine.rules.update_rule(id, rule).await?))
}

/// Deletes a rule.
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.engine.rules.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Thresholds of one ISP.
pub async fn get_isp_config(
    State(state): State<AppState>,
    Path(isp): Path<String>,
) -> ApiResult<Json<IspConfig>> {
    let isp = parse_isp(&isp)?;
    Ok(Json(state.engine.rules.isp_config(isp)))
}

/// Replaces the thresholds of one ISP.
pub async fn update_isp_config(
    State(state): State<AppState>,
    Path(isp): Path<String>,
    Json(config): Json<IspConfig>,
) -> ApiResult<Json<IspConfig>> {
    let isp = parse_isp(&isp)?;
    if config.isp != isp {
        return Err(ApiError::bad_request(format!(
            "body is for {}, path is for {isp}",
            config.isp
        )));
    }
    Ok(Json(state.engine.rules.update_isp_config(config).await?))
}
