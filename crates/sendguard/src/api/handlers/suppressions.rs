//! Per-ISP suppression lists and the global suppression hub.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use sendguard_acct::Address;
use sendguard_core::suppression::{
    ImportReport, Scope, Suppression, SuppressionSource, SuppressionStats,
};
use serde::{Deserialize, Serialize};

use super::{MAX_PAGE, default_limit, parse_isp};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Paging and search over a list.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Substring of the address.
    #[serde(default)]
    pub search: Option<String>,
    /// Page size.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Entries to skip.
    #[serde(default)]
    pub offset: u32,
}

impl ListQuery {
    fn search(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.trim().is_empty())
    }
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// A page of one ISP's list.
pub async fn list_isp_suppressions(
    State(state): State<AppState>,
    Path(isp): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Suppression>>> {
    let isp = parse_isp(&isp)?;
    let entries = state
        .engine
        .suppressions
        .list_by_isp(isp, query.search(), query.limit.min(MAX_PAGE), query.offset)
        .await;
    Ok(Json(entries))
}

/// Summary of one ISP's list.
pub async fn isp_suppression_stats(
    State(state): State<AppState>,
    Path(isp): Path<String>,
) -> ApiResult<Json<SuppressionStats>> {
    let isp = parse_isp(&isp)?;
    Ok(Json(state.engine.suppressions.get_stats(isp).await))
}

/// One ISP's list as CSV.
pub async fn export_isp_suppressions(
    State(state): State<AppState>,
    Path(isp): Path<String>,
) -> ApiResult<Response> {
    let isp = parse_isp(&isp)?;
    let csv = state.engine.suppressions.export_csv(isp).await?;
    Ok(csv_response(&format!("suppressions-{isp}.csv"), csv))
}

/// Imports CSV rows into one ISP's list.
pub async fn import_isp_suppressions(
    State(state): State<AppState>,
    Path(isp): Path<String>,
    body: String,
) -> ApiResult<Json<ImportReport>> {
    let isp = parse_isp(&isp)?;
    Ok(Json(state.engine.suppressions.import_csv(isp, &body).await))
}

/// Removes one address from one ISP's list.
pub async fn remove_isp_suppression(
    State(state): State<AppState>,
    Path((isp, email)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let isp = parse_isp(&isp)?;
    if state.engine.suppressions.remove(isp, &email).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("{email} is not suppressed for {isp}")))
    }
}

/// A page of the global list.
pub async fn list_global_suppressions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Suppression>> {
    Json(
        state
            .engine
            .hub
            .list(query.search(), query.limit.min(MAX_PAGE), query.offset)
            .await,
    )
}

/// Operator addition to the global list.
#[derive(Debug, Deserialize)]
pub struct GlobalSuppressionRequest {
    /// Recipient.
    pub email: String,
    /// Why.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of an addition.
#[derive(Debug, Serialize)]
pub struct SuppressResponse {
    email: String,
    added: bool,
}

/// Adds an address to the global list.
pub async fn add_global_suppression(
    State(state): State<AppState>,
    Json(request): Json<GlobalSuppressionRequest>,
) -> ApiResult<(StatusCode, Json<SuppressResponse>)> {
    let address = Address::new(&request.email)
        .map_err(|e| ApiError::bad_request(format!("invalid address: {e}")))?;
    let entry = Suppression::new(
        address.as_str(),
        Scope::Global,
        SuppressionSource::Operator,
        request.reason.unwrap_or_else(|| "added by operator".to_string()),
    );
    let added = state.engine.hub.suppress(&entry).await?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SuppressResponse {
            email: entry.email,
            added,
        }),
    ))
}

/// Removes an address from the global list.
pub async fn remove_global_suppression(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<StatusCode> {
    if state.engine.hub.remove(&email).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("{email} is not globally suppressed")))
    }
}

/// Send-path verdict for one address.
#[derive(Debug, Serialize)]
pub struct SendCheck {
    email: String,
    allowed: bool,
}

/// Whether mail may be sent to an address.
pub async fn check_global_suppression(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Json<SendCheck> {
    let allowed = state.engine.hub.check_send(&email);
    Json(SendCheck {
        email: email.trim().to_lowercase(),
        allowed,
    })
}

/// The global list as CSV.
pub async fn export_global_suppressions(State(state): State<AppState>) -> ApiResult<Response> {
    let csv = state.engine.hub.export_csv().await?;
    Ok(csv_response("suppressions-global.csv", csv))
}

/// Summary of the global list.
pub async fn global_suppression_stats(State(state): State<AppState>) -> Json<SuppressionStats> {
    Json(state.engine.hub.stats().await)
}
