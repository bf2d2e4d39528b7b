//! Inbound event webhooks.
//!
//! Every webhook only parses and queues; consumers run on the ingest worker.
//! Accepted events answer `202 Accepted`, a full queue answers `503` so the
//! sender retries.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use chrono::Utc;
use sendguard_core::ingest::{IngestReport, ONE_CLICK_BODY, UnsubscribeRequest};
use sendguard_core::tracker::EngagementEvent;
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Header carrying the shared webhook secret.
pub const SECRET_HEADER: &str = "x-webhook-secret";

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(secret) = &state.webhook_secret else {
        return Ok(());
    };
    let presented = headers
        .get(SECRET_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();
    if bool::from(presented.ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Webhook rejected: bad secret");
        Err(ApiError::unauthorized())
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

fn accepted(body: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(body))
}

/// Accounting records as CSV lines, or as a JSON object or array.
pub async fn accounting_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<IngestReport>)> {
    authorize(&state, &headers)?;
    let ingestor = &state.engine.ingestor;
    let report = if is_json(&headers) {
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON: {e}")))?;
        ingestor.submit_accounting_json(&value)?
    } else {
        ingestor.submit_accounting_csv(&body)?
    };
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// An abuse or feedback-loop report as a raw message.
pub async fn arf_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    state.engine.ingestor.submit_arf(&body)?;
    Ok(accepted(json!({ "accepted": 1 })))
}

/// Query of a one-click unsubscribe post.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnsubscribeQuery {
    /// Recipient.
    pub email: Option<String>,
    /// Campaign.
    pub campaign_id: Option<String>,
}

/// An unsubscribe, either as JSON or as a one-click post with the
/// recipient in the query string.
pub async fn unsubscribe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UnsubscribeQuery>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let request = if body.trim() == ONE_CLICK_BODY {
        let email = query
            .email
            .ok_or_else(|| ApiError::bad_request("one-click unsubscribe needs ?email="))?;
        UnsubscribeRequest {
            email,
            campaign_id: query.campaign_id,
            one_click: true,
            received_at: Utc::now(),
        }
    } else {
        serde_json::from_str(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid unsubscribe: {e}")))?
    };
    state.engine.ingestor.submit_unsubscribe(request)?;
    Ok(accepted(json!({ "accepted": 1 })))
}

/// An open or click.
pub async fn engagement_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let event: EngagementEvent = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid engagement: {e}")))?;
    state.engine.ingestor.submit_engagement(event)?;
    Ok(accepted(json!({ "accepted": 1 })))
}
