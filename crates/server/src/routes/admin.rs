use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use intake_core::{Estimate, EstimateStatus};
use serde::Deserialize;
use tracing::info;

use super::{reject, require_admin, ADMIN_ACTOR};
use crate::error::{new_correlation_id, HttpError};
use crate::services::intake::ConversationView;
use crate::services::requests::{ApprovalOutcome, SendOutcome};
use crate::services::DispatchOutcome;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EstimateFilter {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConversationView>, HttpError> {
    let correlation_id = new_correlation_id();
    require_admin(&state, &headers, &correlation_id)?;
    state.intake.get_conversation(&id).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn retry_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DispatchOutcome>, HttpError> {
    let correlation_id = new_correlation_id();
    require_admin(&state, &headers, &correlation_id)?;
    let outcome =
        state.intake.retry_notification(&id).await.map_err(reject(&correlation_id))?;
    info!(
        event_name = "admin.notification.retried",
        correlation_id = %correlation_id,
        conversation_id = %id,
        outcome = ?outcome,
        "notification retry requested"
    );
    Ok(Json(outcome))
}

pub async fn list_estimates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<EstimateFilter>,
) -> Result<Json<Vec<Estimate>>, HttpError> {
    let correlation_id = new_correlation_id();
    require_admin(&state, &headers, &correlation_id)?;

    let status = match filter.status.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(raw) => Some(EstimateStatus::parse(raw).ok_or_else(|| {
            HttpError::bad_request(format!("unknown estimate status `{raw}`"), &correlation_id)
        })?),
        None => None,
    };
    state.requests.list_estimates(status).await.map(Json).map_err(reject(&correlation_id))
}

pub async fn approve_estimate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApprovalOutcome>, HttpError> {
    let correlation_id = new_correlation_id();
    require_admin(&state, &headers, &correlation_id)?;
    state
        .requests
        .approve_estimate(&id, ADMIN_ACTOR)
        .await
        .map(Json)
        .map_err(reject(&correlation_id))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SendOutcome>, HttpError> {
    let correlation_id = new_correlation_id();
    require_admin(&state, &headers, &correlation_id)?;
    state.requests.send_invoice(&id, ADMIN_ACTOR).await.map(Json).map_err(reject(&correlation_id))
}
