//! Delivery ledger queries and operator actions.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use eventping_core::ReminderIdentity;
use eventping_scheduler::{DeliveryRecord, ReplanSummary, Resolution};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ApiResult;
use crate::app::AppState;

/// GET /events/{event_id}/deliveries
pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<DeliveryRecord>> {
    Ok(Json(state.service.get_delivery_status(&event_id)?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub skipped: usize,
}

/// POST /events/{event_id}/cancel-reminders
pub async fn cancel_reminders(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<CancelResponse> {
    let skipped = state.service.cancel_reminders_for(&event_id).await?;
    Ok(Json(CancelResponse { skipped }))
}

/// POST /events/{event_id}/resume-reminders
///
/// Undo an operator cancel: the event is replanned from the snapshot.
pub async fn resume_reminders(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<ReplanSummary> {
    Ok(Json(state.service.resume_reminders_for(&event_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    #[serde(flatten)]
    pub identity: ReminderIdentity,
    pub resolution: Resolution,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub ok: bool,
}

/// POST /deliveries/resolve
///
/// Operator decision for an `unknown` delivery: `mark_sent` after
/// confirming with the provider, `retry` to send it again.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<ResolveResponse> {
    state
        .service
        .resolve_unknown(&req.identity, req.resolution)
        .await?;
    info!(identity = %req.identity, resolution = ?req.resolution, "unknown delivery resolved");
    Ok(Json(ResolveResponse { ok: true }))
}
