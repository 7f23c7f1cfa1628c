//! Event and participant notifications pushed by the EventPing application.
//!
//! Every write lands in the snapshot store first, then the matching
//! [`ReminderService`](eventping_scheduler::ReminderService) notification
//! replans the affected reminders.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use eventping_core::{Event, EventState, Participant};
use eventping_scheduler::{EventStore, ReplanSummary};
use serde::Serialize;
use tracing::info;

use super::{ApiError, ApiResult};
use crate::app::AppState;

/// PUT /events/{event_id}
///
/// Creates or replaces the event. Publication, edits and cancellation all
/// arrive here; the event's `state` decides which notification fires.
pub async fn put_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Json(event): Json<Event>,
) -> ApiResult<ReplanSummary> {
    if event.id != event_id {
        return Err(ApiError::bad_request(format!(
            "body id '{}' does not match path id '{event_id}'",
            event.id
        )));
    }
    let created = state.store.upsert_event(&event)?;
    let summary = match event.state {
        EventState::Cancelled => state.service.on_event_cancelled(&event).await?,
        EventState::Published if created => state.service.on_event_published(&event).await?,
        _ => state.service.on_event_updated(&event).await?,
    };
    info!(%event_id, state = %event.state, created, "event received");
    Ok(Json(summary))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub skipped: usize,
}

/// DELETE /events/{event_id}
pub async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<DeleteResponse> {
    let deleted = state.store.delete_event(&event_id)?;
    let skipped = state.service.on_event_deleted(&event_id).await?;
    info!(%event_id, deleted, skipped, "event deleted");
    Ok(Json(DeleteResponse { deleted, skipped }))
}

/// PUT /events/{event_id}/participants/{participant_id}
///
/// Registration or a contact/custom-field change. A body with
/// `unsubscribed: true` is treated like the unsubscribe call.
pub async fn put_participant(
    State(state): State<Arc<AppState>>,
    Path((event_id, participant_id)): Path<(String, String)>,
    Json(participant): Json<Participant>,
) -> ApiResult<ReplanSummary> {
    if participant.event_id != event_id || participant.id != participant_id {
        return Err(ApiError::bad_request(
            "body eventId/id do not match the request path",
        ));
    }
    if state.store.get_event(&event_id).await?.is_none() {
        return Err(ApiError::event_not_found(&event_id));
    }
    state.store.upsert_participant(&participant)?;

    if participant.unsubscribed {
        let skipped = state.service.on_participant_unsubscribed(&participant).await?;
        return Ok(Json(ReplanSummary {
            skipped,
            ..Default::default()
        }));
    }
    Ok(Json(state.service.on_participant_joined(&participant).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    pub skipped: usize,
}

/// POST /events/{event_id}/participants/{participant_id}/unsubscribe
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path((event_id, participant_id)): Path<(String, String)>,
) -> ApiResult<UnsubscribeResponse> {
    let mut participant = state
        .store
        .get_participant(&event_id, &participant_id)
        .await?
        .ok_or_else(|| ApiError::participant_not_found(&participant_id))?;
    participant.unsubscribed = true;
    state.store.upsert_participant(&participant)?;
    let skipped = state.service.on_participant_unsubscribed(&participant).await?;
    Ok(Json(UnsubscribeResponse { skipped }))
}
