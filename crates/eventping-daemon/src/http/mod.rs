pub mod deliveries;
pub mod events;
pub mod health;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use eventping_core::{EventPingError, StoreError};
use eventping_scheduler::SchedulerError;
use serde_json::json;
use tracing::{error, warn};

use crate::app::AppState;

/// Error returned by RPC handlers: an HTTP status plus the domain error whose
/// `code()` clients match on.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: EventPingError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: EventPingError) -> Self {
        Self { status, error }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            EventPingError::InvalidRequest(reason.into()),
        )
    }

    pub fn event_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            EventPingError::EventNotFound { id: id.to_string() },
        )
    }

    pub fn participant_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            EventPingError::ParticipantNotFound { id: id.to_string() },
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.error.code(), error = %self.error, "request failed");
        }
        let body = json!({
            "error": self.error.to_string(),
            "code": self.error.code(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, EventPingError::Store(e))
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::EventNotFound { id } => Self::event_not_found(&id),
            SchedulerError::NotUnknown { .. } => Self::new(
                StatusCode::CONFLICT,
                EventPingError::InvalidRequest(e.to_string()),
            ),
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Database(e) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                EventPingError::Database(e.to_string()),
            ),
        }
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Reject requests without the configured bearer token. With no token
/// configured every request passes.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.daemon.api_token.as_deref() else {
        return next.run(request).await;
    };
    if extract_bearer(request.headers()) == Some(expected) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "rejected request with missing or wrong token");
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        EventPingError::AuthFailed("set 'Authorization: Bearer <token>'".to_string()),
    )
    .into_response()
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
