use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use eventping_channels::ChannelManager;
use eventping_core::config::EventPingConfig;
use eventping_scheduler::ReminderService;

use crate::http;
use crate::store::SqliteEventStore;

/// Central shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub config: EventPingConfig,
    pub service: ReminderService,
    /// Snapshot of events and participants; also the engine's store.
    pub store: Arc<SqliteEventStore>,
    pub channels: Arc<ChannelManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: EventPingConfig,
        service: ReminderService,
        store: Arc<SqliteEventStore>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self {
            config,
            service,
            store,
            channels,
            started_at: Instant::now(),
        }
    }
}

/// Assemble the RPC router. Everything but `/health` requires the bearer
/// token when one is configured.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/events/{event_id}",
            put(http::events::put_event).delete(http::events::delete_event),
        )
        .route(
            "/events/{event_id}/participants/{participant_id}",
            put(http::events::put_participant),
        )
        .route(
            "/events/{event_id}/participants/{participant_id}/unsubscribe",
            post(http::events::unsubscribe),
        )
        .route(
            "/events/{event_id}/deliveries",
            get(http::deliveries::list_deliveries),
        )
        .route(
            "/events/{event_id}/cancel-reminders",
            post(http::deliveries::cancel_reminders),
        )
        .route(
            "/events/{event_id}/resume-reminders",
            post(http::deliveries::resume_reminders),
        )
        .route("/deliveries/resolve", post(http::deliveries::resolve))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            http::require_token,
        ))
        .route("/health", get(http::health::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
