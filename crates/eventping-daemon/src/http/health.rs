use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health: liveness probe with channel and queue state.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels: BTreeMap<String, _> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(kind, status)| (kind.to_string(), status))
        .collect();

    // the ledger being unreachable degrades the probe but must not fail it
    let deliveries: Option<BTreeMap<String, u64>> = state
        .service
        .recorder()
        .status_counts()
        .ok()
        .map(|counts| counts.into_iter().map(|(s, n)| (s.to_string(), n)).collect());

    Json(json!({
        "status": if deliveries.is_some() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "channels": channels,
        "queueDepth": state.service.queue_depth(),
        "deliveries": deliveries,
    }))
}
