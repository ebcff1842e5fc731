//! Liveness endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/health` — liveness probe.
///
/// Returns status, uptime, version, and the current device count. Suitable
/// for monitoring; reports `stopping` once shutdown has been requested.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.shutdown.is_requested() {
        "stopping"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "devices": state.registry.count().await,
    }))
}
