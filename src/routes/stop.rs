//! Server stop endpoint.

use axum::{extract::State, http::StatusCode};
use tracing::info;

use crate::state::AppState;

/// `POST /api/stop` — initiate orderly shutdown.
///
/// The listener stops accepting new calls, in-flight calls are drained (up
/// to the configured grace period), then the process exits. Replies `202
/// Accepted` — the reply is sent before the drain begins, but a caller may
/// see a dropped connection if the grace period expires first.
pub async fn stop(State(state): State<AppState>) -> StatusCode {
    info!("Stop requested via API");
    state.shutdown.trigger();
    StatusCode::ACCEPTED
}
