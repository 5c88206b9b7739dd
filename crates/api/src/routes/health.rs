//! Health check endpoint handler.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;
use crate::broker::ConnectionState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub broker_connected: bool,
    pub broker_state: ConnectionState,
    pub viewers: usize,
    pub timestamp: String,
}

/// Relay health.
///
/// GET /api/health
///
/// Always answers `ok` while the process serves requests; broker connectivity is
/// reported separately and never fails the check.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker_state = state.broker.state();
    // the mirror viewer holds one subscription
    let viewers = state.bus.subscriber_count().saturating_sub(1);

    Json(HealthResponse {
        status: "ok".to_string(),
        broker_connected: broker_state.is_connected(),
        broker_state,
        viewers,
        timestamp: shared::time::now_iso(),
    })
}
