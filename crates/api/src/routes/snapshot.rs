//! Mirror viewer query handlers.

use axum::{extract::State, Json};

use domain::services::reconciler::ViewerSnapshot;
use domain::services::viewport::Viewport;

use crate::app::AppState;
use crate::error::ApiError;

/// Badges, geofences, events and notification history as reconciled by the relay.
///
/// GET /api/snapshot
pub async fn get_snapshot(State(state): State<AppState>) -> Result<Json<ViewerSnapshot>, ApiError> {
    Ok(Json(state.viewer.snapshot().await?))
}

/// Map viewport fitting every known geofence.
///
/// GET /api/viewport
pub async fn get_viewport(State(state): State<AppState>) -> Result<Json<Viewport>, ApiError> {
    state
        .viewer
        .viewport()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No geofences to fit".to_string()))
}
