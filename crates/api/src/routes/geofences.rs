//! Geofence endpoint handlers.
//!
//! Changes go through the mirror viewer (which persists them) and are then
//! broadcast to connected viewers as `geofence_data`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};
use validator::Validate;

use domain::models::geofence::{ImportGeofencesRequest, UpsertGeofenceRequest};
use domain::models::{Geofence, ImportMode, ServerMessage};

use crate::app::AppState;
use crate::error::ApiError;

/// Bulk import result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportGeofencesResponse {
    pub imported: usize,
    pub skipped: usize,
    pub mode: ImportMode,
}

/// Validates a request and converts it, closing line geometries.
fn accept(request: UpsertGeofenceRequest) -> Result<Geofence, ApiError> {
    request.validate()?;
    let geofence = request.into_geofence();
    if geofence.polygon.is_empty() {
        return Err(ApiError::Validation(format!(
            "Geofence {} has no coordinates",
            geofence.name
        )));
    }
    Ok(geofence)
}

/// List stored geofences.
///
/// GET /api/geofences
pub async fn list_geofences(
    State(state): State<AppState>,
) -> Result<Json<Vec<Geofence>>, ApiError> {
    Ok(Json(state.viewer.geofences().await?))
}

/// Create or replace a geofence by name.
///
/// POST /api/geofences
pub async fn upsert_geofence(
    State(state): State<AppState>,
    Json(request): Json<UpsertGeofenceRequest>,
) -> Result<Json<Geofence>, ApiError> {
    let geofence = accept(request)?;

    state.viewer.upsert_geofence(geofence.clone()).await?;
    let receivers = state
        .bus
        .broadcast(ServerMessage::GeofenceData(geofence.clone()));

    info!(name = %geofence.name, receivers, "Geofence upserted");
    Ok(Json(geofence))
}

/// Bulk import geofences, merging by name or replacing the whole set.
///
/// POST /api/geofences/import
pub async fn import_geofences(
    State(state): State<AppState>,
    Json(request): Json<ImportGeofencesRequest>,
) -> Result<Json<ImportGeofencesResponse>, ApiError> {
    let total = request.geofences.len();
    let mode = request.mode;

    let geofences: Vec<Geofence> = request
        .geofences
        .into_iter()
        .filter_map(|g| {
            let name = g.name.clone();
            accept(g)
                .map_err(|e| warn!(name = %name, error = %e, "Skipping geofence in import"))
                .ok()
        })
        .collect();

    if geofences.is_empty() {
        return Err(ApiError::Validation(
            "No valid geofences to import".to_string(),
        ));
    }

    let imported = state
        .viewer
        .import_geofences(geofences.clone(), mode)
        .await?;
    for geofence in geofences {
        state.bus.broadcast(ServerMessage::GeofenceData(geofence));
    }

    info!(imported, total, mode = ?mode, "Geofences imported");
    Ok(Json(ImportGeofencesResponse {
        imported,
        skipped: total - imported,
        mode,
    }))
}

/// Delete a geofence by name.
///
/// DELETE /api/geofences/:name
pub async fn delete_geofence(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.viewer.delete_geofence(&name).await? {
        info!(name = %name, "Geofence deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Geofence not found: {}", name)))
    }
}
