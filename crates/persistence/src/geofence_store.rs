//! Typed geofence catalog store.

use std::sync::Arc;

use domain::models::Geofence;

use crate::blob::{BlobStore, StoreError};

/// Key under which the geofence catalog is persisted.
pub const GEOFENCES_KEY: &str = "geofence-visualizer-geofences";

/// Loads and saves the geofence catalog as a JSON array.
#[derive(Clone)]
pub struct GeofenceStore {
    blobs: Arc<dyn BlobStore>,
}

impl GeofenceStore {
    /// Creates a new GeofenceStore over the given blob store.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Loads the persisted catalog; an absent key yields an empty list.
    pub async fn load(&self) -> Result<Vec<Geofence>, StoreError> {
        match self.blobs.load(GEOFENCES_KEY).await? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the persisted catalog.
    pub async fn save(&self, geofences: &[Geofence]) -> Result<(), StoreError> {
        let blob = serde_json::to_string(geofences)?;
        self.blobs.save(GEOFENCES_KEY, &blob).await?;
        tracing::debug!(count = geofences.len(), "Geofence catalog persisted");
        Ok(())
    }
}
