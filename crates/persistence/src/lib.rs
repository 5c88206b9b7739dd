//! Persistence layer for the geofence relay.
//!
//! This crate contains:
//! - The key/value blob store abstraction with in-memory and file-backed implementations
//! - The typed geofence catalog store layered on top of it
//! - Store operation metrics

pub mod blob;
pub mod geofence_store;
pub mod metrics;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore, StoreError};
pub use geofence_store::{GeofenceStore, GEOFENCES_KEY};
