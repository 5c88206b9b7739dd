//! Domain services for the geofence relay.
//!
//! Services contain the logic that operates on domain models: normalizing raw broker
//! payloads, reconciling viewer state, and fitting the map viewport.

pub mod normalizer;
pub mod reconciler;
pub mod viewport;

pub use normalizer::{normalize, NormalizeError, NormalizedRecord, TopicKind};

pub use reconciler::{ReconcileError, SeedData, ViewerSnapshot, ViewerState};

pub use viewport::{compute_viewport, zoom_for_span, Viewport};
