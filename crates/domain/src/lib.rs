//! Domain layer for the geofence relay.
//!
//! This crate contains:
//! - Domain models (Badge, Geofence, GeofenceEvent, Notification, wire messages)
//! - Message normalization of raw broker payloads
//! - The viewer-side state reconciler
//! - Viewport geometry

pub mod models;
pub mod services;
