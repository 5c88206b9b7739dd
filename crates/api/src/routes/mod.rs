//! HTTP and WebSocket route handlers.

pub mod geofences;
pub mod health;
pub mod public_config;
pub mod snapshot;
pub mod ws;
