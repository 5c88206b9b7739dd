//! Shared utilities and common types for the geofence relay.
//!
//! This crate provides common functionality used across all other crates:
//! - Coordinate and style validation
//! - ISO-8601 timestamp helpers

pub mod time;
pub mod validation;
