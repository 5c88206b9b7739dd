//! Domain models for the geofence relay.

pub mod badge;
pub mod geofence;
pub mod geofence_event;
pub mod message;
pub mod notification;

pub use badge::{Badge, BadgeUpdate, HistoryPoint, TestBadgeUpdate};
pub use geofence::{Geofence, GeofenceGeometry, ImportMode, PolygonGeometry};
pub use geofence_event::{Detect, GeofenceEvent};
pub use message::{ClientMessage, PublishBadgeLocation, ServerMessage};
pub use notification::{Notification, NotificationKind, Popup};
