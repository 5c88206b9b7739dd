//! Viewer wire protocol.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::badge::{BadgeUpdate, TestBadgeUpdate};
use super::geofence::Geofence;
use super::geofence_event::GeofenceEvent;

/// Frames sent from the relay to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    BadgeUpdate(BadgeUpdate),
    GeofenceEvent(GeofenceEvent),
    GeofenceData(Geofence),
    PublishSuccess(PublishAck),
    PublishError(PublishErrorBody),
}

impl ServerMessage {
    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::BadgeUpdate(_) => "badge_update",
            ServerMessage::GeofenceEvent(_) => "geofence_event",
            ServerMessage::GeofenceData(_) => "geofence_data",
            ServerMessage::PublishSuccess(_) => "publish_success",
            ServerMessage::PublishError(_) => "publish_error",
        }
    }

    pub fn publish_error(error: impl Into<String>) -> Self {
        ServerMessage::PublishError(PublishErrorBody {
            error: error.into(),
        })
    }
}

/// Frames sent from viewers to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    TestBadgeUpdate(TestBadgeUpdate),
    PublishBadgeLocation(PublishBadgeLocation),
    RequestGeofences,
}

/// Request to republish a badge position to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PublishBadgeLocation {
    #[serde(default)]
    pub mac: Option<String>,

    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    #[serde(default)]
    pub latitude: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    #[serde(default)]
    pub longitude: Option<f64>,

    #[validate(range(min = 0.0, message = "Radius must be non-negative"))]
    #[serde(default)]
    pub radius: Option<f64>,
}

impl PublishBadgeLocation {
    /// Returns mac and coordinates when all three are present.
    pub fn required_fields(&self) -> Option<(&str, f64, f64)> {
        let mac = self.mac.as_deref().filter(|m| !m.is_empty())?;
        Some((mac, self.latitude?, self.longitude?))
    }
}

/// Payload published to the broker on the outbound location topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundLocation {
    pub mac: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    pub sent_ts: String,
    pub timestamp: String,
}

/// Topic a badge location is published on.
pub fn location_topic(prefix: &str, mac: &str) -> String {
    format!("{}/assets/{}/location", prefix, mac)
}

/// Successful publish acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishAck {
    pub topic: String,
    pub payload: OutboundLocation,
}

/// Failed publish acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishErrorBody {
    pub error: String,
}
