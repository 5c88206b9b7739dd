//! Message normalization.
//!
//! Turns raw broker payloads into canonical [`BadgeUpdate`] and [`GeofenceEvent`]
//! records. Producers disagree on field names, so every canonical field is resolved
//! from an ordered alias list where the first non-null, non-empty match wins.
//!
//! Normalization is pure: the arrival instant is passed in, so the same input always
//! yields the same record.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::badge::{BadgeMetadata, BadgeUpdate};
use crate::models::geofence_event::{Detect, GeofenceEvent};
use crate::models::message::ServerMessage;

/// Badge identifier aliases; the topic segment is the final fallback.
pub const MAC_FIELDS: &[&str] = &["mac", "id", "device_id"];
pub const LATITUDE_FIELDS: &[&str] = &["latitude", "lat"];
pub const LONGITUDE_FIELDS: &[&str] = &["longitude", "lon"];
pub const RADIUS_FIELDS: &[&str] = &["radius"];
pub const BADGE_TIMESTAMP_FIELDS: &[&str] = &["sent_ts", "receive_ts", "timestamp"];

/// Event badge id aliases; the topic segment is the final fallback.
pub const EVENT_ID_FIELDS: &[&str] = &["id", "mac"];
pub const DETECT_FIELDS: &[&str] = &["detect", "type"];
/// Hook aliases; the topic itself is the final fallback.
pub const HOOK_FIELDS: &[&str] = &["hook"];
pub const EVENT_TIMESTAMP_FIELDS: &[&str] = &["time", "timestamp"];

/// Fields an event carries canonically; everything else passes through as extra.
const EVENT_CANONICAL_FIELDS: &[&str] = &["id", "detect", "hook", "timestamp"];

/// Which normalization path a topic takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Location,
    GeofenceEvent,
}

impl TopicKind {
    /// Classifies a topic. Location takes precedence over geofence.
    pub fn classify(topic: &str) -> Option<Self> {
        if topic.contains("location") {
            Some(TopicKind::Location)
        } else if topic.contains("geofence") {
            Some(TopicKind::GeofenceEvent)
        } else {
            None
        }
    }
}

/// A canonical record ready for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Badge(BadgeUpdate),
    Event(GeofenceEvent),
}

impl NormalizedRecord {
    pub fn into_message(self) -> ServerMessage {
        match self {
            NormalizedRecord::Badge(update) => ServerMessage::BadgeUpdate(update),
            NormalizedRecord::Event(event) => ServerMessage::GeofenceEvent(event),
        }
    }
}

/// Reasons a raw message is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing badge identifier")]
    MissingMac,

    #[error("Missing or non-numeric coordinates")]
    MissingCoordinates,

    #[error("Unroutable topic: {0}")]
    UnroutableTopic(String),
}

/// Normalizes one raw broker message.
pub fn normalize(
    topic: &str,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let kind = TopicKind::classify(topic)
        .ok_or_else(|| NormalizeError::UnroutableTopic(topic.to_string()))?;

    let value: Value =
        serde_json::from_slice(payload).map_err(|e| NormalizeError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(NormalizeError::Malformed(
            "payload is not a JSON object".to_string(),
        ));
    };

    match kind {
        TopicKind::Location => {
            normalize_location(topic, &fields, received_at).map(NormalizedRecord::Badge)
        }
        TopicKind::GeofenceEvent => Ok(NormalizedRecord::Event(normalize_event(
            topic,
            fields,
            received_at,
        ))),
    }
}

fn normalize_location(
    topic: &str,
    fields: &Map<String, Value>,
    received_at: DateTime<Utc>,
) -> Result<BadgeUpdate, NormalizeError> {
    let mac = first_string(fields, MAC_FIELDS)
        .or_else(|| topic_mac(topic))
        .ok_or(NormalizeError::MissingMac)?;

    let latitude =
        first_number(fields, LATITUDE_FIELDS).ok_or(NormalizeError::MissingCoordinates)?;
    let longitude =
        first_number(fields, LONGITUDE_FIELDS).ok_or(NormalizeError::MissingCoordinates)?;

    let timestamp = first_string(fields, BADGE_TIMESTAMP_FIELDS)
        .unwrap_or_else(|| shared::time::iso_timestamp(received_at));

    Ok(BadgeUpdate {
        mac,
        latitude,
        longitude,
        radius: first_number(fields, RADIUS_FIELDS),
        timestamp,
        metadata: BadgeMetadata {
            device_id: first_string(fields, &["device_id"]),
            location_id: first_present(fields, &["location_id"]).cloned(),
            floor: first_present(fields, &["floor"]).cloned(),
            confidence: first_present(fields, &["confidence"]).cloned(),
            map_view: first_present(fields, &["map_view"]).cloned(),
            gateways: first_present(fields, &["gateways"])
                .and_then(Value::as_array)
                .cloned(),
        },
    })
}

fn normalize_event(
    topic: &str,
    fields: Map<String, Value>,
    received_at: DateTime<Utc>,
) -> GeofenceEvent {
    let id = first_string(&fields, EVENT_ID_FIELDS).or_else(|| topic_mac(topic));
    let detect = first_string(&fields, DETECT_FIELDS).map(Detect::from);
    let hook = first_string(&fields, HOOK_FIELDS).unwrap_or_else(|| topic.to_string());
    let timestamp = first_string(&fields, EVENT_TIMESTAMP_FIELDS)
        .unwrap_or_else(|| shared::time::iso_timestamp(received_at));

    let extra = fields
        .into_iter()
        .filter(|(key, _)| !EVENT_CANONICAL_FIELDS.contains(&key.as_str()))
        .collect();

    GeofenceEvent {
        id,
        detect,
        hook,
        timestamp,
        extra,
    }
}

/// Second-to-last topic segment, for topics with at least three segments.
///
/// `old/assets/{mac}/location` yields `{mac}`; `geofence/{x}` yields nothing.
pub fn topic_mac(topic: &str) -> Option<String> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() > 2 {
        let candidate = segments[segments.len() - 2];
        if !candidate.is_empty() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// First alias holding a non-null, non-empty value.
fn first_present<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

/// First alias as a string; numbers are stringified, other types skipped.
fn first_string(fields: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// The first present alias, which must be numeric.
fn first_number(fields: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    first_present(fields, aliases).and_then(Value::as_f64)
}
