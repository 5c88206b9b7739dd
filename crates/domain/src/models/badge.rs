//! Badge domain model.
//!
//! A badge is a tracked asset keyed by its MAC/device identifier. The relay emits
//! [`BadgeUpdate`] records; each viewer folds them into a [`Badge`] with a bounded
//! position history and a per-hook geofence status map.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::geofence_event::GeofenceEvent;

/// Maximum number of positions retained per badge.
pub const HISTORY_CAPACITY: usize = 50;

/// Optional metadata carried through from location payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BadgeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_view: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateways: Option<Vec<Value>>,
}

impl BadgeMetadata {
    /// Overwrites fields for which `incoming` carries a value.
    pub fn merge(&mut self, incoming: &BadgeMetadata) {
        if incoming.device_id.is_some() {
            self.device_id = incoming.device_id.clone();
        }
        if incoming.location_id.is_some() {
            self.location_id = incoming.location_id.clone();
        }
        if incoming.floor.is_some() {
            self.floor = incoming.floor.clone();
        }
        if incoming.confidence.is_some() {
            self.confidence = incoming.confidence.clone();
        }
        if incoming.map_view.is_some() {
            self.map_view = incoming.map_view.clone();
        }
        if incoming.gateways.is_some() {
            self.gateways = incoming.gateways.clone();
        }
    }
}

/// Canonical location record broadcast as `badge_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeUpdate {
    pub mac: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in feet.
    #[serde(default)]
    pub radius: Option<f64>,
    pub timestamp: String,
    #[serde(flatten)]
    pub metadata: BadgeMetadata,
}

/// One entry of a badge's position trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub lat: f64,
    pub lon: f64,
    pub time: String,
}

/// Viewer-side badge state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub mac: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub metadata: BadgeMetadata,
    #[serde(default)]
    pub history: VecDeque<HistoryPoint>,
    /// Last detect value per geofence hook.
    #[serde(default)]
    pub status: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<GeofenceEvent>,
}

impl Badge {
    /// Creates a badge with no fix, empty history and empty status.
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            latitude: None,
            longitude: None,
            radius: None,
            timestamp: None,
            metadata: BadgeMetadata::default(),
            history: VecDeque::new(),
            status: BTreeMap::new(),
            last_event: None,
        }
    }

    /// Folds a location update into this badge.
    ///
    /// Only fields present on the update overwrite existing values; the position is
    /// appended to the history, evicting the oldest entry beyond [`HISTORY_CAPACITY`].
    pub fn apply_update(&mut self, update: &BadgeUpdate) {
        self.latitude = Some(update.latitude);
        self.longitude = Some(update.longitude);
        if update.radius.is_some() {
            self.radius = update.radius;
        }
        self.timestamp = Some(update.timestamp.clone());
        self.metadata.merge(&update.metadata);
        self.push_history(HistoryPoint {
            lat: update.latitude,
            lon: update.longitude,
            time: update.timestamp.clone(),
        });
    }

    fn push_history(&mut self, point: HistoryPoint) {
        self.history.push_back(point);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// Records the latest detect value for a hook.
    pub fn record_status(&mut self, hook: &str, detect: &str) {
        self.status.insert(hook.to_string(), detect.to_string());
    }
}

/// Location update submitted by a viewer for manual testing.
///
/// Relayed straight to every viewer without touching the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBadgeUpdate {
    pub mac: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius: Option<f64>,
}

impl TestBadgeUpdate {
    /// Stamps the test update into a canonical record.
    pub fn into_update(self, timestamp: String) -> BadgeUpdate {
        BadgeUpdate {
            mac: self.mac,
            latitude: self.latitude,
            longitude: self.longitude,
            radius: self.radius,
            timestamp,
            metadata: BadgeMetadata::default(),
        }
    }
}
