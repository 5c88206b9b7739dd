//! Viewer-side state reconciliation.
//!
//! [`ViewerState`] is the single owner of one viewer's badges, geofences, event log
//! and notifications. It is a plain synchronous state machine; callers serialize
//! access (one task per viewer) and feed it relay messages in arrival order.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::models::badge::{Badge, BadgeUpdate, TestBadgeUpdate};
use crate::models::geofence::{Geofence, ImportMode, UpsertGeofenceRequest};
use crate::models::geofence_event::{Detect, GeofenceEvent};
use crate::models::message::ServerMessage;
use crate::models::notification::{Notification, NotificationKind, Popup, DEFAULT_POPUP_TTL_MS};
use crate::services::viewport::{compute_viewport, Viewport};

/// Maximum number of events kept in the log.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// Maximum number of entries kept in the notification history.
pub const NOTIFICATION_HISTORY_CAPACITY: usize = 1000;

/// Lowest zoom applied when the first geofence triggers an automatic fit.
pub const AUTO_FIT_MIN_ZOOM: u8 = 19;

/// Errors raised while merging into viewer state. The mutation is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("Record has an empty key")]
    EmptyKey,

    #[error("Invalid coordinates for badge {mac}: {reason}")]
    InvalidCoordinate { mac: String, reason: String },

    #[error("Invalid geofence {name}: {reason}")]
    InvalidGeofence { name: String, reason: String },

    #[error("Badge not found: {0}")]
    BadgeNotFound(String),
}

/// Badges and geofences to seed a viewer with, replacing what it holds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub badges: Option<Vec<TestBadgeUpdate>>,
    #[serde(default)]
    pub geofences: Option<Vec<UpsertGeofenceRequest>>,
}

/// Serializable view of a viewer's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSnapshot {
    pub badges: Vec<Badge>,
    pub geofences: Vec<Geofence>,
    pub events: Vec<GeofenceEvent>,
    pub notifications: Vec<Popup>,
    pub notification_history: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

/// Reconciled state of one viewer.
#[derive(Debug, Clone)]
pub struct ViewerState {
    badges: BTreeMap<String, Badge>,
    geofences: BTreeMap<String, Geofence>,
    /// Newest first.
    events: VecDeque<GeofenceEvent>,
    popups: Vec<Popup>,
    /// Newest first.
    notification_history: VecDeque<Notification>,
    viewport: Option<Viewport>,
    popup_ttl: Duration,
    geofence_revision: u64,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewerState {
    pub fn new() -> Self {
        Self::with_popup_ttl(Duration::milliseconds(DEFAULT_POPUP_TTL_MS))
    }

    pub fn with_popup_ttl(popup_ttl: Duration) -> Self {
        Self {
            badges: BTreeMap::new(),
            geofences: BTreeMap::new(),
            events: VecDeque::new(),
            popups: Vec::new(),
            notification_history: VecDeque::new(),
            viewport: None,
            popup_ttl,
            geofence_revision: 0,
        }
    }

    /// Applies one relay message.
    pub fn apply(
        &mut self,
        message: ServerMessage,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        match message {
            ServerMessage::BadgeUpdate(update) => self.apply_badge_update(&update),
            ServerMessage::GeofenceEvent(event) => {
                self.apply_event(event, now);
                Ok(())
            }
            ServerMessage::GeofenceData(geofence) => self.upsert_geofence(geofence),
            ServerMessage::PublishSuccess(ack) => {
                self.push_popup(Notification::simple(
                    format!(
                        "Successfully published badge location to MQTT topic: {}",
                        ack.topic
                    ),
                    NotificationKind::Success,
                    now,
                ));
                Ok(())
            }
            ServerMessage::PublishError(body) => {
                self.push_popup(Notification::simple(
                    format!("Failed to publish to MQTT: {}", body.error),
                    NotificationKind::Error,
                    now,
                ));
                Ok(())
            }
        }
    }

    /// Merges a location update, creating the badge on first sight.
    ///
    /// Coordinates are merged as relayed, without range checks.
    pub fn apply_badge_update(&mut self, update: &BadgeUpdate) -> Result<(), ReconcileError> {
        if update.mac.is_empty() {
            return Err(ReconcileError::EmptyKey);
        }

        self.badges
            .entry(update.mac.clone())
            .or_insert_with(|| Badge::new(update.mac.clone()))
            .apply_update(update);
        Ok(())
    }

    /// Records a geofence event.
    ///
    /// Enter/exit events raise a popup and a history entry; every event is logged;
    /// a known badge gets its status for the event's hook updated.
    pub fn apply_event(&mut self, event: GeofenceEvent, now: DateTime<Utc>) {
        if let Some(kind) = event.detect.as_ref().and_then(crossing_kind) {
            let badge_id = event.id.as_deref().unwrap_or("unknown");
            let notification = Notification::crossing(badge_id, &event.display_name(), kind, now);
            self.push_popup(notification.clone());
            self.notification_history.push_front(notification);
            self.notification_history
                .truncate(NOTIFICATION_HISTORY_CAPACITY);
        }

        if let (Some(id), Some(detect)) = (event.id.as_deref(), event.detect.as_ref()) {
            if let Some(badge) = self.badges.get_mut(id) {
                badge.record_status(&event.hook, detect.as_str());
                badge.last_event = Some(event.clone());
            }
        }

        self.events.push_front(event);
        self.events.truncate(EVENT_LOG_CAPACITY);
    }

    /// Inserts or wholesale replaces a geofence by name.
    ///
    /// The first geofence added to an empty set fits the viewport to it.
    pub fn upsert_geofence(&mut self, geofence: Geofence) -> Result<(), ReconcileError> {
        validate_geofence(&geofence)?;
        if self.geofences.get(&geofence.name) == Some(&geofence) {
            return Ok(());
        }
        let was_empty = self.geofences.is_empty();
        self.geofences.insert(geofence.name.clone(), geofence);
        self.geofence_revision += 1;

        if was_empty {
            self.viewport = self.compute_fit().map(|mut viewport| {
                viewport.zoom = viewport.zoom.max(AUTO_FIT_MIN_ZOOM);
                viewport
            });
        }
        Ok(())
    }

    /// Removes a geofence by name. Badges referencing it are untouched.
    pub fn delete_geofence(&mut self, name: &str) -> bool {
        let removed = self.geofences.remove(name).is_some();
        if removed {
            self.geofence_revision += 1;
            if self.geofences.is_empty() {
                self.viewport = None;
            }
        }
        removed
    }

    /// Bulk import. Invalid entries are skipped; returns how many were stored.
    pub fn import_geofences(&mut self, geofences: Vec<Geofence>, mode: ImportMode) -> usize {
        let valid: Vec<Geofence> = geofences
            .into_iter()
            .filter(|g| match validate_geofence(g) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid geofence in import");
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return 0;
        }

        if mode == ImportMode::Replace {
            self.geofences.clear();
        }
        let count = valid.len();
        for geofence in valid {
            self.geofences.insert(geofence.name.clone(), geofence);
        }
        self.geofence_revision += 1;
        self.fit_viewport();
        count
    }

    /// Replaces badges and geofences with seed data.
    pub fn load_seed(&mut self, seed: SeedData) -> Result<(), ReconcileError> {
        if let Some(badges) = seed.badges {
            let mut fresh = BTreeMap::new();
            for entry in badges {
                let badge = seeded_badge(entry)?;
                fresh.insert(badge.mac.clone(), badge);
            }
            self.badges = fresh;
        }
        if let Some(geofences) = seed.geofences {
            let geofences = geofences
                .into_iter()
                .map(UpsertGeofenceRequest::into_geofence)
                .collect();
            self.import_geofences(geofences, ImportMode::Replace);
        }
        Ok(())
    }

    /// Explicitly adds (or resets) a badge with empty history and status.
    pub fn add_badge(
        &mut self,
        mac: &str,
        latitude: f64,
        longitude: f64,
        radius: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let mut badge = seeded_badge(TestBadgeUpdate {
            mac: mac.to_string(),
            latitude,
            longitude,
            radius,
        })?;
        badge.timestamp = Some(shared::time::iso_timestamp(now));
        self.badges.insert(badge.mac.clone(), badge);
        Ok(())
    }

    /// Moves or resizes an existing badge; absent fields keep their value.
    ///
    /// Returns the resulting position as a test update for relaying to other viewers.
    pub fn update_badge_position(
        &mut self,
        mac: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
        radius: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<TestBadgeUpdate, ReconcileError> {
        let badge = self
            .badges
            .get_mut(mac)
            .ok_or_else(|| ReconcileError::BadgeNotFound(mac.to_string()))?;

        let (Some(lat), Some(lon)) = (latitude.or(badge.latitude), longitude.or(badge.longitude))
        else {
            return Err(ReconcileError::InvalidCoordinate {
                mac: mac.to_string(),
                reason: "badge has no position yet".to_string(),
            });
        };
        let radius = radius.or(badge.radius);
        check_position(mac, lat, lon, radius)?;

        badge.latitude = Some(lat);
        badge.longitude = Some(lon);
        badge.radius = radius;
        badge.timestamp = Some(shared::time::iso_timestamp(now));

        Ok(TestBadgeUpdate {
            mac: mac.to_string(),
            latitude: lat,
            longitude: lon,
            radius,
        })
    }

    /// Removes a badge by key.
    pub fn delete_badge(&mut self, mac: &str) -> bool {
        self.badges.remove(mac).is_some()
    }

    /// Recomputes the viewport over every stored geofence.
    pub fn fit_viewport(&mut self) -> Option<Viewport> {
        self.viewport = self.compute_fit();
        self.viewport
    }

    fn compute_fit(&self) -> Option<Viewport> {
        compute_viewport(self.geofences.values().map(|g| &g.polygon))
    }

    /// Dismisses a popup. The history entry is kept.
    pub fn dismiss_notification(&mut self, id: Uuid) -> bool {
        let before = self.popups.len();
        self.popups.retain(|p| p.notification.id != id);
        self.popups.len() != before
    }

    /// Drops expired popups, returning how many were removed.
    pub fn expire_notifications(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.popups.len();
        self.popups.retain(|p| !p.is_expired(now));
        before - self.popups.len()
    }

    pub fn clear_notification_history(&mut self) {
        self.notification_history.clear();
    }

    fn push_popup(&mut self, notification: Notification) {
        self.popups.push(Popup::new(notification, self.popup_ttl));
    }

    pub fn badge(&self, mac: &str) -> Option<&Badge> {
        self.badges.get(mac)
    }

    pub fn badges(&self) -> impl Iterator<Item = &Badge> {
        self.badges.values()
    }

    pub fn geofence(&self, name: &str) -> Option<&Geofence> {
        self.geofences.get(name)
    }

    pub fn geofences(&self) -> impl Iterator<Item = &Geofence> {
        self.geofences.values()
    }

    pub fn events(&self) -> &VecDeque<GeofenceEvent> {
        &self.events
    }

    pub fn popups(&self) -> &[Popup] {
        &self.popups
    }

    pub fn notification_history(&self) -> &VecDeque<Notification> {
        &self.notification_history
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Incremented on every geofence mutation.
    pub fn geofence_revision(&self) -> u64 {
        self.geofence_revision
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        ViewerSnapshot {
            badges: self.badges.values().cloned().collect(),
            geofences: self.geofences.values().cloned().collect(),
            events: self.events.iter().cloned().collect(),
            notifications: self.popups.clone(),
            notification_history: self.notification_history.iter().cloned().collect(),
            viewport: self.viewport,
        }
    }
}

fn crossing_kind(detect: &Detect) -> Option<NotificationKind> {
    match detect {
        Detect::Enter => Some(NotificationKind::Enter),
        Detect::Exit => Some(NotificationKind::Exit),
        Detect::Other(_) => None,
    }
}

fn check_position(
    mac: &str,
    latitude: f64,
    longitude: f64,
    radius: Option<f64>,
) -> Result<(), ReconcileError> {
    let invalid = |e: validator::ValidationError| ReconcileError::InvalidCoordinate {
        mac: mac.to_string(),
        reason: e
            .message
            .map(|m| m.to_string())
            .unwrap_or_else(|| e.code.to_string()),
    };
    shared::validation::validate_latitude(latitude).map_err(invalid)?;
    shared::validation::validate_longitude(longitude).map_err(invalid)?;
    if let Some(radius) = radius {
        shared::validation::validate_radius(radius).map_err(invalid)?;
    }
    Ok(())
}

fn validate_geofence(geofence: &Geofence) -> Result<(), ReconcileError> {
    geofence
        .validate()
        .map_err(|e| ReconcileError::InvalidGeofence {
            name: geofence.name.clone(),
            reason: e.to_string(),
        })
}

fn seeded_badge(entry: TestBadgeUpdate) -> Result<Badge, ReconcileError> {
    if entry.mac.is_empty() {
        return Err(ReconcileError::EmptyKey);
    }
    check_position(&entry.mac, entry.latitude, entry.longitude, entry.radius)?;
    let mut badge = Badge::new(entry.mac);
    badge.latitude = Some(entry.latitude);
    badge.longitude = Some(entry.longitude);
    badge.radius = entry.radius;
    Ok(badge)
}
