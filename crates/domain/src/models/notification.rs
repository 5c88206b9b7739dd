//! Viewer notifications.
//!
//! Boundary crossings (and publish acknowledgements) raise short-lived popups.
//! Crossings are additionally kept in a capped history that survives dismissal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default popup lifetime in milliseconds.
pub const DEFAULT_POPUP_TTL_MS: i64 = 8000;

/// Notification type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Enter,
    Exit,
    Success,
    Error,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Enter => write!(f, "enter"),
            NotificationKind::Exit => write!(f, "exit"),
            NotificationKind::Success => write!(f, "success"),
            NotificationKind::Error => write!(f, "error"),
        }
    }
}

/// A single notification entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence_name: Option<String>,
}

impl Notification {
    /// Builds the notification for a boundary crossing.
    pub fn crossing(
        badge_id: &str,
        geofence_name: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: format!(
                "geofence for badge \"{}\" on fence \"{}\" had {}",
                badge_id, geofence_name, kind
            ),
            kind,
            timestamp: at,
            badge_id: Some(badge_id.to_string()),
            geofence_name: Some(geofence_name.to_string()),
        }
    }

    /// Builds a notification with a free-form message.
    pub fn simple(message: impl Into<String>, kind: NotificationKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            kind,
            timestamp: at,
            badge_id: None,
            geofence_name: None,
        }
    }
}

/// A visible popup with its expiry instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Popup {
    #[serde(flatten)]
    pub notification: Notification,
    pub expires_at: DateTime<Utc>,
}

impl Popup {
    pub fn new(notification: Notification, ttl: Duration) -> Self {
        let expires_at = notification.timestamp + ttl;
        Self {
            notification,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_message() {
        let n = Notification::crossing("abc123", "lobby", NotificationKind::Enter, Utc::now());
        assert_eq!(
            n.message,
            "geofence for badge \"abc123\" on fence \"lobby\" had enter"
        );
        assert_eq!(n.badge_id.as_deref(), Some("abc123"));
        assert_eq!(n.geofence_name.as_deref(), Some("lobby"));
    }

    #[test]
    fn test_kind_serializes_as_type() {
        let n = Notification::simple("done", NotificationKind::Success, Utc::now());
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "success");
        assert!(json.get("badgeId").is_none());
    }

    #[test]
    fn test_popup_expiry() {
        let now = Utc::now();
        let popup = Popup::new(
            Notification::simple("x", NotificationKind::Exit, now),
            Duration::milliseconds(DEFAULT_POPUP_TTL_MS),
        );
        assert!(!popup.is_expired(now));
        assert!(popup.is_expired(now + Duration::milliseconds(DEFAULT_POPUP_TTL_MS)));
    }
}
