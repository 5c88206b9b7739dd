//! Geofence boundary event model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Crossing direction reported by a geofence event.
///
/// Unknown values are preserved verbatim so they still land in the event log
/// and the badge status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Detect {
    Enter,
    Exit,
    Other(String),
}

impl Detect {
    /// Converts to string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Detect::Enter => "enter",
            Detect::Exit => "exit",
            Detect::Other(value) => value.as_str(),
        }
    }

    /// Whether this detect value produces a viewer notification.
    pub fn is_crossing(&self) -> bool {
        matches!(self, Detect::Enter | Detect::Exit)
    }
}

impl From<String> for Detect {
    fn from(value: String) -> Self {
        match value.as_str() {
            "enter" => Detect::Enter,
            "exit" => Detect::Exit,
            _ => Detect::Other(value),
        }
    }
}

impl From<Detect> for String {
    fn from(value: Detect) -> Self {
        match value {
            Detect::Other(value) => value,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Detect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical geofence event broadcast as `geofence_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    /// Badge the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect: Option<Detect>,
    /// Identifier of the geofence boundary.
    pub hook: String,
    pub timestamp: String,
    /// Remaining payload fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GeofenceEvent {
    /// Human readable geofence name derived from the hook.
    ///
    /// Hooks conventionally look like `geofence_{mac}_{name}`; when the hook has at
    /// least three `_`-separated segments the first two are dropped. Other hooks are
    /// returned verbatim. This is a compatibility heuristic, not a guaranteed contract.
    pub fn display_name(&self) -> String {
        display_geofence_name(&self.hook)
    }
}

/// Strips a `geofence_{mac}_` style prefix from a hook.
pub fn display_geofence_name(hook: &str) -> String {
    let parts: Vec<&str> = hook.split('_').collect();
    if parts.len() >= 3 {
        parts[2..].join("_")
    } else {
        hook.to_string()
    }
}
