//! Timestamp formatting helpers.
//!
//! Badge and event timestamps travel as ISO-8601 strings. Generated values use
//! millisecond precision with a `Z` suffix, e.g. `2024-05-01T10:15:30.123Z`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats an instant as an ISO-8601 UTC string with millisecond precision.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time as an ISO-8601 UTC string.
pub fn now_iso() -> String {
    iso_timestamp(Utc::now())
}
