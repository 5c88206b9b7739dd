//! Ingest pipeline: raw broker messages in, normalized relay messages out.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use domain::services::normalizer::{normalize, NormalizeError};

use crate::broker::RawMessage;
use crate::bus::FanoutBus;
use crate::middleware::metrics::record_message_dropped;

/// Characters of raw payload included in rejection logs.
const LOG_PREVIEW_CHARS: usize = 200;

/// Spawns the pipeline task. It ends when the connector drops its sender.
pub fn spawn(mut raw_rx: mpsc::Receiver<RawMessage>, bus: FanoutBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Ingest pipeline started");
        while let Some(raw) = raw_rx.recv().await {
            process(&bus, &raw, Utc::now());
        }
        info!("Ingest pipeline stopped");
    })
}

/// Normalizes one message and broadcasts it. Returns whether it was broadcast.
pub fn process(bus: &FanoutBus, raw: &RawMessage, received_at: DateTime<Utc>) -> bool {
    match normalize(&raw.topic, &raw.payload, received_at) {
        Ok(record) => {
            let message = record.into_message();
            debug!(topic = %raw.topic, event = message.event_name(), "Normalized broker message");
            bus.broadcast(message);
            true
        }
        Err(e) => {
            record_message_dropped(drop_reason(&e), 1);
            warn!(
                topic = %raw.topic,
                error = %e,
                content = %preview(&raw.payload),
                "Dropping broker message"
            );
            false
        }
    }
}

fn drop_reason(error: &NormalizeError) -> &'static str {
    match error {
        NormalizeError::Malformed(_) => "malformed",
        NormalizeError::MissingMac => "missing_mac",
        NormalizeError::MissingCoordinates => "missing_coordinates",
        NormalizeError::UnroutableTopic(_) => "unroutable_topic",
    }
}

/// Lossy UTF-8 rendering of a payload, cut to [`LOG_PREVIEW_CHARS`] characters.
fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerPublisher;
    use bytes::Bytes;
    use domain::models::ServerMessage;
    use std::sync::Arc;

    fn raw(topic: &str, payload: &str) -> RawMessage {
        RawMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload.to_string()),
        }
    }

    fn bus() -> FanoutBus {
        FanoutBus::new(16, Arc::new(MockBrokerPublisher::new()), "old")
    }

    #[tokio::test]
    async fn test_location_is_broadcast() {
        let bus = bus();
        let mut sub = bus.subscribe();

        let accepted = process(
            &bus,
            &raw("old/assets/abc123/location", r#"{"lat": 28.1, "lon": 77.2}"#),
            Utc::now(),
        );
        assert!(accepted);

        match sub.recv().await {
            Some(ServerMessage::BadgeUpdate(u)) => {
                assert_eq!(u.mac, "abc123");
                assert_eq!(u.latitude, 28.1);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejections_are_not_broadcast() {
        let bus = bus();
        let _sub = bus.subscribe();

        assert!(!process(&bus, &raw("old/assets/a/location", "not json"), Utc::now()));
        assert!(!process(&bus, &raw("x/location", r#"{"lat": 1.0}"#), Utc::now()));
        assert!(!process(&bus, &raw("misc/topic", "{}"), Utc::now()));
    }

    #[tokio::test]
    async fn test_spawned_pipeline_preserves_order() {
        let bus = bus();
        let mut sub = bus.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let task = spawn(rx, bus.clone());

        tx.send(raw("geofence/lobby", r#"{"id": "a", "detect": "enter", "hook": "h1"}"#))
            .await
            .unwrap();
        tx.send(raw("geofence/lobby", "garbage")).await.unwrap();
        tx.send(raw("geofence/lobby", r#"{"id": "a", "detect": "exit", "hook": "h1"}"#))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let mut detects = Vec::new();
        for _ in 0..2 {
            if let Some(ServerMessage::GeofenceEvent(e)) = sub.recv().await {
                detects.push(e.detect.map(|d| d.as_str().to_string()));
            }
        }
        assert_eq!(
            detects,
            vec![Some("enter".to_string()), Some("exit".to_string())]
        );
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        let cut = preview(long.as_bytes());
        assert_eq!(cut.len(), LOG_PREVIEW_CHARS + 3);
        assert_eq!(preview(b"short"), "short");
    }

    #[test]
    fn test_drop_reasons() {
        assert_eq!(drop_reason(&NormalizeError::MissingMac), "missing_mac");
        assert_eq!(
            drop_reason(&NormalizeError::UnroutableTopic("t".into())),
            "unroutable_topic"
        );
    }
}
