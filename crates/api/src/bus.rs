//! Fan-out bus between the ingest pipeline and connected viewers.
//!
//! [`FanoutBus`] wraps [`tokio::sync::broadcast`]:
//! - **Non-blocking publish**: [`FanoutBus::broadcast`] never waits on viewers.
//! - **Bounded capacity**: one ring buffer shared by every subscriber.
//! - **Drop-oldest**: a lagging subscriber skips the oldest messages and keeps going.
//! - **No replay**: a subscriber only sees messages sent after it subscribed.
//!
//! It also answers per-viewer requests whose replies go to the requester only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use validator::Validate;

use domain::models::message::{location_topic, OutboundLocation, PublishAck};
use domain::models::{PublishBadgeLocation, ServerMessage, TestBadgeUpdate};
use shared::time::iso_timestamp;

use crate::broker::BrokerPublisher;
use crate::error::RelayError;
use crate::middleware::metrics::{record_broadcast, record_message_dropped, record_publish};

/// Default broadcast ring capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast hub for relay messages. Cheap to clone.
#[derive(Clone)]
pub struct FanoutBus {
    tx: broadcast::Sender<ServerMessage>,
    publisher: Arc<dyn BrokerPublisher>,
    publish_prefix: Arc<str>,
    next_subscriber: Arc<AtomicU64>,
}

impl FanoutBus {
    /// Creates a bus with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize, publisher: Arc<dyn BrokerPublisher>, publish_prefix: &str) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            publisher,
            publish_prefix: Arc::from(publish_prefix),
            next_subscriber: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = id, "Bus subscriber registered");
        Subscription {
            id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Delivers `message` to every current subscriber. Returns how many received it.
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let event = message.event_name();
        record_broadcast(event);
        match self.tx.send(message) {
            Ok(receivers) => {
                debug!(event, receivers, "Broadcast message");
                receivers
            }
            Err(_) => {
                debug!(event, "Broadcast with no subscribers");
                0
            }
        }
    }

    /// Relays a viewer's test update to every viewer without touching the broker.
    pub fn relay_test_update(&self, update: TestBadgeUpdate) -> usize {
        info!(mac = %update.mac, "Relaying test badge update");
        let update = update.into_update(iso_timestamp(Utc::now()));
        self.broadcast(ServerMessage::BadgeUpdate(update))
    }

    /// Publishes a viewer's badge location to the broker.
    ///
    /// The acknowledgement is returned for the requester only; it is never broadcast.
    pub async fn publish_request(&self, request: &PublishBadgeLocation) -> ServerMessage {
        match self.try_publish(request).await {
            Ok(ack) => {
                record_publish("success");
                info!(topic = %ack.topic, mac = %ack.payload.mac, "Published badge location");
                ServerMessage::PublishSuccess(ack)
            }
            Err(e) => {
                record_publish("error");
                warn!(error = %e, "Badge location publish rejected");
                ServerMessage::publish_error(e.to_string())
            }
        }
    }

    async fn try_publish(&self, request: &PublishBadgeLocation) -> Result<PublishAck, RelayError> {
        let (mac, latitude, longitude) = request
            .required_fields()
            .ok_or(RelayError::InvalidPublishRequest)?;
        request
            .validate()
            .map_err(|e| RelayError::InvalidCoordinates(first_validation_message(&e)))?;

        if !self.publisher.is_connected() {
            return Err(RelayError::NotConnected);
        }

        let now = iso_timestamp(Utc::now());
        let topic = location_topic(&self.publish_prefix, mac);
        let payload = OutboundLocation {
            mac: mac.to_string(),
            latitude,
            longitude,
            radius: request.radius,
            sent_ts: now.clone(),
            timestamp: now,
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| RelayError::PublishFailure(e.to_string()))?;

        self.publisher.publish(&topic, bytes).await?;
        Ok(PublishAck { topic, payload })
    }
}

fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

/// One subscriber's view of the bus.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<ServerMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message in broadcast order, or `None` once the bus is gone.
    ///
    /// When this subscriber fell behind, the skipped messages are logged and counted
    /// and delivery resumes at the oldest message still buffered.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        subscriber = self.id,
                        skipped,
                        "Subscriber lagged; oldest messages dropped"
                    );
                    record_message_dropped("lagged", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
