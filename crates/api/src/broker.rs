//! Broker connector.
//!
//! Owns the MQTT session: connects (optionally authenticated, optionally over TLS),
//! subscribes to the badge and geofence topic patterns on every CONNACK, and hands
//! each incoming publish to the ingest pipeline over a bounded channel. Connection
//! failures are retried at a fixed period until [`BrokerHandle::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BrokerAddress, BrokerConfig, TopicsConfig};
use crate::error::{ConnectionError, RelayError};
use crate::middleware::metrics::record_message_received;

/// Capacity of the client request queue between [`AsyncClient`] and the event loop.
const CLIENT_REQUEST_CAPACITY: usize = 64;

/// Raw broker message awaiting normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Broker connection state as observed by the connector task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Offline,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Offline => "offline",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound side of the broker as seen by the fan-out bus and health route.
#[async_trait::async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Publishes `payload` on `topic` at QoS 0, not retained.
    ///
    /// `Ok` means the request was queued for the connector, not that the broker
    /// received it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError>;
}

/// Resolved connector settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub address: BrokerAddress,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
    pub topics: Vec<String>,
    pub channel_capacity: usize,
}

impl BrokerSettings {
    pub fn from_config(
        broker: &BrokerConfig,
        topics: &TopicsConfig,
    ) -> Result<Self, ConnectionError> {
        let address = broker
            .address()
            .map_err(|e| ConnectionError::InvalidAddress(e.to_string()))?;

        Ok(Self {
            address,
            credentials: broker
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            client_id: generate_client_id(&broker.client_id_prefix),
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            reconnect_period: Duration::from_millis(broker.reconnect_period_ms),
            connect_timeout: Duration::from_millis(broker.connect_timeout_ms),
            topics: vec![topics.badges.clone(), topics.geofence.clone()],
            channel_capacity: broker.channel_capacity.max(1),
        })
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.address.host, self.address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        if self.address.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Client id of the form `{prefix}-{8 lowercase hex digits}`.
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}-{:08x}", prefix, rand::random::<u32>())
}

/// Handle to a running connector task. Cheap to clone.
#[derive(Clone)]
pub struct BrokerHandle {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    shutdown: Arc<watch::Sender<bool>>,
    address: String,
}

impl BrokerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the connector reports `Connected`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let mut state = self.state.clone();
        let wait = async {
            state
                .wait_for(|s| s.is_connected())
                .await
                .map(|_| ())
                .map_err(|_| ConnectionError::Closed)
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                address: self.address.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stops the connector task and disconnects from the broker.
    pub fn shutdown(&self) {
        info!(broker = %self.address, "Shutting down broker connector");
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not delivered");
        }
        let _ = self.shutdown.send(true);
    }
}

#[async_trait::async_trait]
impl BrokerPublisher for BrokerHandle {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| RelayError::PublishFailure(e.to_string()))
    }
}

/// Starts and supervises the broker session.
pub struct BrokerConnector;

impl BrokerConnector {
    /// Spawns the connector task and returns immediately.
    ///
    /// The returned receiver yields every incoming publish in arrival order.
    pub fn start(
        settings: BrokerSettings,
    ) -> (BrokerHandle, mpsc::Receiver<RawMessage>, JoinHandle<()>) {
        let (client, eventloop) =
            AsyncClient::new(settings.mqtt_options(), CLIENT_REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (raw_tx, raw_rx) = mpsc::channel(settings.channel_capacity);
        let address = settings.address.to_string();

        match &settings.credentials {
            Some((username, _)) => {
                info!(broker = %address, client_id = %settings.client_id, username = %username, "Connecting to broker with credentials")
            }
            None => {
                info!(broker = %address, client_id = %settings.client_id, "Connecting to broker anonymously (no credentials configured)")
            }
        }

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            settings.topics,
            settings.reconnect_period,
            state_tx,
            raw_tx,
            shutdown_rx,
        ));

        let handle = BrokerHandle {
            client,
            state: state_rx,
            shutdown: Arc::new(shutdown_tx),
            address,
        };
        (handle, raw_rx, task)
    }

    /// Starts the connector and waits for the first CONNACK.
    ///
    /// Fails with [`ConnectionError::Timeout`] after the configured connect timeout,
    /// tearing the connector down.
    pub async fn connect(
        settings: BrokerSettings,
    ) -> Result<(BrokerHandle, mpsc::Receiver<RawMessage>, JoinHandle<()>), ConnectionError> {
        let timeout = settings.connect_timeout;
        let (handle, raw_rx, task) = Self::start(settings);

        match handle.wait_connected(timeout).await {
            Ok(()) => Ok((handle, raw_rx, task)),
            Err(e) => {
                warn!(broker = %handle.address(), error = %e, "Broker connection failed");
                handle.shutdown();
                Err(e)
            }
        }
    }
}

fn transition(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state_tx.send_replace(next);
    if previous != next {
        info!(from = %previous, to = %next, "Broker connection state changed");
    }
}

fn classify_topic(topic: &str) -> &'static str {
    if topic.contains("location") {
        "location"
    } else if topic.contains("geofence") {
        "geofence"
    } else {
        "other"
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    reconnect_period: Duration,
    state_tx: watch::Sender<ConnectionState>,
    raw_tx: mpsc::Sender<RawMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    transition(&state_tx, ConnectionState::Connected);
                    info!(session_present = ack.session_present, "Connected to broker");
                    for topic in &topics {
                        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            Ok(()) => info!(topic = %topic, "Subscribed to topic"),
                            Err(e) => error!(topic = %topic, error = %e, "Subscription failed"),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    record_message_received(classify_topic(&publish.topic));
                    debug!(topic = %publish.topic, bytes = publish.payload.len(), "Received broker message");
                    let raw = RawMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    if raw_tx.send(raw).await.is_err() {
                        warn!("Ingest pipeline closed; stopping broker connector");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    transition(&state_tx, ConnectionState::Offline);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Broker connection error");
                    transition(&state_tx, ConnectionState::Offline);

                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_period) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    transition(&state_tx, ConnectionState::Reconnecting);
                }
            }
        }
    }

    transition(&state_tx, ConnectionState::Closed);
    info!("Broker connector stopped");
}

/// In-process publisher for development and testing.
///
/// Records publishes instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct MockBrokerPublisher {
    connected: Arc<AtomicBool>,
    /// Whether to simulate publish failures.
    pub simulate_failure: bool,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockBrokerPublisher {
    /// Create a connected mock publisher.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.set_connected(true);
        mock
    }

    /// Create a mock publisher that reports no broker connection.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Create a connected mock publisher whose publishes fail.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::new()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every `(topic, payload)` published so far.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl BrokerPublisher for MockBrokerPublisher {
    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Offline
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        if self.simulate_failure {
            tracing::warn!(topic = %topic, "Mock broker publisher simulating failure");
            return Err(RelayError::PublishFailure("Simulated failure".to_string()));
        }

        tracing::info!(topic = %topic, bytes = payload.len(), "Mock: Would publish to broker");
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload));
        }
        Ok(())
    }
}
