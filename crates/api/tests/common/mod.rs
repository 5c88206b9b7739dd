//! Common test utilities for integration tests.
//!
//! The app is wired with an in-memory blob store and a mock broker publisher, so
//! no broker or filesystem is needed.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::Router;
use geofence_relay_api::app::create_app;
use geofence_relay_api::broker::{BrokerPublisher, MockBrokerPublisher};
use geofence_relay_api::bus::FanoutBus;
use geofence_relay_api::config::{
    BrokerConfig, BusConfig, Config, LoggingConfig, ServerConfig, StorageConfig, TopicsConfig,
    ViewerConfig,
};
use geofence_relay_api::viewer::{ViewerHandle, ViewerSession};
use persistence::{GeofenceStore, MemoryBlobStore};

/// Test configuration pointing at a local broker that is never contacted.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 30,
            cors_origins: vec![],
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        broker: BrokerConfig {
            url: String::new(),
            protocol: "mqtt".to_string(),
            host: "broker.test".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id_prefix: "geofence-relay".to_string(),
            keep_alive_secs: 60,
            reconnect_period_ms: 1000,
            connect_timeout_ms: 30000,
            channel_capacity: 256,
        },
        topics: TopicsConfig {
            badges: "old/assets/+/location".to_string(),
            geofence: "geofence/#".to_string(),
            publish_prefix: "old".to_string(),
        },
        bus: BusConfig { capacity: 64 },
        storage: StorageConfig {
            backend: "memory".to_string(),
            path: "data".to_string(),
        },
        viewer: ViewerConfig::default(),
    }
}

/// A wired relay without a broker connection.
pub struct TestRelay {
    pub app: Router,
    pub bus: FanoutBus,
    pub publisher: MockBrokerPublisher,
    pub viewer: ViewerHandle,
}

impl TestRelay {
    /// Fresh router sharing this relay's state; `oneshot` consumes the router.
    pub fn app(&self) -> Router {
        self.app.clone()
    }
}

pub async fn spawn_test_relay() -> TestRelay {
    spawn_test_relay_with(MockBrokerPublisher::new()).await
}

pub async fn spawn_test_relay_with(publisher: MockBrokerPublisher) -> TestRelay {
    let config = test_config();
    let broker: Arc<dyn BrokerPublisher> = Arc::new(publisher.clone());
    let bus = FanoutBus::new(config.bus.capacity, broker.clone(), &config.topics.publish_prefix);
    let store = GeofenceStore::new(Arc::new(MemoryBlobStore::new()));
    let (viewer, _task) = ViewerSession::spawn(&bus, store, &config.viewer).await;

    TestRelay {
        app: create_app(config, bus.clone(), broker, viewer.clone()),
        bus,
        publisher,
        viewer,
    }
}

/// Build a JSON request.
pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a GET request.
pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Build a DELETE request.
pub fn delete_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Helper to parse JSON response body.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

/// Closed square geofence near the given corner.
pub fn square_geofence(name: &str, lon: f64, lat: f64) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "polygon": {
            "type": "Polygon",
            "coordinates": [[
                [lon, lat],
                [lon, lat + 0.0002],
                [lon + 0.0002, lat + 0.0002],
                [lon + 0.0002, lat],
                [lon, lat]
            ]]
        },
        "strokeColor": "#ff0000"
    })
}
