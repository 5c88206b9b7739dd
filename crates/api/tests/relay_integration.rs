//! Integration tests for the relay HTTP surface.
//!
//! Run with: cargo test --test relay_integration

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{
    delete_request, get_request, json_request, parse_response_body, spawn_test_relay,
    spawn_test_relay_with, square_geofence,
};
use domain::models::{ServerMessage, TestBadgeUpdate};
use geofence_relay_api::broker::MockBrokerPublisher;
use serde_json::json;
use tower::ServiceExt;

// ============================================================================
// Health & Config
// ============================================================================

#[tokio::test]
async fn test_health_reports_broker_state() {
    let relay = spawn_test_relay_with(MockBrokerPublisher::disconnected()).await;

    let response = relay.app().oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["brokerConnected"], false);
    assert_eq!(body["viewers"], 0);

    relay.publisher.set_connected(true);
    let response = relay.app().oneshot(get_request("/api/health")).await.unwrap();
    let body = parse_response_body(response).await;
    assert_eq!(body["brokerConnected"], true);
    assert_eq!(body["brokerState"], "connected");
}

#[tokio::test]
async fn test_public_config_hides_credentials() {
    let relay = spawn_test_relay().await;

    let response = relay.app().oneshot(get_request("/api/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["topics"]["badges"], "old/assets/+/location");
    assert_eq!(body["topics"]["publishPrefix"], "old");
    assert!(!body.to_string().contains("password"));
}

// ============================================================================
// Geofence Management
// ============================================================================

#[tokio::test]
async fn test_upsert_geofence_broadcasts_and_fits_viewport() {
    let relay = spawn_test_relay().await;
    let mut viewer_socket = relay.bus.subscribe();

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences",
            square_geofence("lobby", 77.2, 28.5),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["name"], "lobby");
    assert_eq!(body["strokeColor"], "#ff0000");

    match viewer_socket.recv().await {
        Some(ServerMessage::GeofenceData(g)) => assert_eq!(g.name, "lobby"),
        other => panic!("Unexpected message: {:?}", other),
    }

    let response = relay.app().oneshot(get_request("/api/viewport")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["zoom"], 20);
    assert!((body["centerLat"].as_f64().unwrap() - 28.5001).abs() < 1e-9);
}

#[tokio::test]
async fn test_upsert_geofence_closes_line_string() {
    let relay = spawn_test_relay().await;

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences",
            json!({
                "name": "corridor",
                "polygon": {
                    "type": "LineString",
                    "coordinates": [[10.0, 10.0], [10.0, 10.0001], [10.0001, 10.0001]]
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["polygon"]["type"], "Polygon");
    let ring = body["polygon"]["coordinates"][0].as_array().unwrap();
    assert_eq!(ring.len(), 4);
    assert_eq!(ring[0], ring[3]);
}

#[tokio::test]
async fn test_upsert_geofence_validation() {
    let relay = spawn_test_relay().await;

    let mut invalid = square_geofence("bad", 1.0, 1.0);
    invalid["strokeOpacity"] = json!(4.0);
    let response = relay
        .app()
        .oneshot(json_request(Method::POST, "/api/geofences", invalid))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "Stroke opacity must be between 0 and 1");
    assert_eq!(body["details"][0]["field"], "stroke_opacity");

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences",
            square_geofence("", 1.0, 1.0),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_merge_and_replace() {
    let relay = spawn_test_relay().await;

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences/import",
            json!({
                "geofences": [
                    square_geofence("a", 1.0, 1.0),
                    square_geofence("b", 1.001, 1.0),
                    square_geofence("", 1.0, 1.0)
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["imported"], 2);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["mode"], "merge");

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences/import",
            json!({"geofences": [square_geofence("c", 2.0, 2.0)], "mode": "replace"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = relay.app().oneshot(get_request("/api/geofences")).await.unwrap();
    let body = parse_response_body(response).await;
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["c"]);
}

#[tokio::test]
async fn test_import_with_nothing_valid_is_rejected() {
    let relay = spawn_test_relay().await;

    let response = relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences/import",
            json!({"geofences": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_geofence() {
    let relay = spawn_test_relay().await;

    relay
        .app()
        .oneshot(json_request(
            Method::POST,
            "/api/geofences",
            square_geofence("dock", 5.0, 5.0),
        ))
        .await
        .unwrap();

    let response = relay
        .app()
        .oneshot(delete_request("/api/geofences/dock"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = relay
        .app()
        .oneshot(delete_request("/api/geofences/dock"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = relay.app().oneshot(get_request("/api/viewport")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Snapshot
// ============================================================================

#[tokio::test]
async fn test_snapshot_reflects_relayed_traffic() {
    let relay = spawn_test_relay().await;

    relay.bus.relay_test_update(TestBadgeUpdate {
        mac: "abc123".to_string(),
        latitude: 28.5001,
        longitude: 77.2001,
        radius: Some(2.0),
    });

    // the mirror viewer applies broadcasts asynchronously
    let mut body = serde_json::Value::Null;
    for _ in 0..20 {
        let response = relay.app().oneshot(get_request("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body = parse_response_body(response).await;
        if !body["badges"].as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(body["badges"][0]["mac"], "abc123");
    assert_eq!(body["badges"][0]["radius"], 2.0);
    assert!(body["notificationHistory"].as_array().unwrap().is_empty());
    assert!(body.get("viewport").is_none());
}

#[tokio::test]
async fn test_viewport_without_geofences() {
    let relay = spawn_test_relay().await;

    let response = relay.app().oneshot(get_request("/api/viewport")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_unknown_route() {
    let relay = spawn_test_relay().await;
    let response = relay.app().oneshot(get_request("/api/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
