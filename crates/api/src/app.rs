use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::broker::BrokerPublisher;
use crate::bus::FanoutBus;
use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::{geofences, health, public_config, snapshot, ws};
use crate::viewer::ViewerHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: FanoutBus,
    pub broker: Arc<dyn BrokerPublisher>,
    /// Mirror viewer backing the snapshot and geofence catalog.
    pub viewer: ViewerHandle,
}

pub fn create_app(
    config: Config,
    bus: FanoutBus,
    broker: Arc<dyn BrokerPublisher>,
    viewer: ViewerHandle,
) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        bus,
        broker,
        viewer,
    };

    // Build CORS layer based on configuration
    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // The socket outlives any request timeout, so it sits outside that layer
    let ws_routes = Router::new().route("/ws", get(ws::ws_handler));

    let api_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/config", get(public_config::get_config))
        .route("/api/snapshot", get(snapshot::get_snapshot))
        .route("/api/viewport", get(snapshot::get_viewport))
        .route(
            "/api/geofences",
            get(geofences::list_geofences).post(geofences::upsert_geofence),
        )
        .route("/api/geofences/import", post(geofences::import_geofences))
        .route("/api/geofences/:name", delete(geofences::delete_geofence))
        .route("/metrics", get(metrics_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )));

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
