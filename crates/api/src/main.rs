use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use geofence_relay_api::broker::{BrokerConnector, BrokerPublisher, BrokerSettings};
use geofence_relay_api::bus::FanoutBus;
use geofence_relay_api::config::{Config, StorageConfig};
use geofence_relay_api::viewer::ViewerSession;
use geofence_relay_api::{app, middleware, pipeline};
use persistence::{BlobStore, FileBlobStore, GeofenceStore, MemoryBlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    middleware::logging::init_logging(&config.logging);

    info!("Starting Geofence Relay v{}", env!("CARGO_PKG_VERSION"));

    middleware::init_metrics()?;

    // Broker session; the server starts even while the broker is unreachable
    let settings = BrokerSettings::from_config(&config.broker, &config.topics)?;
    let connect_timeout = settings.connect_timeout;
    let (broker, raw_rx, broker_task) = BrokerConnector::start(settings);
    {
        let broker = broker.clone();
        tokio::spawn(async move {
            match broker.wait_connected(connect_timeout).await {
                Ok(()) => info!(broker = %broker.address(), "Broker connected"),
                Err(e) => warn!(error = %e, "Broker not reachable yet; retrying in background"),
            }
        });
    }

    let publisher: Arc<dyn BrokerPublisher> = Arc::new(broker.clone());
    let bus = FanoutBus::new(
        config.bus.capacity,
        publisher.clone(),
        &config.topics.publish_prefix,
    );
    let pipeline_task = pipeline::spawn(raw_rx, bus.clone());

    let store = GeofenceStore::new(blob_store(&config.storage));
    let (viewer, _viewer_task) = ViewerSession::spawn(&bus, store, &config.viewer).await;

    // Build application
    let app = app::create_app(config.clone(), bus, publisher, viewer);

    // Start server
    let addr = config.socket_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    broker.shutdown();
    let _ = broker_task.await;
    let _ = pipeline_task.await;
    info!("Relay stopped");

    Ok(())
}

fn blob_store(storage: &StorageConfig) -> Arc<dyn BlobStore> {
    match storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory geofence storage");
            Arc::new(MemoryBlobStore::new())
        }
        _ => {
            info!(path = %storage.path, "Using file geofence storage");
            Arc::new(FileBlobStore::new(&storage.path))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
