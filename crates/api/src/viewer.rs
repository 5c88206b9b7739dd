//! In-process viewer session.
//!
//! A [`ViewerSession`] owns one [`ViewerState`] inside a task. It is fed by a bus
//! subscription and by commands from [`ViewerHandle`], and persists the geofence
//! catalog whenever it changes. The relay runs one session as its mirror viewer,
//! which backs the snapshot, viewport and geofence catalog queries.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use domain::models::{Geofence, ImportMode};
use domain::services::reconciler::{ReconcileError, ViewerSnapshot, ViewerState};
use domain::services::viewport::Viewport;
use persistence::GeofenceStore;

use crate::bus::{FanoutBus, Subscription};
use crate::config::ViewerConfig;
use crate::error::ApiError;

enum ViewerCommand {
    UpsertGeofence {
        geofence: Geofence,
        reply: oneshot::Sender<Result<(), ReconcileError>>,
    },
    ImportGeofences {
        geofences: Vec<Geofence>,
        mode: ImportMode,
        reply: oneshot::Sender<usize>,
    },
    DeleteGeofence {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Geofences(oneshot::Sender<Vec<Geofence>>),
    Snapshot(oneshot::Sender<ViewerSnapshot>),
    Viewport(oneshot::Sender<Option<Viewport>>),
}

/// Client side of a running [`ViewerSession`]. Cheap to clone.
#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
}

impl ViewerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ViewerCommand,
    ) -> Result<T, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ApiError::ServiceUnavailable("Viewer session stopped".into()))?;
        rx.await
            .map_err(|_| ApiError::ServiceUnavailable("Viewer session stopped".into()))
    }

    pub async fn upsert_geofence(&self, geofence: Geofence) -> Result<(), ApiError> {
        self.request(|reply| ViewerCommand::UpsertGeofence { geofence, reply })
            .await?
            .map_err(ApiError::from)
    }

    pub async fn import_geofences(
        &self,
        geofences: Vec<Geofence>,
        mode: ImportMode,
    ) -> Result<usize, ApiError> {
        self.request(|reply| ViewerCommand::ImportGeofences {
            geofences,
            mode,
            reply,
        })
        .await
    }

    pub async fn delete_geofence(&self, name: &str) -> Result<bool, ApiError> {
        let name = name.to_string();
        self.request(|reply| ViewerCommand::DeleteGeofence { name, reply })
            .await
    }

    /// Every stored geofence, ordered by name.
    pub async fn geofences(&self) -> Result<Vec<Geofence>, ApiError> {
        self.request(ViewerCommand::Geofences).await
    }

    pub async fn snapshot(&self) -> Result<ViewerSnapshot, ApiError> {
        self.request(ViewerCommand::Snapshot).await
    }

    pub async fn viewport(&self) -> Result<Option<Viewport>, ApiError> {
        self.request(ViewerCommand::Viewport).await
    }
}

/// Actor owning one viewer's reconciled state.
pub struct ViewerSession {
    state: ViewerState,
    subscription: Subscription,
    commands: mpsc::Receiver<ViewerCommand>,
    store: GeofenceStore,
    sweep_interval: Duration,
    persisted_revision: u64,
}

impl ViewerSession {
    /// Restores the persisted catalog, subscribes to the bus and starts the session task.
    pub async fn spawn(
        bus: &FanoutBus,
        store: GeofenceStore,
        config: &ViewerConfig,
    ) -> (ViewerHandle, JoinHandle<()>) {
        let mut state =
            ViewerState::with_popup_ttl(chrono::Duration::milliseconds(config.popup_ttl_ms));

        match store.load().await {
            Ok(geofences) if !geofences.is_empty() => {
                let restored = state.import_geofences(geofences, ImportMode::Replace);
                info!(count = restored, "Restored persisted geofences");
            }
            Ok(_) => debug!("No persisted geofences"),
            Err(e) => warn!(error = %e, "Failed to load persisted geofences"),
        }

        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let session = ViewerSession {
            persisted_revision: state.geofence_revision(),
            state,
            subscription: bus.subscribe(),
            commands: rx,
            store,
            sweep_interval: Duration::from_millis(config.sweep_interval_ms.max(1)),
        };

        let task = tokio::spawn(session.run());
        (ViewerHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        info!(subscriber = self.subscription.id(), "Viewer session started");
        let mut sweep = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                message = self.subscription.recv() => match message {
                    Some(message) => {
                        let event = message.event_name();
                        if let Err(e) = self.state.apply(message, Utc::now()) {
                            warn!(event, error = %e, "Skipping relay message");
                        }
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sweep.tick() => {
                    let expired = self.state.expire_notifications(Utc::now());
                    if expired > 0 {
                        debug!(expired, "Expired popups");
                    }
                }
            }
            self.persist_if_changed().await;
        }

        info!(subscriber = self.subscription.id(), "Viewer session stopped");
    }

    fn handle(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::UpsertGeofence { geofence, reply } => {
                let _ = reply.send(self.state.upsert_geofence(geofence));
            }
            ViewerCommand::ImportGeofences {
                geofences,
                mode,
                reply,
            } => {
                let _ = reply.send(self.state.import_geofences(geofences, mode));
            }
            ViewerCommand::DeleteGeofence { name, reply } => {
                let _ = reply.send(self.state.delete_geofence(&name));
            }
            ViewerCommand::Geofences(reply) => {
                let _ = reply.send(self.state.geofences().cloned().collect());
            }
            ViewerCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            ViewerCommand::Viewport(reply) => {
                let _ = reply.send(self.state.viewport());
            }
        }
    }

    async fn persist_if_changed(&mut self) {
        let revision = self.state.geofence_revision();
        if revision == self.persisted_revision {
            return;
        }

        let geofences: Vec<Geofence> = self.state.geofences().cloned().collect();
        match self.store.save(&geofences).await {
            Ok(()) => self.persisted_revision = revision,
            Err(e) => error!(error = %e, "Failed to persist geofences"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerPublisher;
    use domain::models::{PolygonGeometry, ServerMessage, TestBadgeUpdate};
    use persistence::{BlobStore, MemoryBlobStore};
    use std::sync::Arc;

    fn geofence(name: &str) -> Geofence {
        Geofence {
            name: name.to_string(),
            polygon: PolygonGeometry::Polygon {
                coordinates: vec![vec![
                    vec![77.2, 28.5],
                    vec![77.2, 28.5002],
                    vec![77.2002, 28.5002],
                    vec![77.2, 28.5],
                ]],
            },
            mac: None,
            stroke_color: None,
            stroke_width: None,
            stroke_opacity: None,
        }
    }

    async fn setup(blobs: Arc<MemoryBlobStore>) -> (FanoutBus, ViewerHandle) {
        let bus = FanoutBus::new(64, Arc::new(MockBrokerPublisher::new()), "old");
        let (handle, _task) =
            ViewerSession::spawn(&bus, GeofenceStore::new(blobs), &ViewerConfig::default()).await;
        (bus, handle)
    }

    #[tokio::test]
    async fn test_applies_broadcasts() {
        let (bus, viewer) = setup(Arc::new(MemoryBlobStore::new())).await;

        bus.relay_test_update(TestBadgeUpdate {
            mac: "abc".into(),
            latitude: 1.0,
            longitude: 2.0,
            radius: None,
        });
        bus.broadcast(ServerMessage::GeofenceData(geofence("lobby")));

        // broadcasts and commands race inside the session; poll until applied
        let mut snapshot = viewer.snapshot().await.unwrap();
        for _ in 0..20 {
            if !snapshot.badges.is_empty() && !snapshot.geofences.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = viewer.snapshot().await.unwrap();
        }
        assert_eq!(snapshot.badges[0].mac, "abc");
        assert_eq!(snapshot.geofences[0].name, "lobby");
        assert_eq!(viewer.viewport().await.unwrap().unwrap().zoom, 20);
    }

    #[tokio::test]
    async fn test_geofence_changes_are_persisted() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let (_bus, viewer) = setup(blobs.clone()).await;

        viewer.upsert_geofence(geofence("a")).await.unwrap();
        viewer.upsert_geofence(geofence("b")).await.unwrap();
        assert!(viewer.delete_geofence("a").await.unwrap());
        // persistence runs after the command is answered
        viewer.geofences().await.unwrap();

        let stored = GeofenceStore::new(blobs.clone()).load().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "b");
        assert!(blobs.load(persistence::GEOFENCES_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restores_persisted_catalog() {
        let blobs = Arc::new(MemoryBlobStore::new());
        GeofenceStore::new(blobs.clone())
            .save(&[geofence("dock")])
            .await
            .unwrap();

        let (_bus, viewer) = setup(blobs).await;
        let names: Vec<String> = viewer
            .geofences()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["dock"]);
        assert!(viewer.viewport().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_modes() {
        let (_bus, viewer) = setup(Arc::new(MemoryBlobStore::new())).await;
        viewer.upsert_geofence(geofence("a")).await.unwrap();

        let count = viewer
            .import_geofences(vec![geofence("b")], ImportMode::Merge)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(viewer.geofences().await.unwrap().len(), 2);

        viewer
            .import_geofences(vec![geofence("c")], ImportMode::Replace)
            .await
            .unwrap();
        assert_eq!(viewer.geofences().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_geofence_rejected() {
        let (_bus, viewer) = setup(Arc::new(MemoryBlobStore::new())).await;
        let mut bad = geofence("bad");
        bad.stroke_opacity = Some(2.0);
        assert!(matches!(
            viewer.upsert_geofence(bad).await,
            Err(ApiError::Validation(_))
        ));
    }
}
