//! Viewer WebSocket endpoint.
//!
//! Each connection gets its own bus subscription. Broadcasts and direct replies
//! (publish acknowledgements, catalog answers) share one outbound writer.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use domain::models::{ClientMessage, ServerMessage};

use crate::app::AppState;
use crate::bus::Subscription;
use crate::middleware::metrics::record_viewer_connections;

/// Pending direct replies per connection.
const DIRECT_REPLY_CAPACITY: usize = 32;

/// Upgrade to the viewer protocol.
///
/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let subscription = state.bus.subscribe();
    let viewer = subscription.id();
    record_viewer_connections(1.0);
    info!(viewer, "Viewer connected");

    let (sink, mut stream) = socket.split();
    let (direct_tx, direct_rx) = mpsc::channel(DIRECT_REPLY_CAPACITY);
    let mut send_task = tokio::spawn(write_loop(sink, subscription, direct_rx));

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    handle_client_frame(&recv_state, viewer, &text, &direct_tx).await
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(viewer, error = %e, "Viewer socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    record_viewer_connections(-1.0);
    info!(viewer, "Viewer disconnected");
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    mut direct: mpsc::Receiver<ServerMessage>,
) {
    loop {
        let message = tokio::select! {
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
            Some(message) = direct.recv() => message,
        };

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode relay message");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn handle_client_frame(
    state: &AppState,
    viewer: u64,
    text: &str,
    direct: &mpsc::Sender<ServerMessage>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(viewer, error = %e, "Ignoring malformed viewer message");
            return;
        }
    };

    match message {
        ClientMessage::TestBadgeUpdate(update) => {
            state.bus.relay_test_update(update);
        }
        ClientMessage::PublishBadgeLocation(request) => {
            let reply = state.bus.publish_request(&request).await;
            let _ = direct.send(reply).await;
        }
        ClientMessage::RequestGeofences => match state.viewer.geofences().await {
            Ok(geofences) => {
                debug!(viewer, count = geofences.len(), "Sending geofence catalog");
                for geofence in geofences {
                    if direct.send(ServerMessage::GeofenceData(geofence)).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => warn!(viewer, error = %e, "Geofence catalog unavailable"),
        },
    }
}
