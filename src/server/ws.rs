use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use super::registry::WsConnection;
use super::AppState;
use crate::logging;
use crate::shutdown;

pub async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| viewer_session(socket, state))
}

/// Registers the viewer, then relays its outbox to the socket until either
/// side goes away. The viewer is unregistered on every exit path.
async fn viewer_session(socket: WebSocket, state: AppState) {
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(state.config.outbox_capacity);
    let id = state
        .registry
        .register(Arc::new(WsConnection::new(outbox_tx)));
    logging::info(
        "ws.client.connected",
        "Viewer connected",
        json!({ "connection": id, "viewers": state.registry.len() }),
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // push-only protocol: anything but a close frame is ignored
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let stop = state.shutdown.clone();
    let writer = async move {
        loop {
            tokio::select! {
                message = outbox_rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(err) = ws_sender.send(message).await {
                        logging::info(
                            "ws.client.write_error",
                            "Viewer write failed",
                            json!({ "connection": id, "error": err.to_string() }),
                        );
                        break;
                    }
                }
                _ = shutdown::wait_for_stop(stop.clone()) => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = &mut reader => {}
    }

    reader.abort();
    let _ = reader.await;
    state.registry.unregister(id);
    logging::info(
        "ws.client.disconnected",
        "Viewer disconnected",
        json!({ "connection": id, "viewers": state.registry.len() }),
    );
}
