//! WebSocket handler for realtime change feeds.
//!
//! Handles WebSocket connections and dispatches subscribe/unsubscribe
//! requests to the connection manager.

use axum::extract::ws::{Message, WebSocket};
use duet_engine::RemoteStore;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::routes::validate_collection;
use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};
use crate::AppState;

/// Handle an established WebSocket connection.
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, ws_receiver) = socket.split();
    serve_socket(ws_sender, ws_receiver, state).await;
}

/// Run one client session over a message sink and stream.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Closes the connection's subscriptions on disconnect
pub async fn serve_socket<S, R, E>(mut ws_sender: S, mut ws_receiver: R, state: AppState)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_manager = state.conn_manager.clone();
    let conn_id = conn_manager.register(tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &conn_manager, &conn_id, &state).await;
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
                conn_manager.send_to(
                    &conn_id,
                    ServerMessage::error("Binary messages not supported", None),
                );
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id, &state.remote).await;
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
pub async fn process_message(
    text: &str,
    conn_manager: &ConnectionManager,
    conn_id: &str,
    state: &AppState,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };
    let remote: &dyn RemoteStore = &state.remote;

    match client_msg {
        ClientMessage::Subscribe {
            collection,
            request_id,
        } => {
            if let Err(e) = validate_collection(&collection) {
                return ServerMessage::error(e.to_string(), request_id);
            }
            match conn_manager.subscribe(conn_id, &collection, remote).await {
                Ok(_) => ServerMessage::Subscribed {
                    collection,
                    request_id,
                },
                Err(e) => ServerMessage::error(e.to_string(), request_id),
            }
        }

        ClientMessage::Unsubscribe {
            collection,
            request_id,
        } => {
            if conn_manager.unsubscribe(conn_id, &collection, remote).await {
                ServerMessage::Unsubscribed {
                    collection,
                    request_id,
                }
            } else {
                ServerMessage::error(format!("Not subscribed to {collection}"), request_id)
            }
        }

        ClientMessage::Ping => ServerMessage::Pong,
    }
}
