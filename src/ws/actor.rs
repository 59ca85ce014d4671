use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity resolved at handshake time. Immutable for the connection's
/// lifetime — set once before the connection is registered, never mutated.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to send messages to this
/// client; the room registry holds a clone of the sender for fan-out.
pub async fn run_connection(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register in the room registry. This joins the mandatory personal room
    // and, for admins, the admin room, before the connection is observable.
    // The shutdown signal lets the registry force this actor out of its read
    // loop (account deactivation) without waiting on the peer.
    let (conn_id, shutdown) = state.rooms.register(&user.id, user.is_admin, tx.clone());

    // Confirm the handshake to the client.
    let hello = json!({
        "event": "connection_established",
        "data": {
            "message": "Conexión establecida exitosamente",
            "userId": user.id,
        }
    });
    let _ = tx.send(Message::Text(hello.to_string().into()));

    tracing::info!(
        conn_id,
        user_id = %user.id,
        username = %user.username,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages until the peer goes
    // away or the registry signals a forced close.
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!(conn_id, user_id = %user.id, "Server initiated close");
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        protocol::handle_client_message(text.as_str(), conn_id, &state.rooms, &user.id);
                    }
                    Message::Binary(_) => {
                        // The protocol is JSON text frames; binary is ignored.
                        tracing::debug!(
                            conn_id,
                            user_id = %user.id,
                            "Received binary message (expected JSON text)"
                        );
                    }
                    Message::Pong(_) => {
                        // Pong received — notify the ping task
                        let _ = pong_tx.send(());
                    }
                    Message::Ping(data) => {
                        // Respond to client pings with pong
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            conn_id,
                            user_id = %user.id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        conn_id,
                        user_id = %user.id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    // Stream ended — client disconnected
                    tracing::info!(conn_id, user_id = %user.id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Cleanup. Unregister first so room membership drops as soon as the loop
    // exits, then close the writer channel and let the writer flush whatever
    // is queued (a force-close frame included) before it stops.
    ping_handle.abort();
    state.rooms.remove_connection(conn_id);
    drop(tx);
    let _ = timeout(Duration::from_secs(1), writer_handle).await;

    tracing::info!(conn_id, user_id = %user.id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
