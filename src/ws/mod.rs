pub mod actor;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod rooms;

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

/// Stable identifier for one WebSocket connection.
pub type ConnId = u64;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Handle the registry uses to tell a connection actor to stop. The actor
/// selects on it next to the socket, so a force-close takes effect without
/// waiting for the peer or the ping liveness cycle.
pub type ShutdownSignal = Arc<Notify>;

/// Room every admin connection is joined to at handshake time.
pub const ADMIN_ROOM: &str = "admins";

/// Personal room a connection is always joined to at handshake time.
pub fn user_room(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Room carrying updates for a single task.
pub fn task_room(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Room carrying updates for a single event.
pub fn event_room(event_id: &str) -> String {
    format!("event:{event_id}")
}
