//! Client→server subscription protocol.
//!
//! An authenticated connection manages its `task:<id>` / `event:<id>` room
//! memberships with fire-and-forget JSON messages; no acknowledgement is
//! sent. Malformed messages are logged and ignored — they never close the
//! connection.

use serde::Deserialize;
use serde_json::Value;

use super::rooms::RoomRegistry;
use super::{event_room, task_room, ConnId};

/// Envelope for messages sent by the client:
/// `{"event": "task:subscribe", "data": "<taskId>"}`.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Handle one incoming text frame from an authenticated connection.
///
/// Note: there is deliberately no ownership check here — any authenticated
/// user may subscribe to any task/event room. Authorization for which tasks
/// a user may read is enforced by the REST layer only; this is a known
/// scope limitation of the protocol, preserved as-is.
pub fn handle_client_message(text: &str, conn_id: ConnId, rooms: &RoomRegistry, user_id: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::debug!(
                conn_id,
                user_id = %user_id,
                error = %err,
                "ignoring malformed client message"
            );
            return;
        }
    };

    // All subscription messages carry a single non-empty string identifier.
    let id = match msg.data.as_str() {
        Some(id) if !id.is_empty() => id,
        _ => {
            tracing::debug!(
                conn_id,
                user_id = %user_id,
                event = %msg.event,
                "ignoring subscription message without a string identifier"
            );
            return;
        }
    };

    match msg.event.as_str() {
        "task:subscribe" => rooms.join(conn_id, &task_room(id)),
        "task:unsubscribe" => rooms.leave(conn_id, &task_room(id)),
        "event:subscribe" => rooms.join(conn_id, &event_room(id)),
        "event:unsubscribe" => rooms.leave(conn_id, &event_room(id)),
        other => {
            tracing::debug!(conn_id, user_id = %user_id, event = %other, "unknown client event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_with_conn() -> (RoomRegistry, ConnId) {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (conn, _shutdown) = registry.register("u1", false, tx);
        (registry, conn)
    }

    #[test]
    fn subscribe_joins_task_room() {
        let (registry, conn) = registry_with_conn();
        handle_client_message(r#"{"event":"task:subscribe","data":"t1"}"#, conn, &registry, "u1");
        assert_eq!(registry.member_count("task:t1"), 1);
    }

    #[test]
    fn unsubscribe_leaves_task_room() {
        let (registry, conn) = registry_with_conn();
        handle_client_message(r#"{"event":"task:subscribe","data":"t1"}"#, conn, &registry, "u1");
        handle_client_message(r#"{"event":"task:unsubscribe","data":"t1"}"#, conn, &registry, "u1");
        assert_eq!(registry.member_count("task:t1"), 0);
    }

    #[test]
    fn event_rooms_are_symmetric() {
        let (registry, conn) = registry_with_conn();
        handle_client_message(r#"{"event":"event:subscribe","data":"e1"}"#, conn, &registry, "u1");
        assert_eq!(registry.member_count("event:e1"), 1);
        handle_client_message(r#"{"event":"event:unsubscribe","data":"e1"}"#, conn, &registry, "u1");
        assert_eq!(registry.member_count("event:e1"), 0);
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        let (registry, conn) = registry_with_conn();

        // Not JSON at all
        handle_client_message("not json", conn, &registry, "u1");
        // Identifier is not a string
        handle_client_message(r#"{"event":"task:subscribe","data":42}"#, conn, &registry, "u1");
        // Identifier is empty
        handle_client_message(r#"{"event":"task:subscribe","data":""}"#, conn, &registry, "u1");
        // Missing data field
        handle_client_message(r#"{"event":"task:subscribe"}"#, conn, &registry, "u1");

        // Only the mandatory personal room remains.
        assert_eq!(registry.rooms_of(conn), vec!["user:u1".to_string()]);
    }
}
