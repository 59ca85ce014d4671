//! Room registry: per-connection membership in named broadcast groups.
//!
//! Rooms exist implicitly while at least one connection is a member.
//! `user:<id>` and `admins` memberships are assigned at registration time and
//! are not client-controllable; `task:<id>` / `event:<id>` memberships are
//! driven by the subscription protocol.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Notify;

use super::{user_room, ConnId, ConnectionSender, ShutdownSignal, ADMIN_ROOM};

struct ConnectionEntry {
    user_id: String,
    sender: ConnectionSender,
    /// Signalled to make the connection actor exit its read loop.
    shutdown: ShutdownSignal,
    /// Rooms this connection has joined. Kept alongside the sender so
    /// disconnect cleanup does not scan every room.
    rooms: HashSet<String>,
}

/// Registry of live connections and their room memberships.
///
/// The two maps are the only shared mutable state of the realtime core.
/// Every operation holds at most one shard guard at a time: membership sets
/// are copied out before the other map is touched, so concurrent
/// join/leave/broadcast cannot deadlock across shards.
pub struct RoomRegistry {
    next_conn_id: AtomicU64,
    connections: DashMap<ConnId, ConnectionEntry>,
    rooms: DashMap<String, HashSet<ConnId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            next_conn_id: AtomicU64::new(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a freshly authenticated connection. The connection is joined
    /// to its personal `user:<id>` room and, for admins, to `admins` — these
    /// joins are mandatory and happen before the connection is visible to
    /// the application layer. The returned signal is what `close_user` fires;
    /// the actor must select on it next to the socket.
    pub fn register(
        &self,
        user_id: &str,
        is_admin: bool,
        sender: ConnectionSender,
    ) -> (ConnId, ShutdownSignal) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let shutdown = Arc::new(Notify::new());

        let mut initial_rooms = HashSet::new();
        initial_rooms.insert(user_room(user_id));
        if is_admin {
            initial_rooms.insert(ADMIN_ROOM.to_string());
        }

        self.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id: user_id.to_string(),
                sender,
                shutdown: shutdown.clone(),
                rooms: initial_rooms.clone(),
            },
        );
        for room in initial_rooms {
            self.rooms.entry(room).or_default().insert(conn_id);
        }

        tracing::debug!(conn_id, user_id = %user_id, "connection registered");
        (conn_id, shutdown)
    }

    /// Join a room. Re-joining a room already joined is a no-op.
    pub fn join(&self, conn_id: ConnId, room: &str) {
        let newly_joined = match self.connections.get_mut(&conn_id) {
            Some(mut entry) => entry.rooms.insert(room.to_string()),
            // Connection raced with its own disconnect; nothing to do.
            None => return,
        };
        if newly_joined {
            self.rooms.entry(room.to_string()).or_default().insert(conn_id);
            tracing::debug!(conn_id, room, "joined room");
        }
    }

    /// Leave a room. Leaving a room never joined, or double-leaving, is a no-op.
    pub fn leave(&self, conn_id: ConnId, room: &str) {
        let was_member = match self.connections.get_mut(&conn_id) {
            Some(mut entry) => entry.rooms.remove(room),
            None => return,
        };
        if was_member {
            self.drop_member(room, conn_id);
            tracing::debug!(conn_id, room, "left room");
        }
    }

    /// Deliver `{event, data}` to every current member of the room.
    /// A room with zero members is a silent no-op. Delivery order across
    /// members is unspecified; per-member ordering follows call order because
    /// each member's writer channel is filled synchronously here.
    pub fn broadcast(&self, room: &str, event: &str, data: &Value) {
        let members: Vec<ConnId> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return,
        };

        let envelope = json!({ "event": event, "data": data });
        let msg = Message::Text(envelope.to_string().into());

        for conn_id in members {
            if let Some(entry) = self.connections.get(&conn_id) {
                // A closed channel means the actor is tearing down; its
                // cleanup removes the membership.
                let _ = entry.sender.send(msg.clone());
            }
        }
        tracing::trace!(room, event, "broadcast dispatched");
    }

    /// Remove a connection from the registry and from every room it joined.
    /// Called from the connection actor on disconnect.
    pub fn remove_connection(&self, conn_id: ConnId) {
        let Some((_, entry)) = self.connections.remove(&conn_id) else {
            return;
        };
        for room in &entry.rooms {
            self.drop_member(room, conn_id);
        }
        tracing::debug!(conn_id, user_id = %entry.user_id, "connection unregistered");
    }

    /// Force-close every live connection of a user (account deactivation).
    /// Queues a Close frame for the peer, then signals each actor to stop;
    /// the actor unregisters on exit without waiting for the close handshake
    /// or the ping liveness cycle.
    pub fn close_user(&self, user_id: &str, code: u16, reason: &str) {
        let targets: Vec<(ConnectionSender, ShutdownSignal)> = self
            .connections
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| (entry.sender.clone(), entry.shutdown.clone()))
            .collect();

        for (sender, shutdown) in targets {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            let _ = sender.send(Message::Close(Some(frame)));
            shutdown.notify_one();
        }
    }

    /// Number of current members of a room.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Rooms a connection is currently a member of.
    pub fn rooms_of(&self, conn_id: ConnId) -> Vec<String> {
        self.connections
            .get(&conn_id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn drop_member(&self, room: &str, conn_id: ConnId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
        }
        // Drop empty rooms so the table doesn't grow without bound.
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::task_room;
    use tokio::sync::mpsc;

    fn connect(
        registry: &RoomRegistry,
        user_id: &str,
        is_admin: bool,
    ) -> (ConnId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn_id, _shutdown) = registry.register(user_id, is_admin, tx);
        (conn_id, rx)
    }

    fn recv_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Value> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        }
    }

    #[test]
    fn register_joins_personal_room_only_for_regular_user() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect(&registry, "u1", false);

        let rooms = registry.rooms_of(conn);
        assert_eq!(rooms, vec!["user:u1".to_string()]);
        assert_eq!(registry.member_count(ADMIN_ROOM), 0);
    }

    #[test]
    fn register_joins_admin_room_for_admin() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect(&registry, "a1", true);

        let mut rooms = registry.rooms_of(conn);
        rooms.sort();
        assert_eq!(rooms, vec!["admins".to_string(), "user:a1".to_string()]);
    }

    #[test]
    fn join_is_idempotent() {
        let registry = RoomRegistry::new();
        let (conn, mut rx) = connect(&registry, "u1", false);

        registry.join(conn, &task_room("t1"));
        registry.join(conn, &task_room("t1"));
        assert_eq!(registry.member_count(&task_room("t1")), 1);

        // A single membership means a single delivery.
        registry.broadcast(&task_room("t1"), "task:updated", &json!({"id": "t1"}));
        assert!(recv_event(&mut rx).is_some());
        assert!(recv_event(&mut rx).is_none());
    }

    #[test]
    fn leave_unknown_room_and_double_leave_are_noops() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect(&registry, "u1", false);

        registry.leave(conn, &task_room("never-joined"));
        registry.join(conn, &task_room("t1"));
        registry.leave(conn, &task_room("t1"));
        registry.leave(conn, &task_room("t1"));
        assert_eq!(registry.member_count(&task_room("t1")), 0);
    }

    #[test]
    fn broadcast_to_empty_room_is_silent() {
        let registry = RoomRegistry::new();
        registry.broadcast("task:ghost", "task:updated", &json!({}));
    }

    #[test]
    fn broadcast_reaches_members_only() {
        let registry = RoomRegistry::new();
        let (member, mut member_rx) = connect(&registry, "u1", false);
        let (_other, mut other_rx) = connect(&registry, "u2", false);

        registry.join(member, &task_room("t1"));
        registry.broadcast(&task_room("t1"), "task:updated", &json!({"status": "completada"}));

        let event = recv_event(&mut member_rx).unwrap();
        assert_eq!(event["event"], "task:updated");
        assert_eq!(event["data"]["status"], "completada");
        assert!(recv_event(&mut other_rx).is_none());
    }

    #[test]
    fn broadcasts_arrive_in_order() {
        let registry = RoomRegistry::new();
        let (conn, mut rx) = connect(&registry, "u1", false);
        registry.join(conn, &task_room("t1"));

        registry.broadcast(&task_room("t1"), "task:updated", &json!({"id": "t1"}));
        registry.broadcast(&task_room("t1"), "task:deleted", &json!({"taskId": "t1"}));

        assert_eq!(recv_event(&mut rx).unwrap()["event"], "task:updated");
        assert_eq!(recv_event(&mut rx).unwrap()["event"], "task:deleted");
    }

    #[test]
    fn remove_connection_sweeps_all_memberships() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect(&registry, "u1", false);
        registry.join(conn, &task_room("t1"));
        registry.join(conn, "event:e1");

        registry.remove_connection(conn);

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.member_count(&task_room("t1")), 0);
        assert_eq!(registry.member_count("event:e1"), 0);
        assert_eq!(registry.member_count("user:u1"), 0);
    }

    #[test]
    fn close_user_sends_close_frame_to_all_their_connections() {
        let registry = RoomRegistry::new();
        let (_c1, mut rx1) = connect(&registry, "u1", false);
        let (_c2, mut rx2) = connect(&registry, "u1", false);
        let (_c3, mut rx3) = connect(&registry, "u2", false);

        registry.close_user("u1", 4004, "Account deactivated");

        assert!(matches!(rx1.try_recv(), Ok(Message::Close(Some(_)))));
        assert!(matches!(rx2.try_recv(), Ok(Message::Close(Some(_)))));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_user_signals_the_connection_actor() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_conn, shutdown) = registry.register("u1", false, tx);

        registry.close_user("u1", 4004, "Account deactivated");

        // Close frame for the peer, shutdown signal for the actor.
        assert!(matches!(rx.try_recv(), Ok(Message::Close(Some(_)))));
        tokio::time::timeout(std::time::Duration::from_millis(100), shutdown.notified())
            .await
            .expect("actor was not signalled to stop");
    }
}
