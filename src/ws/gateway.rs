//! Event fan-out gateway.
//!
//! Small facade the REST handlers call after a successful write commits.
//! Every operation is a pure broadcast: no return value, no failure mode
//! visible to the caller — a broadcast to an empty room simply goes nowhere.

use std::sync::Arc;

use serde_json::{json, Value};

use super::rooms::RoomRegistry;
use super::{event_room, task_room, user_room, ADMIN_ROOM};

pub struct EventGateway {
    rooms: Arc<RoomRegistry>,
}

impl EventGateway {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// A task was created: tell the owner's connected devices.
    pub fn task_created(&self, owner_id: &str, task: &Value) {
        self.rooms.broadcast(&user_room(owner_id), "task:created", task);
    }

    /// A task changed: tell everyone subscribed to it.
    pub fn task_updated(&self, task_id: &str, task: &Value) {
        self.rooms.broadcast(&task_room(task_id), "task:updated", task);
    }

    /// A task was deleted: tell its subscribers and the owner's devices.
    pub fn task_deleted(&self, task_id: &str, owner_id: &str) {
        let payload = json!({ "taskId": task_id });
        self.rooms.broadcast(&task_room(task_id), "task:deleted", &payload);
        self.rooms.broadcast(&user_room(owner_id), "task:deleted", &payload);
    }

    /// An event changed: tell everyone subscribed to it.
    pub fn event_updated(&self, event_id: &str, event: &Value) {
        self.rooms.broadcast(&event_room(event_id), "event:updated", event);
    }

    /// Direct notification to one user's connected devices.
    pub fn notify_user(&self, user_id: &str, kind: &str, message: &str) {
        let payload = json!({ "type": kind, "message": message });
        self.rooms.broadcast(&user_room(user_id), "notification", &payload);
    }

    /// Broadcast an arbitrary event to the admin room.
    pub fn broadcast_to_admins(&self, event: &str, payload: &Value) {
        self.rooms.broadcast(ADMIN_ROOM, event, payload);
    }
}
