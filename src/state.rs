use std::sync::Arc;

use crate::db::DbPool;
use crate::mail::Mailer;
use crate::weather::WeatherService;
use crate::ws::gateway::EventGateway;
use crate::ws::rooms::RoomRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub token_ttl_secs: i64,
    /// Room membership table for active WebSocket connections
    pub rooms: Arc<RoomRegistry>,
    /// Fan-out gateway invoked by REST handlers after successful writes.
    /// None when the channel runtime is not wired up; REST must keep
    /// working without it, so every call site checks before emitting.
    pub gateway: Option<Arc<EventGateway>>,
    /// Forecast lookup collaborator
    pub weather: Arc<WeatherService>,
    /// Outbound mail collaborator
    pub mailer: Arc<dyn Mailer>,
}
