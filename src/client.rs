//! Realtime client: owns one logical WebSocket connection to the server.
//!
//! Mirrors the frontend service contract: an idempotent `connect()`, topic
//! listeners keyed by generated ids, and a single reconnect attempt 3 seconds
//! after an involuntary drop while a credential is still stored. The retry
//! loop is driven by repeated drop events with no backoff — a simplification,
//! not a production delivery guarantee. Room subscriptions are NOT replayed
//! after a reconnect; each consumer re-subscribes to the topics it cares
//! about when it comes back up.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Delay before the single reconnect attempt that follows a drop.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Identifier returned by `add_listener`, usable for removal.
pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect()` was called with no stored credential.
    #[error("no active session")]
    NoSession,
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connection lifecycle. `Disconnected` is both the initial state and the
/// terminal state after an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Base WebSocket URL, e.g. `ws://127.0.0.1:5050/ws`.
    url: String,
    reconnect_delay: Duration,
    token: Mutex<Option<String>>,
    state: Mutex<ConnState>,
    /// Bumped on explicit disconnect so in-flight reader tasks and pending
    /// reconnect timers from the previous session become inert.
    session_generation: AtomicU64,
    listeners: Mutex<HashMap<String, HashMap<ListenerId, Callback>>>,
    next_listener_id: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Serializes concurrent connect() calls.
    connect_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RealtimeClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                reconnect_delay: RECONNECT_DELAY,
                token: Mutex::new(None),
                state: Mutex::new(ConnState::Disconnected),
                session_generation: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                outbound: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Store or clear the credential presented at the next handshake.
    pub fn set_token(&self, token: Option<String>) {
        *lock(&self.inner.token) = token;
    }

    pub fn state(&self) -> ConnState {
        *lock(&self.inner.state)
    }

    /// Open the connection. Resolves immediately if already open; fails
    /// without attempting a connection when no credential is stored. A failed
    /// attempt leaves the client disconnected and schedules no retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        ClientInner::connect(self.inner.clone()).await
    }

    /// Explicit logout: tear down the transport, clear every listener
    /// registration, and stop reconnecting until `connect()` is called again.
    pub fn disconnect(&self) {
        self.inner.session_generation.fetch_add(1, Ordering::SeqCst);
        *lock(&self.inner.state) = ConnState::Disconnected;
        if let Some(tx) = lock(&self.inner.outbound).take() {
            let _ = tx.send(Message::Close(None));
        }
        lock(&self.inner.listeners).clear();
        tracing::debug!("realtime client disconnected by caller");
    }

    /// Register a callback for a server event topic (e.g. `task:updated`).
    pub fn add_listener(
        &self,
        topic: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners)
            .entry(topic.to_string())
            .or_default()
            .insert(id, Arc::new(callback));
        id
    }

    /// Remove a listener. Removing an unknown id is a no-op.
    pub fn remove_listener(&self, topic: &str, id: ListenerId) {
        if let Some(map) = lock(&self.inner.listeners).get_mut(topic) {
            map.remove(&id);
        }
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.inner.listeners)
            .get(topic)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub fn subscribe_to_task(&self, task_id: &str) {
        self.inner.emit("task:subscribe", task_id);
    }

    pub fn unsubscribe_from_task(&self, task_id: &str) {
        self.inner.emit("task:unsubscribe", task_id);
    }

    pub fn subscribe_to_event(&self, event_id: &str) {
        self.inner.emit("event:subscribe", event_id);
    }

    pub fn unsubscribe_from_event(&self, event_id: &str) {
        self.inner.emit("event:unsubscribe", event_id);
    }

    #[cfg(test)]
    fn dispatch(&self, text: &str) {
        self.inner.dispatch(text);
    }
}

impl ClientInner {
    /// Boxed because the reconnect timer re-enters `connect` from a spawned
    /// task; boxing keeps the future type finite.
    fn connect(inner: Arc<Self>) -> BoxFuture<'static, Result<(), ClientError>> {
        Box::pin(async move {
            let _guard = inner.connect_lock.lock().await;

            if *lock(&inner.state) == ConnState::Open {
                return Ok(());
            }
            let token = lock(&inner.token).clone().ok_or(ClientError::NoSession)?;

            *lock(&inner.state) = ConnState::Connecting;
            let url = format!("{}?token={}", inner.url, token);

            let (stream, _response) = match connect_async(&url).await {
                Ok(ok) => ok,
                Err(err) => {
                    *lock(&inner.state) = ConnState::Disconnected;
                    return Err(err.into());
                }
            };

            let (mut sink, stream) = stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            *lock(&inner.outbound) = Some(tx);

            // Writer task: forwards queued messages to the sink.
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
            });

            let generation = inner.session_generation.load(Ordering::SeqCst);
            tokio::spawn(Self::read_loop(inner.clone(), stream, generation));

            *lock(&inner.state) = ConnState::Open;
            tracing::debug!("realtime client connected");
            Ok(())
        })
    }

    async fn read_loop(
        inner: Arc<Self>,
        mut stream: futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
        >,
        generation: u64,
    ) {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => inner.dispatch(text.as_str()),
                Ok(Message::Ping(data)) => {
                    // The server closes connections that miss pongs.
                    if let Some(tx) = lock(&inner.outbound).as_ref() {
                        let _ = tx.send(Message::Pong(data));
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "websocket receive error");
                    break;
                }
            }
        }

        // An explicit disconnect already tore the session down.
        if inner.session_generation.load(Ordering::SeqCst) != generation {
            return;
        }

        lock(&inner.outbound).take();
        let token_present = lock(&inner.token).is_some();
        *lock(&inner.state) = if token_present {
            ConnState::Reconnecting
        } else {
            ConnState::Disconnected
        };

        if !token_present {
            return;
        }

        // Involuntary drop with a live session: one reconnect attempt after a
        // fixed delay. If the attempt itself fails we stay disconnected; only
        // another drop of an open connection schedules a new attempt.
        tracing::info!(
            delay_secs = inner.reconnect_delay.as_secs(),
            "connection dropped, scheduling reconnect"
        );
        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.reconnect_delay).await;
            if inner.session_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            // The caller may have reconnected (or logged out) during the
            // delay; the timer only acts while the drop is still unresolved.
            {
                let mut state = lock(&inner.state);
                if *state != ConnState::Reconnecting {
                    return;
                }
                *state = ConnState::Disconnected;
            }
            if let Err(err) = Self::connect(inner.clone()).await {
                tracing::warn!(error = %err, "reconnect attempt failed");
            }
        });
    }

    /// Decode a server frame and fan it out to the topic's listeners.
    /// A panicking callback is logged and never suppresses delivery to the
    /// remaining callbacks.
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed server frame");
                return;
            }
        };
        let Some(topic) = frame.get("event").and_then(Value::as_str) else {
            return;
        };
        let data = frame.get("data").cloned().unwrap_or(Value::Null);

        // Clone the callbacks out so user code never runs under our lock.
        let callbacks: Vec<Callback> = lock(&self.listeners)
            .get(topic)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&data))).is_err() {
                tracing::error!(topic, "listener callback panicked");
            }
        }
    }

    fn emit(&self, event: &str, id: &str) {
        if *lock(&self.state) != ConnState::Open {
            return;
        }
        if let Some(tx) = lock(&self.outbound).as_ref() {
            let frame = json!({ "event": event, "data": id });
            let _ = tx.send(Message::Text(frame.to_string().into()));
        }
    }
}
