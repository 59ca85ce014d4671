//! Shared harness for integration tests: boots the real router on a random
//! port with a temp data dir, and provides REST/WebSocket drivers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use planner_server::mail::LogMailer;
use planner_server::state::AppState;
use planner_server::weather::WeatherService;
use planner_server::ws::gateway::EventGateway;
use planner_server::ws::rooms::RoomRegistry;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub addr: SocketAddr,
    pub state: AppState,
    _tmp: TempDir,
}

/// Start the server with the channel runtime wired up.
pub async fn start_test_server() -> TestServer {
    start_test_server_with_gateway(true).await
}

/// Start the server, optionally without the fan-out gateway to prove REST
/// works independent of channel health.
pub async fn start_test_server_with_gateway(with_gateway: bool) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = planner_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = planner_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let rooms = Arc::new(RoomRegistry::new());
    let gateway = with_gateway.then(|| Arc::new(EventGateway::new(rooms.clone())));

    let state = AppState {
        db,
        jwt_secret,
        token_ttl_secs: 3600,
        rooms,
        gateway,
        // No API key: forecast enrichment is skipped, tasks carry no weather.
        weather: Arc::new(WeatherService::new("http://127.0.0.1:1", None)),
        mailer: Arc::new(LogMailer::new("no-reply@test.local")),
    };

    let app = planner_server::routes::build_router(state.clone(), "*");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        ws_url: format!("ws://{}/ws", addr),
        addr,
        state,
        _tmp: tmp_dir,
    }
}

/// Register a user and return (access_token, user_id).
pub async fn register_user(base_url: &str, username: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "username": username,
            "email": format!("{}@test.local", username),
            "password": "password123",
        }))
        .send()
        .await
        .expect("register request failed");
    assert_eq!(resp.status(), 201, "registration should succeed");

    let body: Value = resp.json().await.unwrap();
    let token = body["data"]["token"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_str().unwrap().to_string();
    (token, user_id)
}

/// Log in and return a fresh access token (picks up role changes).
pub async fn login(base_url: &str, username: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/login", base_url))
        .json(&json!({
            "email": format!("{}@test.local", username),
            "password": "password123",
        }))
        .send()
        .await
        .expect("login request failed");
    assert_eq!(resp.status(), 200, "login should succeed");

    let body: Value = resp.json().await.unwrap();
    body["data"]["token"].as_str().unwrap().to_string()
}

/// Promote a user to admin directly in the database. The admin role is
/// normally assigned out-of-band; a new token must be issued to carry it.
pub fn make_admin(state: &AppState, user_id: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "UPDATE users SET role = 'admin' WHERE id = ?1",
        rusqlite::params![user_id],
    )
    .unwrap();
}

/// Open an authenticated WebSocket connection.
pub async fn connect_ws(ws_url: &str, token: &str) -> WsClient {
    let (stream, _resp) = tokio_tungstenite::connect_async(format!("{}?token={}", ws_url, token))
        .await
        .expect("websocket connect failed");
    stream
}

/// Read the next JSON event frame, skipping transport frames. None on timeout.
pub async fn next_json(stream: &mut WsClient, timeout_ms: u64) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Wait for the next Close frame; returns its close code.
pub async fn next_close_code(stream: &mut WsClient, timeout_ms: u64) -> Option<u16> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => return Some(frame.code.into()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until(timeout_ms: u64, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
