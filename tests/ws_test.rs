//! WebSocket integration tests: handshake auth, subscription protocol,
//! and fan-out from the REST handlers.

mod common;

use futures_util::SinkExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use common::{
    connect_ws, next_close_code, next_json, register_user, start_test_server, wait_until,
};

async fn send_event(stream: &mut common::WsClient, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    stream.send(Message::Text(frame.into())).await.unwrap();
}

/// Drain the post-handshake hello frame.
async fn drain_hello(stream: &mut common::WsClient) -> Value {
    let hello = next_json(stream, 2000).await.expect("no hello frame");
    assert_eq!(hello["event"], "connection_established");
    hello
}

#[tokio::test]
async fn handshake_without_token_is_closed_with_4000() {
    let server = start_test_server().await;

    let (mut stream, _) = tokio_tungstenite::connect_async(&server.ws_url)
        .await
        .expect("upgrade should succeed before the auth close");
    assert_eq!(next_close_code(&mut stream, 2000).await, Some(4000));
}

#[tokio::test]
async fn handshake_with_invalid_token_is_closed_with_4002() {
    let server = start_test_server().await;

    let (mut stream, _) =
        tokio_tungstenite::connect_async(format!("{}?token=not-a-jwt", server.ws_url))
            .await
            .unwrap();
    assert_eq!(next_close_code(&mut stream, 2000).await, Some(4002));
}

#[tokio::test]
async fn handshake_with_expired_token_is_closed_with_4001() {
    let server = start_test_server().await;
    let (_token, user_id) = register_user(&server.base_url, "caduco").await;

    let expired = planner_server::auth::jwt::issue_access_token(
        &server.state.jwt_secret,
        &user_id,
        "caduco",
        "user",
        -3600,
    )
    .unwrap();

    let (mut stream, _) =
        tokio_tungstenite::connect_async(format!("{}?token={}", server.ws_url, expired))
            .await
            .unwrap();
    assert_eq!(next_close_code(&mut stream, 2000).await, Some(4001));
}

#[tokio::test]
async fn handshake_for_unknown_user_is_closed_with_4003() {
    let server = start_test_server().await;

    // Properly signed token for a user that was never registered.
    let orphan = planner_server::auth::jwt::issue_access_token(
        &server.state.jwt_secret,
        "no-such-user",
        "fantasma",
        "user",
        3600,
    )
    .unwrap();

    let (mut stream, _) =
        tokio_tungstenite::connect_async(format!("{}?token={}", server.ws_url, orphan))
            .await
            .unwrap();
    assert_eq!(next_close_code(&mut stream, 2000).await, Some(4003));
}

#[tokio::test]
async fn handshake_accepts_bearer_header() {
    let server = start_test_server().await;
    let (token, user_id) = register_user(&server.base_url, "cabecera").await;

    let mut request = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        server.ws_url.as_str(),
    )
    .unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let (mut stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let hello = drain_hello(&mut stream).await;
    assert_eq!(hello["data"]["userId"], user_id.as_str());
}

#[tokio::test]
async fn successful_handshake_sends_hello_and_joins_user_room() {
    let server = start_test_server().await;
    let (token, user_id) = register_user(&server.base_url, "saludo").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    let hello = drain_hello(&mut stream).await;
    assert_eq!(hello["data"]["userId"], user_id.as_str());

    let rooms = server.state.rooms.clone();
    let room = format!("user:{}", user_id);
    assert!(wait_until(2000, || rooms.member_count(&room) == 1).await);
    assert_eq!(rooms.member_count("admins"), 0);
}

#[tokio::test]
async fn double_subscribe_delivers_update_exactly_once() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "doble").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;

    send_event(&mut stream, "task:subscribe", json!("t1")).await;
    send_event(&mut stream, "task:subscribe", json!("t1")).await;

    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("task:t1") == 1).await);

    let gateway = server.state.gateway.as_ref().unwrap();
    gateway.task_updated("t1", &json!({ "id": "t1", "status": "completada" }));

    let event = next_json(&mut stream, 2000).await.expect("no update");
    assert_eq!(event["event"], "task:updated");
    assert_eq!(event["data"]["status"], "completada");
    assert!(next_json(&mut stream, 300).await.is_none());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "baja").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;

    send_event(&mut stream, "task:subscribe", json!("t9")).await;
    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("task:t9") == 1).await);

    send_event(&mut stream, "task:unsubscribe", json!("t9")).await;
    assert!(wait_until(2000, || rooms.member_count("task:t9") == 0).await);

    let gateway = server.state.gateway.as_ref().unwrap();
    gateway.task_updated("t9", &json!({ "id": "t9" }));
    assert!(next_json(&mut stream, 300).await.is_none());
}

#[tokio::test]
async fn malformed_frames_are_ignored_and_connection_survives() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "ruido").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;

    stream
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    send_event(&mut stream, "task:subscribe", json!(42)).await;
    send_event(&mut stream, "task:subscribe", json!("")).await;
    send_event(&mut stream, "unknown:verb", json!("t1")).await;

    // Connection stays usable after the garbage.
    send_event(&mut stream, "event:subscribe", json!("e1")).await;
    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("event:e1") == 1).await);
    assert_eq!(rooms.member_count("task:42"), 0);
    assert_eq!(rooms.member_count("task:"), 0);
}

#[tokio::test]
async fn admin_broadcast_skips_regular_connections() {
    let server = start_test_server().await;
    let (_token, admin_id) = register_user(&server.base_url, "jefa").await;
    common::make_admin(&server.state, &admin_id);
    let admin_token = common::login(&server.base_url, "jefa").await;
    let (user_token, _user_id) = register_user(&server.base_url, "normal").await;

    let mut admin_stream = connect_ws(&server.ws_url, &admin_token).await;
    drain_hello(&mut admin_stream).await;
    let mut user_stream = connect_ws(&server.ws_url, &user_token).await;
    drain_hello(&mut user_stream).await;

    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("admins") == 1).await);

    let gateway = server.state.gateway.as_ref().unwrap();
    gateway.broadcast_to_admins("system_alert", &json!({ "detail": "mantenimiento" }));

    let event = next_json(&mut admin_stream, 2000).await.expect("no alert");
    assert_eq!(event["event"], "system_alert");
    assert!(next_json(&mut user_stream, 300).await.is_none());
}

#[tokio::test]
async fn updates_arrive_in_publish_order() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "orden").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;
    send_event(&mut stream, "task:subscribe", json!("t5")).await;

    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("task:t5") == 1).await);

    let gateway = server.state.gateway.as_ref().unwrap();
    gateway.task_updated("t5", &json!({ "id": "t5", "status": "en progreso" }));
    gateway.task_deleted("t5", "someone-else");

    assert_eq!(next_json(&mut stream, 2000).await.unwrap()["event"], "task:updated");
    let deleted = next_json(&mut stream, 2000).await.unwrap();
    assert_eq!(deleted["event"], "task:deleted");
    assert_eq!(deleted["data"]["taskId"], "t5");
}

#[tokio::test]
async fn rest_task_lifecycle_fans_out_to_subscribers() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "flujo").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/tasks", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "title": "regar las plantas",
            "description": "balcón",
            "dueDate": "2026-09-15",
            "city": "Madrid",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let task_id = body["data"]["id"].as_str().unwrap().to_string();

    // Creation notifies the owner's personal room.
    let created = next_json(&mut stream, 2000).await.expect("no task:created");
    assert_eq!(created["event"], "task:created");
    assert_eq!(created["data"]["id"], task_id.as_str());

    send_event(&mut stream, "task:subscribe", json!(task_id.clone())).await;
    let rooms = server.state.rooms.clone();
    let room = format!("task:{}", task_id);
    assert!(wait_until(2000, || rooms.member_count(&room) == 1).await);

    let resp = client
        .patch(format!("{}/api/tasks/{}/status", server.base_url, task_id))
        .bearer_auth(&token)
        .json(&json!({ "status": "completada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let updated = next_json(&mut stream, 2000).await.expect("no task:updated");
    assert_eq!(updated["event"], "task:updated");
    assert_eq!(updated["data"]["status"], "completada");

    let resp = client
        .delete(format!("{}/api/tasks/{}", server.base_url, task_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Subscribed AND owner: the delete lands once per room membership.
    let first = next_json(&mut stream, 2000).await.expect("no task:deleted");
    assert_eq!(first["event"], "task:deleted");
    assert_eq!(first["data"]["taskId"], task_id.as_str());
    let second = next_json(&mut stream, 2000).await.expect("only one task:deleted");
    assert_eq!(second["event"], "task:deleted");
}

#[tokio::test]
async fn disconnect_sweeps_all_room_memberships() {
    let server = start_test_server().await;
    let (token, user_id) = register_user(&server.base_url, "barrido").await;

    let mut stream = connect_ws(&server.ws_url, &token).await;
    drain_hello(&mut stream).await;
    send_event(&mut stream, "task:subscribe", json!("t1")).await;
    send_event(&mut stream, "event:subscribe", json!("e1")).await;

    let rooms = server.state.rooms.clone();
    assert!(wait_until(2000, || rooms.member_count("task:t1") == 1).await);
    assert!(wait_until(2000, || rooms.member_count("event:e1") == 1).await);

    stream.close(None).await.unwrap();
    drop(stream);

    assert!(wait_until(3000, || rooms.connection_count() == 0).await);
    assert_eq!(rooms.member_count("task:t1"), 0);
    assert_eq!(rooms.member_count("event:e1"), 0);
    assert_eq!(rooms.member_count(&format!("user:{}", user_id)), 0);
}
