//! Registration, login and profile flow.

mod common;

use serde_json::{json, Value};

use common::{register_user, start_test_server};

#[tokio::test]
async fn register_returns_user_and_token() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", server.base_url))
        .json(&json!({
            "username": "lucia",
            "email": "lucia@test.local",
            "password": "password123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["username"], "lucia");
    assert_eq!(body["data"]["user"]["role"], "user");
    assert!(body["data"]["token"].as_str().is_some());
    // The password hash never leaves the server.
    assert!(body["data"]["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn duplicate_email_is_rejected_with_409() {
    let server = start_test_server().await;
    register_user(&server.base_url, "primero").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", server.base_url))
        .json(&json!({
            "username": "segundo",
            "email": "primero@test.local",
            "password": "password123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn weak_password_is_rejected() {
    let server = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/auth/register", server.base_url))
        .json(&json!({
            "username": "corta",
            "email": "corta@test.local",
            "password": "abc",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn login_with_wrong_password_returns_401() {
    let server = start_test_server().await;
    register_user(&server.base_url, "paco").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/login", server.base_url))
        .json(&json!({ "email": "paco@test.local", "password": "equivocada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Credenciales inválidas");
}

#[tokio::test]
async fn profile_requires_and_honors_the_token() {
    let server = start_test_server().await;
    let (token, user_id) = register_user(&server.base_url, "perfil").await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/auth/profile", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{}/api/auth/profile", server.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["id"], user_id.as_str());
    assert_eq!(body["data"]["email"], "perfil@test.local");
}

#[tokio::test]
async fn change_password_invalidates_the_old_one() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "clave").await;

    let client = reqwest::Client::new();
    let resp = client
        .put(format!("{}/api/auth/password", server.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "currentPassword": "password123",
            "newPassword": "otraclave456",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/auth/login", server.base_url))
        .json(&json!({ "email": "clave@test.local", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/api/auth/login", server.base_url))
        .json(&json!({ "email": "clave@test.local", "password": "otraclave456" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
