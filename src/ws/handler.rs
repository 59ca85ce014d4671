use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor::{self, AuthenticatedUser};

/// Query parameters for WebSocket connection.
/// The token may come from `?token=JWT` or from `Authorization: Bearer` —
/// the server accepts either location.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes used when the handshake is rejected:
/// 4000 = authentication required (no token supplied)
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = user not found (or deactivated)
/// 4004 = account deactivated while connected
pub const CLOSE_AUTH_REQUIRED: u16 = 4000;
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_USER_NOT_FOUND: u16 = 4003;
pub const CLOSE_ACCOUNT_DEACTIVATED: u16 = 4004;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Any authentication failure terminates the
/// socket: the connection is never registered and no rooms are joined —
/// unlike REST auth failures, which answer and keep the HTTP connection open.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.or_else(|| bearer_token(&headers));

    let Some(token) = token else {
        tracing::warn!("WebSocket handshake without credential");
        return reject(ws, CLOSE_AUTH_REQUIRED, "Authentication required");
    };

    let claims = match jwt::validate_access_token(&state.jwt_secret, &token) {
        Ok(claims) => claims,
        Err(err) => {
            let (code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code = code, reason, "WebSocket auth failed");
            return reject(ws, code, reason);
        }
    };

    // The token must still resolve to an existing, active user record.
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT username, role, is_active FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            },
        )
        .ok()
    })
    .await
    .ok()
    .flatten();

    let Some((username, role, is_active)) = user else {
        tracing::warn!(user_id = %claims.sub, "WebSocket auth failed: user not found");
        return reject(ws, CLOSE_USER_NOT_FOUND, "User not found");
    };
    if !is_active {
        tracing::warn!(user_id = %claims.sub, "WebSocket auth failed: account deactivated");
        return reject(ws, CLOSE_USER_NOT_FOUND, "User not found");
    }

    tracing::info!(user_id = %claims.sub, username = %username, "WebSocket connection authenticated");

    let user = AuthenticatedUser {
        id: claims.sub,
        username,
        is_admin: role == "admin",
    };
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
}

/// Upgrade the connection, then immediately close it with the error code.
fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
