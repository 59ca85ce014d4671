use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::admin::require_admin;
use crate::auth::middleware::Claims;
use crate::db::models::User;
use crate::error::{api_error, internal_error, ApiError};
use crate::state::AppState;
use crate::ws::handler::CLOSE_ACCOUNT_DEACTIVATED;

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub active: bool,
}

/// GET /api/admin/users — All accounts, newest first.
pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;

    let db = state.db.clone();
    let users = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, username, email, role, is_active, created_at, updated_at
                 FROM users ORDER BY created_at DESC",
            )
            .map_err(|e| e.to_string())?;
        let users: Vec<User> = stmt
            .query_map([], User::from_row)
            .map_err(|e| e.to_string())?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, String>(users)
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({ "success": true, "data": users })))
}

/// PUT /api/admin/users/{id}/role — Promote or demote an account.
/// The affected user is notified on their personal room.
pub async fn change_role(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;

    if req.role != "user" && req.role != "admin" {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Rol inválido. Debe ser \"user\" o \"admin\"",
        ));
    }

    let db = state.db.clone();
    let (role, target, now) = (req.role.clone(), user_id.clone(), Utc::now().to_rfc3339());
    let changed = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![role, now, target],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if changed == 0 {
        return Err(api_error(StatusCode::NOT_FOUND, "Usuario no encontrado"));
    }

    if let Some(gateway) = &state.gateway {
        gateway.notify_user(
            &user_id,
            "role_updated",
            &format!("Tu rol ha sido actualizado a: {}", req.role),
        );
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Rol actualizado a \"{}\" exitosamente", req.role),
        "data": { "userId": user_id, "role": req.role },
    })))
}

/// PUT /api/admin/users/{id}/status — Activate or deactivate an account.
/// Deactivation force-closes the user's live WebSocket connections; their
/// next handshake attempt is rejected at the authenticator.
pub async fn change_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;

    let db = state.db.clone();
    let (target, now) = (user_id.clone(), Utc::now().to_rfc3339());
    let active = req.active;
    let changed = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![active as i64, now, target],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if changed == 0 {
        return Err(api_error(StatusCode::NOT_FOUND, "Usuario no encontrado"));
    }

    let message = if req.active {
        "Tu cuenta ha sido reactivada"
    } else {
        "Tu cuenta ha sido desactivada"
    };
    if let Some(gateway) = &state.gateway {
        gateway.notify_user(&user_id, "account_status", message);
    }
    if !req.active {
        state
            .rooms
            .close_user(&user_id, CLOSE_ACCOUNT_DEACTIVATED, "Account deactivated");
    }

    Ok(Json(json!({
        "success": true,
        "message": if req.active {
            "Cuenta activada exitosamente"
        } else {
            "Cuenta desactivada exitosamente"
        },
        "data": { "userId": user_id, "isActive": req.active },
    })))
}
