use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::db::models::User;
use crate::error::{api_error, internal_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(internal_error)
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// POST /api/auth/register — Create an account and return a session token.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if username.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "El nombre de usuario es requerido"));
    }
    if !email.contains('@') {
        return Err(api_error(StatusCode::BAD_REQUEST, "Correo electrónico inválido"));
    }
    if req.password.len() < 8 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La contraseña debe tener al menos 8 caracteres",
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    let db = state.db.clone();
    let insert = {
        let (user_id, username, email, now) =
            (user_id.clone(), username.clone(), email.clone(), now.clone());
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| e.to_string())?;
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, role, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'user', 1, ?5, ?5)",
                rusqlite::params![user_id, username, email, password_hash, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    "duplicate".to_string()
                }
                other => other.to_string(),
            })
        })
        .await
        .map_err(internal_error)?
    };

    match insert {
        Ok(_) => {}
        Err(msg) if msg == "duplicate" => {
            return Err(api_error(
                StatusCode::CONFLICT,
                "Ya existe un usuario con ese correo electrónico",
            ));
        }
        Err(msg) => return Err(internal_error(msg)),
    }

    let user = User {
        id: user_id.clone(),
        username: username.clone(),
        email: email.clone(),
        role: "user".to_string(),
        is_active: true,
        created_at: now.clone(),
        updated_at: now,
    };

    // Welcome mail is fire-and-forget; registration never fails on it.
    state.mailer.send(
        &email,
        "Bienvenido al planificador de tareas",
        "welcome",
        &json!({ "username": username }),
    );

    // Let connected admins see new signups in real time.
    if let Some(gateway) = &state.gateway {
        gateway.broadcast_to_admins(
            "user_registered",
            &json!({ "userId": user.id, "username": user.username }),
        );
    }

    let token = jwt::issue_access_token(
        &state.jwt_secret,
        &user.id,
        &user.username,
        &user.role,
        state.token_ttl_secs,
    )
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Usuario registrado exitosamente",
            "data": { "user": user, "token": token },
        })),
    ))
}

/// POST /api/auth/login — Verify credentials and return a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = req.email.trim().to_lowercase();

    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT id, username, email, role, is_active, created_at, updated_at, password_hash
             FROM users WHERE email = ?1",
            rusqlite::params![email],
            |row| {
                let user = User::from_row(row)?;
                let hash: String = row.get(7)?;
                Ok((user, hash))
            },
        )
        .ok()
    })
    .await
    .map_err(internal_error)?;

    let Some((user, stored_hash)) = row else {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Credenciales inválidas"));
    };

    if !verify_password(&req.password, &stored_hash) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Credenciales inválidas"));
    }
    if !user.is_active {
        return Err(api_error(StatusCode::FORBIDDEN, "Tu cuenta ha sido desactivada"));
    }

    let token = jwt::issue_access_token(
        &state.jwt_secret,
        &user.id,
        &user.username,
        &user.role,
        state.token_ttl_secs,
    )
    .map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Inicio de sesión exitoso",
        "data": { "user": user, "token": token },
    })))
}

/// GET /api/auth/profile — Return the authenticated user's record.
pub async fn profile(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT id, username, email, role, is_active, created_at, updated_at
             FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            User::from_row,
        )
        .ok()
    })
    .await
    .map_err(internal_error)?;

    match user {
        Some(user) => Ok(Json(json!({ "success": true, "data": user }))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Usuario no encontrado")),
    }
}

/// PUT /api/auth/password — Change the authenticated user's password.
pub async fn change_password(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.new_password.len() < 8 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La contraseña debe tener al menos 8 caracteres",
        ));
    }

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let stored_hash = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT password_hash FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get::<_, String>(0),
        )
        .ok()
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Usuario no encontrado"))?;

    if !verify_password(&req.current_password, &stored_hash) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Contraseña actual incorrecta"));
    }

    let new_hash = hash_password(&req.new_password)?;
    let now = Utc::now().to_rfc3339();
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_hash, now, user_id],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Contraseña actualizada exitosamente",
    })))
}
