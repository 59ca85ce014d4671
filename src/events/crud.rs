use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::Event;
use crate::error::{api_error, internal_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: String,
    pub starts_at: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<String>,
    pub location: Option<String>,
}

fn fetch_owned_event(
    conn: &rusqlite::Connection,
    event_id: &str,
    user_id: &str,
) -> Option<Event> {
    conn.query_row(
        "SELECT id, user_id, title, description, starts_at, location, created_at, updated_at
         FROM events WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![event_id, user_id],
        Event::from_row,
    )
    .ok()
}

/// POST /api/events
pub async fn create_event(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.title.trim().is_empty() || req.description.trim().is_empty() || req.starts_at.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Por favor proporcione todos los campos requeridos",
        ));
    }

    let event = Event {
        id: Uuid::now_v7().to_string(),
        user_id: claims.sub.clone(),
        title: req.title,
        description: req.description,
        starts_at: req.starts_at,
        location: req.location,
        created_at: Utc::now().to_rfc3339(),
        updated_at: Utc::now().to_rfc3339(),
    };

    let db = state.db.clone();
    let row = event.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO events (id, user_id, title, description, starts_at, location, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.id,
                row.user_id,
                row.title,
                row.description,
                row.starts_at,
                row.location,
                row.created_at,
                row.updated_at,
            ],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Evento creado exitosamente",
            "data": event,
        })),
    ))
}

/// GET /api/events — List the caller's events ordered by start time.
pub async fn list_events(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let events = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, title, description, starts_at, location, created_at, updated_at
                 FROM events WHERE user_id = ?1 ORDER BY starts_at ASC",
            )
            .map_err(|e| e.to_string())?;
        let events: Vec<Event> = stmt
            .query_map(rusqlite::params![user_id], Event::from_row)
            .map_err(|e| e.to_string())?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, String>(events)
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({ "success": true, "data": events })))
}

/// GET /api/events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    claims: Claims,
    Path(event_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let event = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        fetch_owned_event(&conn, &event_id, &user_id)
    })
    .await
    .map_err(internal_error)?;

    match event {
        Some(event) => Ok(Json(json!({ "success": true, "data": event }))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Evento no encontrado")),
    }
}

/// PUT /api/events/{id} — Update an event and fan out `event:updated`
/// to its subscribers.
pub async fn update_event(
    State(state): State<AppState>,
    claims: Claims,
    Path(event_id): Path<String>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let (lookup_id, lookup_user) = (event_id.clone(), claims.sub.clone());
    let mut event = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        fetch_owned_event(&conn, &lookup_id, &lookup_user)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Evento no encontrado"))?;

    if let Some(title) = req.title {
        event.title = title;
    }
    if let Some(description) = req.description {
        event.description = description;
    }
    if let Some(starts_at) = req.starts_at {
        event.starts_at = starts_at;
    }
    if let Some(location) = req.location {
        event.location = Some(location);
    }
    event.updated_at = Utc::now().to_rfc3339();

    let db = state.db.clone();
    let row = event.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE events SET title = ?1, description = ?2, starts_at = ?3, location = ?4, updated_at = ?5
             WHERE id = ?6 AND user_id = ?7",
            rusqlite::params![
                row.title,
                row.description,
                row.starts_at,
                row.location,
                row.updated_at,
                row.id,
                row.user_id,
            ],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if let Some(gateway) = &state.gateway {
        if let Ok(payload) = serde_json::to_value(&event) {
            gateway.event_updated(&event.id, &payload);
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Evento actualizado exitosamente",
        "data": event,
    })))
}
