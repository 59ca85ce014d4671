use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::Task;
use crate::error::{api_error, internal_error, ApiError};
use crate::state::AppState;
use crate::tasks::VALID_STATUSES;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub status: Option<String>,
    pub city: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn validate_status(status: &str) -> Result<(), ApiError> {
    if VALID_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Estado inválido. Debe ser uno de: {}", VALID_STATUSES.join(", ")),
        ))
    }
}

/// Fetch a task owned by `user_id`, or None.
fn fetch_owned_task(
    conn: &rusqlite::Connection,
    task_id: &str,
    user_id: &str,
) -> Option<Task> {
    conn.query_row(
        "SELECT id, user_id, title, description, due_date, status, city, weather, created_at, updated_at
         FROM tasks WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![task_id, user_id],
        Task::from_row,
    )
    .ok()
}

/// POST /api/tasks — Create a task, enriched with a forecast for its city
/// and due date. Forecast failures never fail the creation.
pub async fn create_task(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.title.trim().is_empty()
        || req.description.trim().is_empty()
        || req.due_date.trim().is_empty()
        || req.city.trim().is_empty()
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Por favor proporcione todos los campos requeridos",
        ));
    }
    let status = req.status.unwrap_or_else(|| "pendiente".to_string());
    validate_status(&status)?;

    let weather = match state.weather.get_forecast(&req.city, &req.due_date).await {
        Ok(forecast) => serde_json::to_value(forecast).ok(),
        Err(err) => {
            tracing::warn!(city = %req.city, error = %err, "skipping forecast for new task");
            None
        }
    };

    let task = Task {
        id: Uuid::now_v7().to_string(),
        user_id: claims.sub.clone(),
        title: req.title,
        description: req.description,
        due_date: req.due_date,
        status,
        city: req.city,
        weather_data: weather,
        created_at: Utc::now().to_rfc3339(),
        updated_at: Utc::now().to_rfc3339(),
    };

    let db = state.db.clone();
    let row = task.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        let weather_json = row
            .weather_data
            .as_ref()
            .map(|w| w.to_string());
        conn.execute(
            "INSERT INTO tasks (id, user_id, title, description, due_date, status, city, weather, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                row.id,
                row.user_id,
                row.title,
                row.description,
                row.due_date,
                row.status,
                row.city,
                weather_json,
                row.created_at,
                row.updated_at,
            ],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    // Broadcast only after the write committed.
    if let Some(gateway) = &state.gateway {
        if let Ok(payload) = serde_json::to_value(&task) {
            gateway.task_created(&claims.sub, &payload);
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Tarea creada exitosamente",
            "data": task,
        })),
    ))
}

/// GET /api/tasks — List the caller's tasks with filtering and pagination.
pub async fn list_tasks(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(status) = &query.status {
        validate_status(status)?;
    }
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let (tasks, total) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;

        let mut where_clause = String::from("WHERE user_id = ?1");
        let mut params: Vec<String> = vec![user_id];

        if let Some(status) = query.status {
            params.push(status);
            where_clause.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(from) = query.from_date {
            params.push(from);
            where_clause.push_str(&format!(" AND due_date >= ?{}", params.len()));
        }
        if let Some(to) = query.to_date {
            params.push(to);
            where_clause.push_str(&format!(" AND due_date <= ?{}", params.len()));
        }
        if let Some(search) = query.search {
            params.push(format!("%{search}%"));
            let n = params.len();
            where_clause.push_str(&format!(
                " AND (title LIKE ?{n} OR description LIKE ?{n} OR city LIKE ?{n})"
            ));
        }

        let total: u32 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM tasks {where_clause}"),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;

        let sql = format!(
            "SELECT id, user_id, title, description, due_date, status, city, weather, created_at, updated_at
             FROM tasks {where_clause} ORDER BY due_date ASC LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
        let tasks: Vec<Task> = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), Task::from_row)
            .map_err(|e| e.to_string())?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, String>((tasks, total))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "data": tasks,
        "pagination": {
            "total": total,
            "page": page,
            "limit": limit,
            "pages": total.div_ceil(limit),
        },
    })))
}

/// GET /api/tasks/{id} — Fetch one task; ownership is enforced here,
/// not at the socket layer.
pub async fn get_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let task = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        fetch_owned_task(&conn, &task_id, &user_id)
    })
    .await
    .map_err(internal_error)?;

    match task {
        Some(task) => Ok(Json(json!({ "success": true, "data": task }))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Tarea no encontrada")),
    }
}

/// PUT /api/tasks/{id} — Update a task. The forecast snapshot is refreshed
/// when the city or due date changes; on lookup failure the old snapshot is
/// kept (last-write-wins, no retries).
pub async fn update_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(status) = &req.status {
        validate_status(status)?;
    }

    let db = state.db.clone();
    let (lookup_id, lookup_user) = (task_id.clone(), claims.sub.clone());
    let existing = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        fetch_owned_task(&conn, &lookup_id, &lookup_user)
    })
    .await
    .map_err(internal_error)?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Tarea no encontrada"))?;

    let mut task = existing.clone();
    if let Some(title) = req.title {
        task.title = title;
    }
    if let Some(description) = req.description {
        task.description = description;
    }
    if let Some(due_date) = req.due_date {
        task.due_date = due_date;
    }
    if let Some(status) = req.status {
        task.status = status;
    }
    if let Some(city) = req.city {
        task.city = city;
    }
    task.updated_at = Utc::now().to_rfc3339();

    if task.city != existing.city || task.due_date != existing.due_date {
        match state.weather.get_forecast(&task.city, &task.due_date).await {
            Ok(forecast) => task.weather_data = serde_json::to_value(forecast).ok(),
            Err(err) => {
                tracing::warn!(city = %task.city, error = %err, "keeping stale forecast on task update");
            }
        }
    }

    let db = state.db.clone();
    let row = task.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        let weather_json = row.weather_data.as_ref().map(|w| w.to_string());
        conn.execute(
            "UPDATE tasks SET title = ?1, description = ?2, due_date = ?3, status = ?4,
                 city = ?5, weather = ?6, updated_at = ?7
             WHERE id = ?8 AND user_id = ?9",
            rusqlite::params![
                row.title,
                row.description,
                row.due_date,
                row.status,
                row.city,
                weather_json,
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
        if let Ok(payload) = serde_json::to_value(&task) {
            gateway.task_updated(&task.id, &payload);
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Tarea actualizada exitosamente",
        "data": task,
    })))
}

/// PATCH /api/tasks/{id}/status — Status-only transition.
pub async fn update_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_status(&req.status)?;

    let db = state.db.clone();
    let (lookup_id, lookup_user) = (task_id.clone(), claims.sub.clone());
    let status = req.status.clone();
    let now = Utc::now().to_rfc3339();
    let updated = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                rusqlite::params![status, now, lookup_id, lookup_user],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Ok(None);
        }
        Ok::<_, String>(fetch_owned_task(&conn, &lookup_id, &lookup_user))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Tarea no encontrada"))?;

    if let Some(gateway) = &state.gateway {
        if let Ok(payload) = serde_json::to_value(&updated) {
            gateway.task_updated(&updated.id, &payload);
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Estado actualizado exitosamente",
        "data": updated,
    })))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<AppState>,
    claims: Claims,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.clone();
    let (lookup_id, lookup_user) = (task_id.clone(), claims.sub.clone());
    let deleted = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![lookup_id, lookup_user],
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    if deleted == 0 {
        return Err(api_error(StatusCode::NOT_FOUND, "Tarea no encontrada"));
    }

    if let Some(gateway) = &state.gateway {
        gateway.task_deleted(&task_id, &claims.sub);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Tarea eliminada exitosamente",
        "data": { "taskId": task_id },
    })))
}
