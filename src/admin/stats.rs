use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::admin::require_admin;
use crate::auth::middleware::Claims;
use crate::error::{internal_error, ApiError};
use crate::state::AppState;

/// GET /api/admin/statistics — System-wide aggregates: entity totals, tasks
/// by status, and per-day creation counts over the last 30 days.
pub async fn get_statistics(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Value>, ApiError> {
    require_admin(&claims)?;

    let db = state.db.clone();
    let since = (Utc::now() - Duration::days(30)).to_rfc3339();

    let stats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| e.to_string())?;

        let count = |sql: &str| -> Result<i64, String> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(|e| e.to_string())
        };
        let total_users = count("SELECT COUNT(*) FROM users")?;
        let total_tasks = count("SELECT COUNT(*) FROM tasks")?;
        let total_events = count("SELECT COUNT(*) FROM events")?;

        let mut by_status: HashMap<String, i64> = HashMap::new();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| e.to_string())?;
        for row in rows.flatten() {
            by_status.insert(row.0, row.1);
        }

        let per_day = |table: &str| -> Result<Vec<Value>, String> {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT date(created_at), COUNT(*) FROM {table}
                     WHERE created_at >= ?1 GROUP BY date(created_at) ORDER BY date(created_at)"
                ))
                .map_err(|e| e.to_string())?;
            let rows = stmt
                .query_map(rusqlite::params![since], |row| {
                    Ok(json!({
                        "date": row.get::<_, String>(0)?,
                        "count": row.get::<_, i64>(1)?,
                    }))
                })
                .map_err(|e| e.to_string())?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        };
        let user_growth = per_day("users")?;
        let task_growth = per_day("tasks")?;

        Ok::<_, String>(json!({
            "totals": {
                "users": total_users,
                "tasks": total_tasks,
                "events": total_events,
            },
            "tasksByStatus": by_status,
            "userGrowth": user_growth,
            "taskGrowth": task_growth,
        }))
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?;

    Ok(Json(json!({ "success": true, "data": stats })))
}
