use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User representation returned by the API. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Map a row of `SELECT id, username, email, role, is_active, created_at, updated_at`.
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            is_active: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// A task enriched with an optional weather snapshot captured at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub status: String,
    pub city: String,
    pub weather_data: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    /// Map a row of `SELECT id, user_id, title, description, due_date, status,
    /// city, weather, created_at, updated_at`.
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let weather: Option<String> = row.get(7)?;
        Ok(Task {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            due_date: row.get(4)?,
            status: row.get(5)?,
            city: row.get(6)?,
            weather_data: weather.and_then(|w| serde_json::from_str(&w).ok()),
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub starts_at: String,
    pub location: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Event {
    /// Map a row of `SELECT id, user_id, title, description, starts_at,
    /// location, created_at, updated_at`.
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            starts_at: row.get(4)?,
            location: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
