pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared handle to the single SQLite connection. Handlers run their queries
/// through `tokio::task::spawn_blocking`, so the mutex is never held on the
/// async executor.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) `planner.db` under the data directory and bring the
/// schema up to date. WAL for concurrent reads; foreign keys back the
/// `user_id` ownership columns on tasks and events.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("planner.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database ready at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}
