//! `SQLite` connection setup shared by every repository.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;

/// Opens (creating if needed) the database at `database_path`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub async fn connect(database_path: &str) -> Result<SqlitePool> {
    let url = format!("sqlite:{database_path}?mode=rwc");
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(pool)
}

/// Opens a private in-memory database.
///
/// A single connection that is never recycled keeps every repository on the
/// same memory database.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub async fn in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}
