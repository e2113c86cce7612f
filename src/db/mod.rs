//! SQLite backend: opening, schema and migrations.
//!
//! A [`Federation`](crate::federation::Federation) is handed an already-open
//! connection; these helpers are how callers produce one.

pub mod migrations;
pub mod pool;
pub mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;

use crate::error::Result;

/// Open (or create) the federation database at the given path with schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;

    // WAL lets read-only connections run alongside an open batch transaction
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    prepare(&conn)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a read-only connection to an existing database file.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(conn)
}

/// Open an in-memory database.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

/// Apply pragmas, schema and migrations to a connection. Idempotent.
pub fn prepare(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(conn)?;
    migrations::run_migrations(conn)?;
    Ok(())
}
