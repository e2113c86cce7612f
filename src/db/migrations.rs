//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `federation_meta` and runs sequential
//! migrations up to [`CURRENT_SCHEMA_VERSION`]. This versions the fixed table
//! layout only; projects are rows, so registering one never touches it.

use rusqlite::{Connection, OptionalExtension};

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(get_meta(conn, "schema_version")?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0))
}

/// Read a `federation_meta` value.
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM federation_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

/// Insert or overwrite a `federation_meta` value.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO federation_meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations, each in its own transaction.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let Some(migrate) = migration_to(next) else {
            tracing::error!(version = next, "unknown migration target");
            break;
        };

        conn.execute_batch("BEGIN")?;
        match migrate(conn).and_then(|_| set_meta(conn, "schema_version", &next.to_string())) {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
        }
        version = next;
    }

    Ok(())
}

type Migration = fn(&Connection) -> rusqlite::Result<()>;

/// `(target version, step)` pairs. Append a step here whenever
/// [`CURRENT_SCHEMA_VERSION`] is bumped.
const MIGRATIONS: &[(u32, Migration)] = &[];

fn migration_to(version: u32) -> Option<Migration> {
    MIGRATIONS
        .iter()
        .find(|(target, _)| *target == version)
        .map(|(_, step)| *step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn get_schema_version_returns_1_on_fresh_db() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn run_migrations_upgrades_to_current() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn unknown_target_stops_without_touching_version() {
        let conn = test_db();
        set_meta(&conn, "schema_version", "0").unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn meta_round_trips() {
        let conn = test_db();
        assert!(get_meta(&conn, "quant_version").unwrap().is_none());
        set_meta(&conn, "quant_version", "3").unwrap();
        set_meta(&conn, "quant_version", "4").unwrap();
        assert_eq!(get_meta(&conn, "quant_version").unwrap().as_deref(), Some("4"));
    }
}
