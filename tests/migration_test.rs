mod helpers;

use plexus::db;
use plexus::db::migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};

fn has_column(conn: &rusqlite::Connection, table: &str, column: &str) -> bool {
    let mut stmt = conn
        .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
        .unwrap();
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    names.iter().any(|n| n == column)
}

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn fresh_schema_records_key_versions() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn).unwrap();
    assert!(has_column(&conn, "nodes", "quant_version"));
}

#[test]
fn migrations_are_idempotent() {
    let conn = helpers::test_db();
    // Running again should be a no-op
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn reopening_a_file_db_keeps_its_version() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("fed.db");
    drop(db::open_database(&path).unwrap());

    let conn = db::open_database(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(has_column(&conn, "nodes", "quant_version"));
}
