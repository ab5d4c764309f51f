mod common;

use common::MIGRATIONS;
use repokit_core::db::latest_version;
use repokit_core::{open_db, open_db_in_memory, DbError, Migration};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory(MIGRATIONS).unwrap();

    assert_eq!(schema_version(&conn), latest_version(MIGRATIONS));
    assert_table_exists(&conn, "team");
    assert_table_exists(&conn, "member");
    assert_eq!(foreign_keys(&conn), 1);
}

#[test]
fn reopening_applies_only_pending_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repokit.db");

    let first = open_db(&path, &MIGRATIONS[..1]).unwrap();
    assert_eq!(schema_version(&first), 1);
    assert_table_exists(&first, "team");
    drop(first);

    let second = open_db(&path, MIGRATIONS).unwrap();
    assert_eq!(schema_version(&second), 2);
    assert_table_exists(&second, "member");
    drop(second);

    let third = open_db(&path, MIGRATIONS).unwrap();
    assert_eq!(schema_version(&third), 2);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, MIGRATIONS).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version(MIGRATIONS));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failing_migration_leaves_schema_untouched() {
    let broken = [
        Migration::new(1, "CREATE TABLE ok_table (id INTEGER PRIMARY KEY);"),
        Migration::new(2, "CREATE TABLE broken (;"),
    ];
    let err = open_db_in_memory(&broken).unwrap_err();
    assert!(matches!(err, DbError::Sqlite(_)));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn foreign_keys(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
