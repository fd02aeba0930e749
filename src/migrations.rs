use log::info;
use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::Result;

/// Schema version written to `PRAGMA user_version`.
pub const DATABASE_VERSION: usize = 1;

/// Version 1 schema. Column types and the primary key must stay exactly as
/// they are: existing databases written by other clients use the same layout.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS meta(name TEXT PRIMARY KEY, value TEXT);
CREATE TABLE IF NOT EXISTS trkpt(
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    time INTEGER NOT NULL,
    accuracy REAL,
    device_id INTEGER NOT NULL,
    ele INTEGER,
    sat INTEGER,
    PRIMARY KEY(device_id, time)
);
CREATE TABLE IF NOT EXISTS homepoints(
    id INTEGER PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    radius REAL NOT NULL,
    name TEXT
);
CREATE INDEX IF NOT EXISTS index_trkpt_device_id_time ON trkpt(device_id, time);
"#;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA_V1)])
}

/// Bring `conn` up to [`DATABASE_VERSION`].
///
/// Databases already at version 1 are left untouched.
pub fn apply(conn: &mut Connection) -> Result<()> {
    // Single-file database, no -wal/-shm companions.
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get(0))?;
    info!("[Migrations] journal_mode = {}", mode);

    migrations().to_latest(conn)?;
    Ok(())
}

/// Current `user_version` of the database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
