// src/db/schema.rs

//! Receipt store schema and migrations

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying receipt store migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::ConfigError(format!(
            "Unknown receipt store migration version: {}",
            version
        ))),
    }
}

/// Initial schema: one row per installed recipe, plus its files and
/// runtime dependencies in declaration order
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            source_kind TEXT NOT NULL CHECK(source_kind IN ('bottle', 'source')),
            bottle_tag TEXT,
            bottle_sha256 TEXT,
            bottle_cellar TEXT,
            installed_at TEXT NOT NULL,
            installed_on_request INTEGER NOT NULL DEFAULT 0,
            keg_path TEXT NOT NULL
        );

        CREATE TABLE receipt_files (
            receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            path TEXT NOT NULL,
            PRIMARY KEY (receipt_id, position)
        );

        CREATE TABLE receipt_dependencies (
            receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY (receipt_id, position)
        );

        CREATE INDEX idx_receipt_dependencies_name ON receipt_dependencies(name);
        ",
    )?;
    Ok(())
}
