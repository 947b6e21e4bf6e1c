// src/db/mod.rs

//! SQLite persistence for install receipts
//!
//! The receipt store is the authority on what is installed. The resolver
//! reads it to mark satisfied recipes; the Cellar writes it under the
//! commit lock once a keg is in place.

pub mod models;
pub mod schema;
mod store;

pub use models::{InstallReceipt, RECEIPT_FILE};
pub use store::{ReceiptStore, SqliteReceiptStore};

use crate::error::Result;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// How long a writer waits for another process holding the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the database (and its directory) if missing and migrate it
pub fn init(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = open(db_path)?;
    schema::migrate(&conn)?;
    Ok(())
}

/// Open an existing database with keg's connection settings
pub fn open(db_path: &Path) -> Result<Connection> {
    debug!("Opening receipt store at {}", db_path.display());
    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    Ok(conn)
}

/// In-memory database, migrated; for tests and dry runs
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(())
}

/// Run `f` in a transaction, committing on success
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}
