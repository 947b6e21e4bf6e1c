// src/db/store.rs

//! Receipt store interface and its SQLite implementation

use super::models::InstallReceipt;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Persisted mapping from recipe name to [`InstallReceipt`]
///
/// Read by the resolver, written by the Cellar at commit time. Implementors
/// must be safe to share across install workers.
pub trait ReceiptStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<InstallReceipt>>;

    /// All receipts, sorted by name
    fn list(&self) -> Result<Vec<InstallReceipt>>;

    /// Insert or replace the receipt for `receipt.name`
    fn put(&self, receipt: &InstallReceipt) -> Result<()>;

    /// Remove a receipt; returns whether one existed
    fn remove(&self, name: &str) -> Result<bool>;

    /// Names of installed recipes with `name` as a runtime dependency, sorted
    fn dependents(&self, name: &str) -> Result<Vec<String>>;
}

/// SQLite-backed receipt store
pub struct SqliteReceiptStore {
    conn: Mutex<Connection>,
}

impl SqliteReceiptStore {
    /// Open (creating and migrating if needed) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        super::init(path)?;
        Ok(Self {
            conn: Mutex::new(super::open(path)?),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(super::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::IoError("receipt store lock poisoned".to_string()))
    }
}

impl ReceiptStore for SqliteReceiptStore {
    fn get(&self, name: &str) -> Result<Option<InstallReceipt>> {
        let conn = self.conn()?;
        InstallReceipt::find_by_name(&conn, name)
    }

    fn list(&self) -> Result<Vec<InstallReceipt>> {
        let conn = self.conn()?;
        InstallReceipt::list_all(&conn)
    }

    fn dependents(&self, name: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        InstallReceipt::find_dependents(&conn, name)
    }

    fn put(&self, receipt: &InstallReceipt) -> Result<()> {
        let mut conn = self.conn()?;
        super::transaction(&mut conn, |tx| receipt.insert(tx).map(|_| ()))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        super::transaction(&mut conn, |tx| InstallReceipt::delete(tx, name))
    }
}
