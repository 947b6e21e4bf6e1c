// src/db/models/receipt.rs

//! InstallReceipt model - the record of one installed keg

use crate::error::{Error, Result};
use crate::recipe::ArtifactSource;
use crate::version::{PkgVersion, Version};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the receipt file written into every keg
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Durable record of an installed recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub revision: u32,
    pub source: ArtifactSource,
    pub installed_at: DateTime<Utc>,
    /// Named on the command line rather than pulled in as a dependency
    pub installed_on_request: bool,
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    pub keg_path: PathBuf,
    /// Files and symlinks, relative to the keg
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

const COLUMNS: &str = "id, name, version, revision, source_kind, bottle_tag, bottle_sha256, \
                       bottle_cellar, installed_at, installed_on_request, keg_path";

impl InstallReceipt {
    pub fn pkg_version(&self) -> PkgVersion {
        PkgVersion::new(self.version.clone(), self.revision)
    }

    /// Insert this receipt (files and dependencies included)
    ///
    /// Any existing receipt for the same name is replaced. Call inside a
    /// transaction so the three tables change together.
    pub fn insert(&self, conn: &Connection) -> Result<i64> {
        Self::delete(conn, &self.name)?;

        let (kind, tag, sha256, cellar) = match &self.source {
            ArtifactSource::Bottle {
                tag,
                sha256,
                cellar,
            } => ("bottle", Some(tag), Some(sha256), Some(cellar)),
            ArtifactSource::Source => ("source", None, None, None),
        };

        conn.execute(
            "INSERT INTO receipts (name, version, revision, source_kind, bottle_tag, bottle_sha256,
                                   bottle_cellar, installed_at, installed_on_request, keg_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &self.name,
                self.version.as_str(),
                self.revision,
                kind,
                tag,
                sha256,
                cellar,
                self.installed_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                self.installed_on_request,
                self.keg_path.to_string_lossy().to_string(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        let mut stmt = conn.prepare(
            "INSERT INTO receipt_files (receipt_id, position, path) VALUES (?1, ?2, ?3)",
        )?;
        for (i, file) in self.files.iter().enumerate() {
            stmt.execute(params![id, i as i64, file.to_string_lossy().to_string()])?;
        }

        let mut stmt = conn.prepare(
            "INSERT INTO receipt_dependencies (receipt_id, position, name) VALUES (?1, ?2, ?3)",
        )?;
        for (i, dep) in self.runtime_dependencies.iter().enumerate() {
            stmt.execute(params![id, i as i64, dep])?;
        }

        Ok(id)
    }

    /// Find the receipt for a recipe
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM receipts WHERE name = ?1", COLUMNS))?;
        let row = stmt.query_row([name], Self::from_row).optional()?;

        match row {
            Some((id, mut receipt)) => {
                receipt.load_children(conn, id)?;
                Ok(Some(receipt))
            }
            None => Ok(None),
        }
    }

    /// List all receipts, sorted by name
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM receipts ORDER BY name", COLUMNS))?;
        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut receipts = Vec::with_capacity(rows.len());
        for (id, mut receipt) in rows {
            receipt.load_children(conn, id)?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    /// Names of installed recipes that list `name` as a runtime dependency
    pub fn find_dependents(conn: &Connection, name: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT r.name FROM receipts r
             JOIN receipt_dependencies d ON d.receipt_id = r.id
             WHERE d.name = ?1
             ORDER BY r.name",
        )?;
        let names = stmt
            .query_map([name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Delete the receipt for a recipe; returns whether one existed
    pub fn delete(conn: &Connection, name: &str) -> Result<bool> {
        let id: Option<i64> = conn
            .query_row("SELECT id FROM receipts WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        let Some(id) = id else {
            return Ok(false);
        };

        conn.execute("DELETE FROM receipt_files WHERE receipt_id = ?1", [id])?;
        conn.execute("DELETE FROM receipt_dependencies WHERE receipt_id = ?1", [id])?;
        conn.execute("DELETE FROM receipts WHERE id = ?1", [id])?;
        Ok(true)
    }

    fn load_children(&mut self, conn: &Connection, id: i64) -> Result<()> {
        let mut stmt =
            conn.prepare("SELECT path FROM receipt_files WHERE receipt_id = ?1 ORDER BY position")?;
        self.files = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .map(|r| r.map(PathBuf::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT name FROM receipt_dependencies WHERE receipt_id = ?1 ORDER BY position",
        )?;
        self.runtime_dependencies = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(())
    }

    /// Convert a database row to a receipt (without files and dependencies)
    fn from_row(row: &Row) -> rusqlite::Result<(i64, Self)> {
        let version_str: String = row.get(2)?;
        let version = Version::parse(&version_str).map_err(|e| conversion_error(2, e))?;

        let kind: String = row.get(4)?;
        let source = match kind.as_str() {
            "bottle" => ArtifactSource::Bottle {
                tag: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                sha256: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                cellar: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            },
            _ => ArtifactSource::Source,
        };

        let installed_at: String = row.get(8)?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map_err(|e| conversion_error(8, Error::ParseError(e.to_string())))?
            .with_timezone(&Utc);

        let keg_path: String = row.get(10)?;

        Ok((
            row.get(0)?,
            Self {
                name: row.get(1)?,
                version,
                revision: row.get(3)?,
                source,
                installed_at,
                installed_on_request: row.get(9)?,
                runtime_dependencies: Vec::new(),
                keg_path: PathBuf::from(keg_path),
                files: Vec::new(),
            },
        ))
    }

    /// Serialize as the `INSTALL_RECEIPT.json` written into the keg
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn conversion_error(column: usize, e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::migrate;
    use chrono::TimeZone;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn receipt(name: &str) -> InstallReceipt {
        InstallReceipt {
            name: name.to_string(),
            version: Version::parse("0.29.3").unwrap(),
            revision: 4,
            source: ArtifactSource::Bottle {
                tag: "arm64_monterey".into(),
                sha256: "ab".repeat(32),
                cellar: "any".into(),
            },
            installed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
            installed_on_request: true,
            runtime_dependencies: vec!["luajit".into(), "jsoncpp".into(), "c-ares".into()],
            keg_path: PathBuf::from("/opt/keg/Cellar").join(name).join("0.29.3_4"),
            files: vec![PathBuf::from("bin/sysdig"), PathBuf::from("share/sysdig/chisels")],
        }
    }

    #[test]
    fn test_insert_and_find_round_trip() {
        let conn = conn();
        let original = receipt("sysdig");
        original.insert(&conn).unwrap();

        let found = InstallReceipt::find_by_name(&conn, "sysdig").unwrap().unwrap();
        assert_eq!(found, original);
        assert_eq!(found.pkg_version().to_string(), "0.29.3_4");
        assert!(InstallReceipt::find_by_name(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_replaces() {
        let conn = conn();
        receipt("sysdig").insert(&conn).unwrap();
        let mut newer = receipt("sysdig");
        newer.revision = 5;
        newer.source = ArtifactSource::Source;
        newer.files = vec![PathBuf::from("bin/sysdig")];
        newer.insert(&conn).unwrap();

        let all = InstallReceipt::list_all(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], newer);
    }

    #[test]
    fn test_dependents_and_delete() {
        let conn = conn();
        receipt("sysdig").insert(&conn).unwrap();
        let mut other = receipt("falco");
        other.runtime_dependencies = vec!["jsoncpp".into()];
        other.insert(&conn).unwrap();

        assert_eq!(
            InstallReceipt::find_dependents(&conn, "jsoncpp").unwrap(),
            vec!["falco".to_string(), "sysdig".to_string()]
        );
        assert!(InstallReceipt::delete(&conn, "sysdig").unwrap());
        assert!(!InstallReceipt::delete(&conn, "sysdig").unwrap());
        assert_eq!(
            InstallReceipt::find_dependents(&conn, "luajit").unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_json_round_trip() {
        let original = receipt("sysdig");
        let json = original.to_json().unwrap();
        assert!(json.contains("\"kind\": \"bottle\""));
        assert_eq!(InstallReceipt::from_json(&json).unwrap(), original);
    }
}
