//! Info repository
//!
//! The `info` table holds one value per key: operational flags such as
//! `request_pause`, defaults such as `epics_scandata_prefix`, and the schema
//! `version`, which only the migration engine may write.

use crate::database::core::VERSION_KEY;
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoRecord {
    pub key: String,
    pub value: Option<String>,
    pub notes: Option<String>,
    pub modify_time: String,
}

pub struct InfoRepository<'a> {
    conn: &'a Connection,
}

impl<'a> InfoRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_info(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = self
            .conn
            .query_row("SELECT value FROM info WHERE keyname = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub fn get_info_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get_info(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// All rows, or only those whose key starts with `prefix`
    pub fn list_info(&self, prefix: Option<&str>) -> Result<Vec<InfoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT keyname, value, notes, modify_time FROM info
             WHERE ?1 IS NULL OR substr(keyname, 1, length(?1)) = ?1
             ORDER BY keyname",
        )?;
        let rows = stmt
            .query_map([prefix], |row| {
                Ok(InfoRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    notes: row.get(2)?,
                    modify_time: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert or update a key; the schema version key is refused
    pub fn set_info(&self, key: &str, value: &str) -> Result<()> {
        if key == VERSION_KEY {
            return Err(ScanDbError::ReadOnlyKey(key.to_string()));
        }
        self.conn.execute(
            "INSERT INTO info (keyname, value) VALUES (?1, ?2)
             ON CONFLICT(keyname) DO UPDATE SET value = excluded.value, modify_time = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::migration::SCANDATA_PREFIX_KEY;
    use crate::database::scan::ScanDatabase;

    #[test]
    fn test_seeded_keys() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let info = db.info();
        assert_eq!(info.get_info("version").unwrap().as_deref(), Some("2.0"));
        assert_eq!(info.get_info("request_pause").unwrap().as_deref(), Some("0"));
        assert!(info.get_info(SCANDATA_PREFIX_KEY).unwrap().is_some());
    }

    #[test]
    fn test_set_and_get() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let info = db.info();
        info.set_info("pos_settle_time", "0.001").unwrap();
        info.set_info("pos_settle_time", "0.01").unwrap();
        assert_eq!(info.get_info_or("pos_settle_time", "0").unwrap(), "0.01");
        assert_eq!(info.get_info_or("det_settle_time", "0").unwrap(), "0");
        assert_eq!(info.list_info(Some("pos_settle")).unwrap().len(), 1);
    }

    #[test]
    fn test_prefix_is_literal() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let info = db.info();
        info.set_info("experimentXid", "1").unwrap();
        let keys: Vec<String> = info
            .list_info(Some("experiment_"))
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["experiment_id"]);
    }

    #[test]
    fn test_version_is_read_only() {
        let db = ScanDatabase::open_in_memory().unwrap();
        assert!(matches!(
            db.info().set_info("version", "9.9"),
            Err(ScanDbError::ReadOnlyKey(_))
        ));
        assert_eq!(db.version().unwrap().to_string(), "2.0");
    }
}
