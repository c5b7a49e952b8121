//! Slew-scan positioners and scan configurations
//!
//! A slew-scan positioner is a motor that can be driven continuously. Each
//! one belongs to a row of the `config` table.

use super::pv::{normalize_pvname, pv_list_from_row, upsert_pv};
use crate::database::migration::DEFAULT_CONFIG_NAME;
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlewPositionerRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub in_use: bool,
    pub drivepv: Option<String>,
    pub readpv: Option<String>,
    pub extrapvs: Vec<String>,
    pub config_id: Option<i64>,
    pub config: Option<String>,
}

impl SlewPositionerRecord {
    const SELECT: &'static str = "SELECT s.id, s.name, s.notes, s.use, s.drivepv, s.readpv,
                s.extrapvs, s.config_id, c.name
         FROM slewscanpositioners s LEFT JOIN config c ON c.id = s.config_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SlewPositionerRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            in_use: row.get::<_, i64>(3)? != 0,
            drivepv: row.get(4)?,
            readpv: row.get(5)?,
            extrapvs: pv_list_from_row(row, 6)?,
            config_id: row.get(7)?,
            config: row.get(8)?,
        })
    }
}

/// Repository for scan configurations and slew-scan positioners
pub struct SlewscanRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SlewscanRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or update a named configuration
    pub fn set_config(&self, name: &str, notes: &str) -> Result<ConfigRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO config (name, notes) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET notes = excluded.notes",
            params![name, notes],
        )?;
        self.get_config(name)?
            .ok_or_else(|| ScanDbError::not_found("config", name))
    }

    pub fn get_config(&self, name: &str) -> Result<Option<ConfigRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, notes FROM config WHERE name = ?1",
                [name.trim()],
                |row| {
                    Ok(ConfigRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        notes: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Add or replace a slew-scan positioner
    ///
    /// The drive, readback and extra PVs are registered in the `pv` table.
    /// Without an explicit `config` the positioner joins the default one.
    pub fn add_slewpositioner(
        &self,
        name: &str,
        drivepv: &str,
        readpv: Option<&str>,
        extrapvs: &[&str],
        config: Option<&str>,
    ) -> Result<SlewPositionerRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
        let config_name = config.unwrap_or(DEFAULT_CONFIG_NAME);
        let config = self
            .get_config(config_name)?
            .ok_or_else(|| ScanDbError::not_found("config", config_name))?;

        let drivepv = normalize_pvname(drivepv);
        let readpv = readpv.map(normalize_pvname);
        let extrapvs: Vec<String> = extrapvs.iter().map(|p| normalize_pvname(p)).collect();

        let tx = self.conn.unchecked_transaction()?;
        upsert_pv(&tx, &drivepv, None, name)?;
        if let Some(readpv) = &readpv {
            upsert_pv(&tx, readpv, None, &format!("{} readback", name))?;
        }
        for pv in &extrapvs {
            upsert_pv(&tx, pv, None, "")?;
        }
        tx.execute(
            "INSERT INTO slewscanpositioners (name, drivepv, readpv, extrapvs, config_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 drivepv = excluded.drivepv,
                 readpv = excluded.readpv,
                 extrapvs = excluded.extrapvs,
                 config_id = excluded.config_id",
            params![
                name,
                drivepv,
                readpv,
                serde_json::to_string(&extrapvs)?,
                config.id
            ],
        )?;
        tx.commit()?;

        self.get_slewpositioner(name)?
            .ok_or_else(|| ScanDbError::not_found("slew scan positioner", name))
    }

    pub fn get_slewpositioner(&self, name: &str) -> Result<Option<SlewPositionerRecord>> {
        let query = format!("{} WHERE s.name = ?1", SlewPositionerRecord::SELECT);
        Ok(self
            .conn
            .query_row(&query, [name.trim()], SlewPositionerRecord::from_row)
            .optional()?)
    }

    pub fn list_slewpositioners(&self) -> Result<Vec<SlewPositionerRecord>> {
        let query = format!("{} ORDER BY s.id", SlewPositionerRecord::SELECT);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], SlewPositionerRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn remove_slewpositioner(&self, name: &str) -> Result<()> {
        let removed = self.conn.execute(
            "DELETE FROM slewscanpositioners WHERE name = ?1",
            [name.trim()],
        )?;
        if removed == 0 {
            return Err(ScanDbError::not_found("slew scan positioner", name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::scan::ScanDatabase;

    #[test]
    fn test_add_slewpositioner_uses_default_config() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let slew = db.slewscan();

        let pos = slew
            .add_slewpositioner("fine x", "13XRM:m1", Some("13XRM:m1.RBV"), &["13XRM:m3"], None)
            .unwrap();
        assert_eq!(pos.drivepv.as_deref(), Some("13XRM:m1.VAL"));
        assert_eq!(pos.readpv.as_deref(), Some("13XRM:m1.RBV"));
        assert_eq!(pos.extrapvs, vec!["13XRM:m3.VAL"]);
        assert_eq!(pos.config.as_deref(), Some(DEFAULT_CONFIG_NAME));
        assert!(pos.in_use);

        // drive, readback and extra PVs are all registered
        assert_eq!(db.pvs().count().unwrap(), 3);
        assert_eq!(slew.list_slewpositioners().unwrap().len(), 1);
    }

    #[test]
    fn test_named_config() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let slew = db.slewscan();

        assert!(matches!(
            slew.add_slewpositioner("fine x", "13XRM:m1", None, &[], Some("qxafs")),
            Err(ScanDbError::NotFound { .. })
        ));

        let qxafs = slew.set_config("qxafs", "energy slew").unwrap();
        let pos = slew
            .add_slewpositioner("fine x", "13XRM:m1", None, &[], Some("qxafs"))
            .unwrap();
        assert_eq!(pos.config_id, Some(qxafs.id));

        // configs in use cannot be deleted out from under their positioners
        let err = db
            .connection()
            .execute("DELETE FROM config WHERE name = 'qxafs'", [])
            .unwrap_err();
        assert!(matches!(
            ScanDbError::from(err),
            ScanDbError::ReferentialViolation(_)
        ));
    }

    #[test]
    fn test_remove_slewpositioner() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let slew = db.slewscan();
        slew.add_slewpositioner("fine x", "13XRM:m1", None, &[], None)
            .unwrap();
        slew.remove_slewpositioner("fine x").unwrap();
        assert!(slew.get_slewpositioner("fine x").unwrap().is_none());
        assert!(slew.remove_slewpositioner("fine x").is_err());
    }
}
