//! Step-scan positioners
//!
//! A positioner is a drive PV moved point by point during a step scan, with
//! an optional readback PV and extra PVs recorded alongside it.

use super::pv::{normalize_pvname, pv_list_from_row, upsert_pv};
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionerRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub in_use: bool,
    pub drivepv: Option<String>,
    pub readpv: Option<String>,
    pub extrapvs: Vec<String>,
}

impl PositionerRecord {
    const SELECT: &'static str =
        "SELECT id, name, notes, use, drivepv, readpv, extrapvs FROM scanpositioners";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PositionerRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            in_use: row.get::<_, i64>(3)? != 0,
            drivepv: row.get(4)?,
            readpv: row.get(5)?,
            extrapvs: pv_list_from_row(row, 6)?,
        })
    }
}

/// Repository for step-scan positioners
pub struct PositionerRepository<'a> {
    conn: &'a Connection,
}

impl<'a> PositionerRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add or replace a positioner, registering its PVs in the `pv` table
    pub fn add_positioner(
        &self,
        name: &str,
        drivepv: &str,
        readpv: Option<&str>,
        extrapvs: &[&str],
        notes: &str,
    ) -> Result<PositionerRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
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
            "INSERT INTO scanpositioners (name, notes, drivepv, readpv, extrapvs)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                 notes = excluded.notes,
                 drivepv = excluded.drivepv,
                 readpv = excluded.readpv,
                 extrapvs = excluded.extrapvs",
            params![name, notes, drivepv, readpv, serde_json::to_string(&extrapvs)?],
        )?;
        tx.commit()?;

        self.get_positioner(name)?
            .ok_or_else(|| ScanDbError::not_found("positioner", name))
    }

    pub fn get_positioner(&self, name: &str) -> Result<Option<PositionerRecord>> {
        let query = format!("{} WHERE name = ?1", PositionerRecord::SELECT);
        Ok(self
            .conn
            .query_row(&query, [name.trim()], PositionerRecord::from_row)
            .optional()?)
    }

    pub fn list_positioners(&self) -> Result<Vec<PositionerRecord>> {
        let query = format!("{} ORDER BY id", PositionerRecord::SELECT);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], PositionerRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn use_positioner(&self, name: &str, in_use: bool) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE scanpositioners SET use = ?2 WHERE name = ?1",
            params![name.trim(), in_use as i64],
        )?;
        if updated == 0 {
            return Err(ScanDbError::not_found("positioner", name));
        }
        Ok(())
    }

    pub fn remove_positioner(&self, name: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM scanpositioners WHERE name = ?1", [name.trim()])?;
        if removed == 0 {
            return Err(ScanDbError::not_found("positioner", name));
        }
        Ok(())
    }
}
