//! Instrument repository
//!
//! An instrument is a named group of PVs that are moved together, e.g. the
//! motors of a sample stage. Instruments own their saved positions.

use super::pv::{upsert_pv, PvRecord};
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

/// A row of the `instrument` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub show: bool,
    pub display_order: i64,
}

impl InstrumentRecord {
    const SELECT: &'static str =
        "SELECT id, name, notes, show, display_order FROM instrument";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(InstrumentRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            show: row.get::<_, i64>(3)? != 0,
            display_order: row.get(4)?,
        })
    }
}

/// Instrument name with the number of PVs and saved positions it has
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct InstrumentSummary {
    pub name: String,
    pub pvs: u64,
    pub positions: u64,
}

/// Repository for instruments and their PV associations
pub struct InstrumentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> InstrumentRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add an instrument (if absent) and link the given PVs to it
    ///
    /// PVs not yet known are created. The order of `pvs` becomes the display
    /// order of the links.
    pub fn add_instrument(&self, name: &str, pvs: &[&str]) -> Result<InstrumentRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("INSERT OR IGNORE INTO instrument (name) VALUES (?1)", [name])?;
        let instrument_id: i64 =
            tx.query_row("SELECT id FROM instrument WHERE name = ?1", [name], |row| {
                row.get(0)
            })?;

        for (order, pvname) in pvs.iter().enumerate() {
            let pv_id = upsert_pv(&tx, pvname, None, "")?;
            tx.execute(
                "INSERT INTO instrument_pv (instrument_id, pv_id, display_order)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(instrument_id, pv_id) DO UPDATE SET display_order = excluded.display_order",
                params![instrument_id, pv_id, order as i64],
            )?;
        }
        tx.commit()?;

        info!("added instrument '{}' with {} PVs", name, pvs.len());
        self.require(name)
    }

    pub fn get_instrument(&self, name: &str) -> Result<Option<InstrumentRecord>> {
        let query = format!("{} WHERE name = ?1", InstrumentRecord::SELECT);
        Ok(self
            .conn
            .query_row(&query, [name.trim()], InstrumentRecord::from_row)
            .optional()?)
    }

    /// Like [`get_instrument`](Self::get_instrument) but a missing instrument is an error
    pub fn require(&self, name: &str) -> Result<InstrumentRecord> {
        self.get_instrument(name)?
            .ok_or_else(|| ScanDbError::not_found("instrument", name))
    }

    pub fn list_instruments(&self) -> Result<Vec<InstrumentRecord>> {
        let query = format!("{} ORDER BY display_order, name", InstrumentRecord::SELECT);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], InstrumentRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// PVs linked to an instrument, in display order
    pub fn instrument_pvs(&self, name: &str) -> Result<Vec<PvRecord>> {
        let instrument = self.require(name)?;
        let query = format!(
            "{} JOIN instrument_pv ip ON ip.pv_id = pv.id
             WHERE ip.instrument_id = ?1 ORDER BY ip.display_order, pv.name",
            PvRecord::SELECT
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([instrument.id], PvRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn summaries(&self) -> Result<Vec<InstrumentSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.name,
                    (SELECT COUNT(*) FROM instrument_pv ip WHERE ip.instrument_id = i.id),
                    (SELECT COUNT(*) FROM position p WHERE p.instrument_id = i.id)
             FROM instrument i ORDER BY i.display_order, i.name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(InstrumentSummary {
                    name: row.get(0)?,
                    pvs: row.get(1)?,
                    positions: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remove an instrument with all its positions and PV links
    ///
    /// The PVs themselves stay; other instruments may use them.
    pub fn remove_instrument(&self, name: &str) -> Result<()> {
        let instrument = self.require(name)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM position_pv WHERE position_id IN
             (SELECT id FROM position WHERE instrument_id = ?1)",
            [instrument.id],
        )?;
        tx.execute("DELETE FROM position WHERE instrument_id = ?1", [instrument.id])?;
        tx.execute(
            "DELETE FROM instrument_pv WHERE instrument_id = ?1",
            [instrument.id],
        )?;
        tx.execute("DELETE FROM instrument WHERE id = ?1", [instrument.id])?;
        tx.commit()?;

        info!("removed instrument '{}'", instrument.name);
        Ok(())
    }
}
