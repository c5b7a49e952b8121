//! PV repository
//!
//! Process variables are stored by their EPICS channel name. Names are
//! normalised so that `13XRM:m1` and `13XRM:m1.VAL` refer to the same row.

use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of value a PV carries, matching the labels seeded in `pvtype`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PvKind {
    Numeric,
    Enum,
    String,
    Motor,
}

impl PvKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PvKind::Numeric => "numeric",
            PvKind::Enum => "enum",
            PvKind::String => "string",
            PvKind::Motor => "motor",
        }
    }
}

impl fmt::Display for PvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PvKind {
    type Err = ScanDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "numeric" => Ok(PvKind::Numeric),
            "enum" => Ok(PvKind::Enum),
            "string" => Ok(PvKind::String),
            "motor" => Ok(PvKind::Motor),
            _ => Err(ScanDbError::not_found("pv type", s)),
        }
    }
}

/// A row of the `pv` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PvRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub kind: Option<PvKind>,
}

impl PvRecord {
    pub(crate) const SELECT: &'static str = "SELECT pv.id, pv.name, pv.notes, pvtype.name
         FROM pv LEFT JOIN pvtype ON pvtype.id = pv.pvtype_id";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: Option<String> = row.get(3)?;
        Ok(PvRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            kind: kind.and_then(|k| k.parse().ok()),
        })
    }
}

/// Read a JSON list of PV names stored in column `idx`; NULL or empty is no PVs
pub(crate) fn pv_list_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let json: Option<String> = row.get(idx)?;
    match json.as_deref() {
        None | Some("") => Ok(vec![]),
        Some(json) => serde_json::from_str(json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Normalise an EPICS PV name: a name without a field gets `.VAL`
pub fn normalize_pvname(name: &str) -> String {
    let name = name.trim();
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.VAL", name)
    }
}

/// Insert a PV or update its notes/kind, without opening a transaction
///
/// Empty notes and a missing kind leave the stored values unchanged.
pub(crate) fn upsert_pv(
    conn: &Connection,
    name: &str,
    kind: Option<PvKind>,
    notes: &str,
) -> Result<i64> {
    if name.trim().len() < 2 {
        return Err(ScanDbError::InvalidName(name.to_string()));
    }
    let name = normalize_pvname(name);
    conn.execute(
        "INSERT INTO pv (name, notes, pvtype_id)
         VALUES (?1, ?2, (SELECT id FROM pvtype WHERE name = ?3))
         ON CONFLICT(name) DO UPDATE SET
             notes = CASE WHEN excluded.notes <> '' THEN excluded.notes ELSE pv.notes END,
             pvtype_id = COALESCE(excluded.pvtype_id, pv.pvtype_id)",
        params![name, notes, kind.map(|k| k.as_str())],
    )?;
    let id = conn.query_row("SELECT id FROM pv WHERE name = ?1", [&name], |row| row.get(0))?;
    Ok(id)
}

/// Repository for PV definitions
pub struct PvRepository<'a> {
    conn: &'a Connection,
}

impl<'a> PvRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add a PV if it is not already known
    pub fn add_pv(&self, name: &str, kind: Option<PvKind>, notes: &str) -> Result<PvRecord> {
        let id = upsert_pv(self.conn, name, kind, notes)?;
        let query = format!("{} WHERE pv.id = ?1", PvRecord::SELECT);
        Ok(self.conn.query_row(&query, [id], PvRecord::from_row)?)
    }

    /// Look up a PV by (un-normalised) name
    pub fn get_pv(&self, name: &str) -> Result<Option<PvRecord>> {
        let query = format!("{} WHERE pv.name = ?1", PvRecord::SELECT);
        Ok(self
            .conn
            .query_row(&query, [normalize_pvname(name)], PvRecord::from_row)
            .optional()?)
    }

    pub fn list_pvs(&self) -> Result<Vec<PvRecord>> {
        let query = format!("{} ORDER BY pv.name", PvRecord::SELECT);
        let mut stmt = self.conn.prepare(&query)?;
        let pvs = stmt
            .query_map([], PvRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pvs)
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM pv", [], |row| row.get(0))?)
    }
}
