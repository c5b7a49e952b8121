//! Detectors, counters and extra PVs
//!
//! Detectors are triggered at every scan point and are addressed by their
//! PV prefix. Counters are plain PVs read along with the detectors. Extra
//! PVs are recorded only at the breakpoints of a scan.

use super::pv::{normalize_pvname, upsert_pv};
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub pvname: Option<String>,
    pub in_use: bool,
    pub kind: Option<String>,
    pub options: Option<String>,
}

impl DetectorRecord {
    const SELECT: &'static str =
        "SELECT id, name, notes, pvname, use, kind, options FROM scandetectors";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DetectorRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            pvname: row.get(3)?,
            in_use: row.get::<_, i64>(4)? != 0,
            kind: row.get(5)?,
            options: row.get(6)?,
        })
    }
}

/// Saved setup text for a detector, e.g. ROI definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorConfigRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub kind: Option<String>,
    pub text: Option<String>,
    pub modify_time: String,
}

/// A row of `scancounters` or `extrapvs`; both are a name bound to one PV
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedPvRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub pvname: Option<String>,
    pub in_use: bool,
}

impl NamedPvRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(NamedPvRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            notes: row.get(2)?,
            pvname: row.get(3)?,
            in_use: row.get::<_, i64>(4)? != 0,
        })
    }
}

/// Tables holding [`NamedPvRecord`]s
#[derive(Debug, Clone, Copy)]
enum NamedPvTable {
    Counters,
    ExtraPvs,
}

impl NamedPvTable {
    fn table(self) -> &'static str {
        match self {
            NamedPvTable::Counters => "scancounters",
            NamedPvTable::ExtraPvs => "extrapvs",
        }
    }

    fn kind(self) -> &'static str {
        match self {
            NamedPvTable::Counters => "counter",
            NamedPvTable::ExtraPvs => "extra pv",
        }
    }
}

/// Repository for detectors, detector configurations, counters and extra PVs
pub struct DetectorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DetectorRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add or replace a detector
    ///
    /// The PV prefix is stored as given and is not registered as a PV: a
    /// detector is a group of records, not one channel.
    pub fn add_detector(
        &self,
        name: &str,
        pvname: &str,
        kind: &str,
        options: &str,
    ) -> Result<DetectorRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO scandetectors (name, pvname, kind, options) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 pvname = excluded.pvname,
                 kind = excluded.kind,
                 options = excluded.options",
            params![name, pvname.trim(), kind, options],
        )?;
        self.get_detector(name)?
            .ok_or_else(|| ScanDbError::not_found("detector", name))
    }

    pub fn get_detector(&self, name: &str) -> Result<Option<DetectorRecord>> {
        let query = format!("{} WHERE name = ?1", DetectorRecord::SELECT);
        Ok(self
            .conn
            .query_row(&query, [name.trim()], DetectorRecord::from_row)
            .optional()?)
    }

    /// First detector using the given PV prefix
    pub fn find_detector_by_pv(&self, pvname: &str) -> Result<Option<DetectorRecord>> {
        let query = format!(
            "{} WHERE pvname = ?1 ORDER BY id LIMIT 1",
            DetectorRecord::SELECT
        );
        Ok(self
            .conn
            .query_row(&query, [pvname.trim()], DetectorRecord::from_row)
            .optional()?)
    }

    pub fn list_detectors(&self) -> Result<Vec<DetectorRecord>> {
        let query = format!("{} ORDER BY id", DetectorRecord::SELECT);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], DetectorRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn use_detector(&self, name: &str, in_use: bool) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE scandetectors SET use = ?2 WHERE name = ?1",
            params![name.trim(), in_use as i64],
        )?;
        if updated == 0 {
            return Err(ScanDbError::not_found("detector", name));
        }
        Ok(())
    }

    /// Remove a detector; fails while a detector configuration points at it
    pub fn remove_detector(&self, name: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM scandetectors WHERE name = ?1", [name.trim()])?;
        if removed == 0 {
            return Err(ScanDbError::not_found("detector", name));
        }
        Ok(())
    }

    /// Insert or update a detector configuration
    ///
    /// `notes` of `None` keeps the stored notes.
    pub fn set_detectorconfig(
        &self,
        name: &str,
        text: &str,
        notes: Option<&str>,
    ) -> Result<DetectorConfigRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO scandetectorconfig (name, text, notes) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                 text = excluded.text,
                 notes = COALESCE(excluded.notes, scandetectorconfig.notes),
                 modify_time = datetime('now')",
            params![name, text, notes],
        )?;
        self.get_detectorconfig(name)?
            .ok_or_else(|| ScanDbError::not_found("detector config", name))
    }

    pub fn get_detectorconfig(&self, name: &str) -> Result<Option<DetectorConfigRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, notes, kind, text, modify_time
                 FROM scandetectorconfig WHERE name = ?1",
                [name.trim()],
                |row| {
                    Ok(DetectorConfigRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        notes: row.get(2)?,
                        kind: row.get(3)?,
                        text: row.get(4)?,
                        modify_time: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn list_detectorconfigs(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM scandetectorconfig ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Add or replace a counter, a non-triggered PV read at every point
    pub fn add_counter(&self, name: &str, pvname: &str) -> Result<NamedPvRecord> {
        self.add_named_pv(NamedPvTable::Counters, name, pvname, true)
    }

    pub fn get_counter(&self, name: &str) -> Result<Option<NamedPvRecord>> {
        self.get_named_pv(NamedPvTable::Counters, name)
    }

    pub fn list_counters(&self) -> Result<Vec<NamedPvRecord>> {
        self.list_named_pvs(NamedPvTable::Counters)
    }

    pub fn remove_counter(&self, name: &str) -> Result<()> {
        self.remove_named_pv(NamedPvTable::Counters, name)
    }

    /// Add or replace a PV recorded at the breakpoints of a scan
    pub fn add_extrapv(&self, name: &str, pvname: &str, in_use: bool) -> Result<NamedPvRecord> {
        self.add_named_pv(NamedPvTable::ExtraPvs, name, pvname, in_use)
    }

    pub fn get_extrapv(&self, name: &str) -> Result<Option<NamedPvRecord>> {
        self.get_named_pv(NamedPvTable::ExtraPvs, name)
    }

    pub fn list_extrapvs(&self) -> Result<Vec<NamedPvRecord>> {
        self.list_named_pvs(NamedPvTable::ExtraPvs)
    }

    pub fn remove_extrapv(&self, name: &str) -> Result<()> {
        self.remove_named_pv(NamedPvTable::ExtraPvs, name)
    }

    fn add_named_pv(
        &self,
        table: NamedPvTable,
        name: &str,
        pvname: &str,
        in_use: bool,
    ) -> Result<NamedPvRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }
        let pvname = normalize_pvname(pvname);

        let tx = self.conn.unchecked_transaction()?;
        upsert_pv(&tx, &pvname, None, name)?;
        tx.execute(
            &format!(
                "INSERT INTO {} (name, pvname, use) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET pvname = excluded.pvname, use = excluded.use",
                table.table()
            ),
            params![name, pvname, in_use as i64],
        )?;
        tx.commit()?;

        self.get_named_pv(table, name)?
            .ok_or_else(|| ScanDbError::not_found(table.kind(), name))
    }

    fn get_named_pv(&self, table: NamedPvTable, name: &str) -> Result<Option<NamedPvRecord>> {
        let query = format!(
            "SELECT id, name, notes, pvname, use FROM {} WHERE name = ?1",
            table.table()
        );
        Ok(self
            .conn
            .query_row(&query, [name.trim()], NamedPvRecord::from_row)
            .optional()?)
    }

    fn list_named_pvs(&self, table: NamedPvTable) -> Result<Vec<NamedPvRecord>> {
        let query = format!(
            "SELECT id, name, notes, pvname, use FROM {} ORDER BY id",
            table.table()
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], NamedPvRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn remove_named_pv(&self, table: NamedPvTable, name: &str) -> Result<()> {
        let removed = self.conn.execute(
            &format!("DELETE FROM {} WHERE name = ?1", table.table()),
            [name.trim()],
        )?;
        if removed == 0 {
            return Err(ScanDbError::not_found(table.kind(), name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::scan::ScanDatabase;

    #[test]
    fn test_detectors() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let detectors = db.detectors();

        let scaler = detectors
            .add_detector("scaler", "13IDE:scaler1", "scaler", r#"{"nchan": 8}"#)
            .unwrap();
        assert_eq!(scaler.pvname.as_deref(), Some("13IDE:scaler1"));
        assert!(scaler.in_use);
                assert_eq!(db.pvs().count().unwrap(), 0);

        let found = detectors.find_detector_by_pv(" 13IDE:scaler1 ").unwrap().unwrap();
        assert_eq!(found.name, "scaler");
        assert!(detectors.find_detector_by_pv("13IDE:xmap").unwrap().is_none());

        detectors.use_detector("scaler", false).unwrap();
        assert!(!detectors.get_detector("scaler").unwrap().unwrap().in_use);
        assert!(matches!(
            detectors.use_detector("xspress", true),
            Err(ScanDbError::NotFound { .. })
        ));

        detectors.remove_detector("scaler").unwrap();
        assert!(detectors.list_detectors().unwrap().is_empty());
    }

    #[test]
    fn test_detector_with_config_cannot_be_removed() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let detectors = db.detectors();
        let det = detectors
            .add_detector("xmap", "13SDD1:", "multimca", "")
            .unwrap();
        detectors.set_detectorconfig("xmap rois", "roi 1 100 200", None).unwrap();
        db.connection()
            .execute(
                "UPDATE scandetectorconfig SET scandetectors_id = ?1 WHERE name = 'xmap rois'",
                [det.id],
            )
            .unwrap();

        assert!(matches!(
            detectors.remove_detector("xmap"),
            Err(ScanDbError::ReferentialViolation(_))
        ));
    }

    #[test]
    fn test_detectorconfig_keeps_notes() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let detectors = db.detectors();
        detectors
            .set_detectorconfig("xmap rois", "roi 1", Some("Fe Ka"))
            .unwrap();
        let conf = detectors
            .set_detectorconfig("xmap rois", "roi 2", None)
            .unwrap();
        assert_eq!(conf.text.as_deref(), Some("roi 2"));
        assert_eq!(conf.notes.as_deref(), Some("Fe Ka"));
        assert_eq!(detectors.list_detectorconfigs().unwrap(), vec!["xmap rois"]);
    }

    #[test]
    fn test_counters_and_extrapvs() {
        let db = ScanDatabase::open_in_memory().unwrap();
        let detectors = db.detectors();

        let i0 = detectors.add_counter("i0", "13IDE:IP330_1").unwrap();
        assert_eq!(i0.pvname.as_deref(), Some("13IDE:IP330_1.VAL"));
        let ring = detectors
            .add_extrapv("ring current", "S:SRcurrentAI", false)
            .unwrap();
        assert!(!ring.in_use);

        // both register their PV, noted with the name
        assert_eq!(
            db.pvs().get_pv("S:SRcurrentAI").unwrap().unwrap().notes.as_deref(),
            Some("ring current")
        );
        assert_eq!(detectors.list_counters().unwrap().len(), 1);
        assert_eq!(detectors.list_extrapvs().unwrap().len(), 1);
        assert!(detectors.get_counter("ring current").unwrap().is_none());

        detectors.remove_counter("i0").unwrap();
        assert!(detectors.get_counter("i0").unwrap().is_none());
        assert!(matches!(
            detectors.remove_extrapv("i0"),
            Err(ScanDbError::NotFound { .. })
        ));
        assert!(detectors.get_extrapv("ring current").unwrap().is_some());
    }
}
