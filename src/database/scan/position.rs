//! Position repository
//!
//! A position is a named snapshot of the PV values of one instrument. Saving
//! a position under an existing name replaces it.

use super::instrument::{InstrumentRecord, InstrumentRepository};
use super::pv::normalize_pvname;
use crate::error::{Result, ScanDbError};
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A row of the `position` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionRecord {
    pub id: i64,
    pub name: String,
    pub instrument_id: i64,
    pub notes: Option<String>,
    pub image: Option<String>,
    pub modify_time: Option<String>,
}

impl PositionRecord {
    const SELECT: &'static str =
        "SELECT id, name, instrument_id, notes, image, modify_time FROM position";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PositionRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            instrument_id: row.get(2)?,
            notes: row.get(3)?,
            image: row.get(4)?,
            modify_time: row.get(5)?,
        })
    }
}

/// Repository for saved positions
pub struct PositionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> PositionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn instrument(&self, name: &str) -> Result<InstrumentRecord> {
        InstrumentRepository::new(self.conn).require(name)
    }

    /// Save the values of an instrument's PVs under `name`
    ///
    /// `values` is keyed by PV name (normalised before lookup). Values for
    /// PVs that are not part of the instrument are ignored. If some of the
    /// instrument's PVs have no value, the position is saved without them
    /// when `ignore_missing` is set and rejected otherwise.
    pub fn save_position(
        &self,
        instrument: &str,
        name: &str,
        values: &BTreeMap<String, String>,
        ignore_missing: bool,
    ) -> Result<PositionRecord> {
        let inst = self.instrument(instrument)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanDbError::InvalidName(name.to_string()));
        }

        let values: BTreeMap<String, &String> = values
            .iter()
            .map(|(k, v)| (normalize_pvname(k), v))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT pv.id, pv.name FROM instrument_pv ip JOIN pv ON pv.id = ip.pv_id
             WHERE ip.instrument_id = ?1 ORDER BY ip.display_order",
        )?;
        let pvs = stmt
            .query_map([inst.id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let missing: Vec<String> = pvs
            .iter()
            .filter(|(_, pvname)| !values.contains_key(pvname))
            .map(|(_, pvname)| pvname.clone())
            .collect();
        if !missing.is_empty() {
            if ignore_missing {
                warn!(
                    "saving position '{}' of '{}' without values for {:?}",
                    name, inst.name, missing
                );
            } else {
                return Err(ScanDbError::MissingPvValues(missing));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        delete_position(&tx, inst.id, name)?;
        tx.execute(
            "INSERT INTO position (name, instrument_id, modify_time) VALUES (?1, ?2, ?3)",
            params![
                name,
                inst.id,
                Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
            ],
        )?;
        let position_id = tx.last_insert_rowid();

        for (pv_id, pvname) in &pvs {
            if let Some(value) = values.get(pvname) {
                tx.execute(
                    "INSERT INTO position_pv (position_id, pv_id, value, notes)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        position_id,
                        pv_id,
                        value,
                        format!("{}/{}/{}", inst.name, name, pvname)
                    ],
                )?;
            }
        }
        tx.commit()?;

        info!("saved position '{}' for instrument '{}'", name, inst.name);
        self.require(instrument, name)
    }

    pub fn get_position(&self, instrument: &str, name: &str) -> Result<Option<PositionRecord>> {
        let inst = self.instrument(instrument)?;
        let query = format!(
            "{} WHERE instrument_id = ?1 AND name = ?2",
            PositionRecord::SELECT
        );
        Ok(self
            .conn
            .query_row(&query, params![inst.id, name.trim()], PositionRecord::from_row)
            .optional()?)
    }

    fn require(&self, instrument: &str, name: &str) -> Result<PositionRecord> {
        self.get_position(instrument, name)?
            .ok_or_else(|| ScanDbError::not_found("position", format!("{}/{}", instrument, name)))
    }

    /// Saved PV values of a position, keyed by PV name
    pub fn position_values(&self, instrument: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let position = self.require(instrument, name)?;
        let mut stmt = self.conn.prepare(
            "SELECT pv.name, pp.value FROM position_pv pp
             JOIN pv ON pv.id = pp.pv_id
             WHERE pp.position_id = ?1",
        )?;
        let values = stmt
            .query_map([position.id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .filter_map(|r| match r {
                Ok((pv, Some(value))) => Some(Ok((pv, value))),
                Ok((_, None)) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(values)
    }

    /// Position names of an instrument, oldest first
    pub fn list_positions(&self, instrument: &str) -> Result<Vec<String>> {
        let inst = self.instrument(instrument)?;
        let mut stmt = self.conn.prepare(
            "SELECT name FROM position WHERE instrument_id = ?1 ORDER BY modify_time, id",
        )?;
        let names = stmt
            .query_map([inst.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn rename_position(&self, instrument: &str, old: &str, new: &str) -> Result<()> {
        let position = self.require(instrument, old)?;
        let new = new.trim();
        if new.is_empty() {
            return Err(ScanDbError::InvalidName(new.to_string()));
        }
        self.conn.execute(
            "UPDATE position SET name = ?1 WHERE id = ?2",
            params![new, position.id],
        )?;
        Ok(())
    }

    pub fn remove_position(&self, instrument: &str, name: &str) -> Result<()> {
        let inst = self.instrument(instrument)?;
        let tx = self.conn.unchecked_transaction()?;
        let removed = delete_position(&tx, inst.id, name.trim())?;
        tx.commit()?;
        if !removed {
            return Err(ScanDbError::not_found(
                "position",
                format!("{}/{}", instrument, name),
            ));
        }
        Ok(())
    }

    /// Remove every position of an instrument, returning how many were removed
    pub fn remove_all_positions(&self, instrument: &str) -> Result<usize> {
        let inst = self.instrument(instrument)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM position_pv WHERE position_id IN
             (SELECT id FROM position WHERE instrument_id = ?1)",
            [inst.id],
        )?;
        let removed = tx.execute("DELETE FROM position WHERE instrument_id = ?1", [inst.id])?;
        tx.commit()?;
        Ok(removed)
    }
}

/// Delete one position and its values; `false` if it did not exist
fn delete_position(conn: &Connection, instrument_id: i64, name: &str) -> Result<bool> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM position WHERE instrument_id = ?1 AND name = ?2",
            params![instrument_id, name],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(id) => {
            conn.execute("DELETE FROM position_pv WHERE position_id = ?1", [id])?;
            conn.execute("DELETE FROM position WHERE id = ?1", [id])?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::scan::ScanDatabase;

    fn stage_db() -> ScanDatabase {
        let db = ScanDatabase::open_in_memory().unwrap();
        db.instruments()
            .add_instrument("stage", &["13XRM:m1", "13XRM:m2"])
            .unwrap();
        db
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_save_and_read_position() {
        let db = stage_db();
        let positions = db.positions();
        positions
            .save_position(
                "stage",
                "home",
                &values(&[("13XRM:m1", "0.5"), ("13XRM:m2.VAL", "1.25"), ("other:pv", "9")]),
                false,
            )
            .unwrap();

        let saved = positions.position_values("stage", "home").unwrap();
        assert_eq!(
            saved,
            values(&[("13XRM:m1.VAL", "0.5"), ("13XRM:m2.VAL", "1.25")])
        );
        assert_eq!(positions.list_positions("stage").unwrap(), vec!["home"]);
    }

    #[test]
    fn test_save_replaces_existing() {
        let db = stage_db();
        let positions = db.positions();
        let all = values(&[("13XRM:m1", "0.5"), ("13XRM:m2", "1.25")]);
        positions.save_position("stage", "home", &all, false).unwrap();
        positions
            .save_position("stage", "home", &values(&[("13XRM:m1", "2"), ("13XRM:m2", "3")]), false)
            .unwrap();

        assert_eq!(positions.list_positions("stage").unwrap().len(), 1);
        assert_eq!(
            positions.position_values("stage", "home").unwrap()["13XRM:m1.VAL"],
            "2"
        );
        assert_eq!(db.db().table_count("position_pv").unwrap(), 2);
    }

    #[test]
    fn test_missing_values() {
        let db = stage_db();
        let positions = db.positions();
        let partial = values(&[("13XRM:m1", "0.5")]);

        match positions.save_position("stage", "half", &partial, false) {
            Err(ScanDbError::MissingPvValues(pvs)) => assert_eq!(pvs, vec!["13XRM:m2.VAL"]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(positions.get_position("stage", "half").unwrap().is_none());

        positions.save_position("stage", "half", &partial, true).unwrap();
        assert_eq!(positions.position_values("stage", "half").unwrap().len(), 1);
    }

    #[test]
    fn test_rename_and_remove() {
        let db = stage_db();
        let positions = db.positions();
        let all = values(&[("13XRM:m1", "0"), ("13XRM:m2", "0")]);
        positions.save_position("stage", "a", &all, false).unwrap();
        positions.save_position("stage", "b", &all, false).unwrap();

        // same-named positions within one instrument are rejected by the store
        assert!(matches!(
            positions.rename_position("stage", "a", "b"),
            Err(ScanDbError::ReferentialViolation(_))
        ));
        positions.rename_position("stage", "a", "c").unwrap();
        assert!(positions.get_position("stage", "c").unwrap().is_some());

        positions.remove_position("stage", "c").unwrap();
        assert!(matches!(
            positions.remove_position("stage", "c"),
            Err(ScanDbError::NotFound { .. })
        ));
        assert_eq!(positions.remove_all_positions("stage").unwrap(), 1);
        assert_eq!(db.db().table_count("position_pv").unwrap(), 0);
    }

    #[test]
    fn test_position_pv_requires_existing_pv() {
        let db = stage_db();
        let all = values(&[("13XRM:m1", "0"), ("13XRM:m2", "0")]);
        let home = db.positions().save_position("stage", "home", &all, false).unwrap();

        let err = db
            .connection()
            .execute(
                "INSERT INTO position_pv (position_id, pv_id, value) VALUES (?1, 9999, '1')",
                [home.id],
            )
            .unwrap_err();
        assert!(matches!(
            ScanDbError::from(err),
            ScanDbError::ReferentialViolation(_)
        ));
    }
}
