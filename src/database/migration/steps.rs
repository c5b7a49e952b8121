//! Built-in migration steps
//!
//! Each step moves a store from the previous version to its declared target.
//! Steps are frozen once released: a later schema change is a new step, never
//! an edit of an old one.

use super::MigrationStep;
use crate::database::core::{column_exists, table_exists, SchemaVersion};
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Transaction};
use tracing::debug;

/// Name of the configuration every pre-existing slew-scan positioner is attached to
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Info key introduced at 2.0
pub const SCANDATA_PREFIX_KEY: &str = "epics_scandata_prefix";

/// Creates the 1.x layout with plural table names and seeds its default rows
pub struct Baseline;

impl Baseline {
    const LAYOUT: &'static str = r#"
        CREATE TABLE IF NOT EXISTS config (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT
        );
        CREATE TABLE IF NOT EXISTS slewscanpositioners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            drivepv TEXT,
            readpv TEXT,
            extrapvs TEXT
        );
        CREATE TABLE IF NOT EXISTS pvtypes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT
        );
        CREATE TABLE IF NOT EXISTS pvs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvtypes_id INTEGER REFERENCES pvtypes(id)
        );
        CREATE TABLE IF NOT EXISTS instruments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            show INTEGER NOT NULL DEFAULT 1,
            display_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            notes TEXT,
            image TEXT,
            modify_time TEXT,
            instruments_id INTEGER NOT NULL REFERENCES instruments(id),
            UNIQUE (name, instruments_id)
        );
        CREATE TABLE IF NOT EXISTS instrument_pv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instruments_id INTEGER NOT NULL REFERENCES instruments(id),
            pvs_id INTEGER NOT NULL REFERENCES pvs(id),
            display_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE (instruments_id, pvs_id)
        );
        CREATE TABLE IF NOT EXISTS position_pv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            notes TEXT,
            positions_id INTEGER NOT NULL REFERENCES positions(id),
            pvs_id INTEGER NOT NULL REFERENCES pvs(id),
            value TEXT
        );
        CREATE TABLE IF NOT EXISTS scanpositioners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            drivepv TEXT,
            readpv TEXT,
            extrapvs TEXT
        );
        CREATE TABLE IF NOT EXISTS scancounters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS scandetectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            kind TEXT,
            options TEXT
        );
        CREATE TABLE IF NOT EXISTS scandetectorconfig (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            kind TEXT,
            text TEXT,
            scandetectors_id INTEGER REFERENCES scandetectors(id),
            modify_time TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS extrapvs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1
        );
    "#;

    const PV_TYPES: &'static [(&'static str, &'static str)] = &[
        ("numeric", "Numeric Value"),
        ("enum", "Enumeration Value"),
        ("string", "String Value"),
        ("motor", "Motor Value"),
    ];

    const INFO_DEFAULTS: &'static [(&'static str, &'static str)] = &[
        ("user_name", ""),
        ("experiment_id", ""),
        ("user_folder", ""),
        ("request_abort", "0"),
        ("request_pause", "0"),
        ("request_resume", "0"),
        ("request_killall", "0"),
        ("request_shutdown", "0"),
    ];
}

impl MigrationStep for Baseline {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn target(&self) -> SchemaVersion {
        SchemaVersion::new(1, 0)
    }

    fn apply(&self, tx: &Transaction<'_>) -> Result<()> {
        // the plural layout must never be created next to the singular one
        for (_, singular) in SingularNames::TABLE_RENAMES {
            if table_exists(tx, singular)? {
                return Err(ScanDbError::SchemaConflict(format!(
                    "table '{}' already exists before the 1.0 layout",
                    singular
                )));
            }
        }
        tx.execute_batch(Self::LAYOUT)?;

        for (name, notes) in Self::PV_TYPES {
            tx.execute(
                "INSERT OR IGNORE INTO pvtypes (name, notes) VALUES (?1, ?2)",
                params![name, notes],
            )?;
        }
        for (key, value) in Self::INFO_DEFAULTS {
            tx.execute(
                "INSERT OR IGNORE INTO info (keyname, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        Ok(())
    }
}

/// Moves the 1.x layout to singular table names and `<entity>_id` foreign keys
///
/// Also attaches every slew-scan positioner to a configuration and records the
/// scan data prefix.
pub struct SingularNames {
    scandata_prefix: String,
}

impl SingularNames {
    const TABLE_RENAMES: &'static [(&'static str, &'static str)] = &[
        ("instruments", "instrument"),
        ("pvtypes", "pvtype"),
        ("pvs", "pv"),
        ("positions", "position"),
    ];

    /// (table, old column, new column), table names already singular
    const COLUMN_RENAMES: &'static [(&'static str, &'static str, &'static str)] = &[
        ("pv", "pvtypes_id", "pvtype_id"),
        ("position", "instruments_id", "instrument_id"),
        ("instrument_pv", "instruments_id", "instrument_id"),
        ("instrument_pv", "pvs_id", "pv_id"),
        ("position_pv", "positions_id", "position_id"),
        ("position_pv", "pvs_id", "pv_id"),
    ];

    const INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_pv_pvtype ON pv(pvtype_id)",
        "CREATE INDEX IF NOT EXISTS idx_position_instrument ON position(instrument_id)",
        "CREATE INDEX IF NOT EXISTS idx_instrument_pv_instrument ON instrument_pv(instrument_id)",
        "CREATE INDEX IF NOT EXISTS idx_position_pv_position ON position_pv(position_id)",
        "CREATE INDEX IF NOT EXISTS idx_slewscan_config ON slewscanpositioners(config_id)",
    ];

    pub fn new(scandata_prefix: impl Into<String>) -> Self {
        Self {
            scandata_prefix: scandata_prefix.into(),
        }
    }

    fn attach_slewscan_config(&self, tx: &Transaction<'_>) -> Result<()> {
        if !column_exists(tx, "slewscanpositioners", "config_id")? {
            tx.execute(
                "ALTER TABLE slewscanpositioners ADD COLUMN config_id INTEGER REFERENCES config(id)",
                [],
            )?;
        }

        tx.execute(
            "INSERT OR IGNORE INTO config (name, notes) VALUES (?1, 'slew scan configuration')",
            [DEFAULT_CONFIG_NAME],
        )?;
        let updated = tx.execute(
            "UPDATE slewscanpositioners
             SET config_id = (SELECT id FROM config WHERE name = ?1)
             WHERE config_id IS NULL",
            [DEFAULT_CONFIG_NAME],
        )?;
        debug!("attached {} slew scan positioners to default config", updated);
        Ok(())
    }
}

impl Default for SingularNames {
    fn default() -> Self {
        Self::new("")
    }
}

impl MigrationStep for SingularNames {
    fn name(&self) -> &'static str {
        "singular-names"
    }

    fn target(&self) -> SchemaVersion {
        SchemaVersion::new(2, 0)
    }

    fn apply(&self, tx: &Transaction<'_>) -> Result<()> {
        for (old, new) in Self::TABLE_RENAMES {
            rename_table(tx, old, new)?;
        }
        for (table, old, new) in Self::COLUMN_RENAMES {
            rename_column(tx, table, old, new)?;
        }

        self.attach_slewscan_config(tx)?;
        for sql in Self::INDEXES {
            tx.execute(sql, [])?;
        }

        tx.execute(
            "INSERT OR IGNORE INTO info (keyname, value, notes)
             VALUES (?1, ?2, 'prefix for scan data PVs')",
            params![SCANDATA_PREFIX_KEY, self.scandata_prefix],
        )?;
        Ok(())
    }
}

/// Rename a table together with its identifier sequence
///
/// A table already carrying the new name is left alone. Finding both names,
/// or neither, means the store is in a shape no step was written for.
pub fn rename_table(tx: &Transaction<'_>, old: &str, new: &str) -> Result<()> {
    match (table_exists(tx, old)?, table_exists(tx, new)?) {
        (true, false) => {
            tx.execute(&format!("ALTER TABLE \"{}\" RENAME TO \"{}\"", old, new), [])?;
            rename_sequence(tx, old, new)?;
            debug!("renamed table {} -> {}", old, new);
            Ok(())
        }
        (false, true) => {
            debug!("table {} already renamed to {}", old, new);
            Ok(())
        }
        (true, true) => Err(ScanDbError::SchemaConflict(format!(
            "both '{}' and '{}' exist",
            old, new
        ))),
        (false, false) => Err(ScanDbError::SchemaConflict(format!(
            "table '{}' not found",
            old
        ))),
    }
}

/// Move the `sqlite_sequence` counter of `old` to `new`
///
/// SQLite usually carries the counter along with `ALTER TABLE ... RENAME`;
/// this makes sure no counter is left behind under the old name.
fn rename_sequence(tx: &Transaction<'_>, old: &str, new: &str) -> Result<()> {
    if !table_exists(tx, "sqlite_sequence")? {
        return Ok(());
    }
    let moved = tx.execute(
        "UPDATE sqlite_sequence SET name = ?2
         WHERE name = ?1 AND NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = ?2)",
        [old, new],
    )?;
    if moved == 0 {
        // both counters present: keep the larger so identifiers are never reused
        tx.execute(
            "UPDATE sqlite_sequence
             SET seq = MAX(seq, COALESCE((SELECT seq FROM sqlite_sequence WHERE name = ?1), 0))
             WHERE name = ?2",
            [old, new],
        )?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [old])?;
    }
    Ok(())
}

/// Rename a column, correcting a stale name left behind by an earlier partial rename
pub fn rename_column(tx: &Transaction<'_>, table: &str, old: &str, new: &str) -> Result<()> {
    match (column_exists(tx, table, old)?, column_exists(tx, table, new)?) {
        (true, false) => {
            tx.execute(
                &format!(
                    "ALTER TABLE \"{}\" RENAME COLUMN \"{}\" TO \"{}\"",
                    table, old, new
                ),
                [],
            )?;
            debug!("renamed column {}.{} -> {}", table, old, new);
            Ok(())
        }
        (false, true) => Ok(()),
        (true, true) => Err(ScanDbError::SchemaConflict(format!(
            "both {}.{} and {}.{} exist",
            table, old, table, new
        ))),
        (false, false) => Err(ScanDbError::SchemaConflict(format!(
            "column {}.{} not found",
            table, old
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{DatabaseConn, SchemaDefinitions};

    fn info_db() -> DatabaseConn {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn.execute_batch(SchemaDefinitions::INFO_TABLE).unwrap();
        db
    }

    #[test]
    fn test_baseline_creates_plural_layout() {
        let db = info_db();
        let tx = db.transaction().unwrap();
        Baseline.apply(&tx).unwrap();
        tx.commit().unwrap();

        for table in [
            "instruments",
            "positions",
            "pvtypes",
            "pvs",
            "position_pv",
            "scanpositioners",
            "scandetectors",
            "extrapvs",
        ] {
            assert!(db.table_exists(table).unwrap(), "missing {}", table);
        }
        assert!(db.column_exists("position_pv", "positions_id").unwrap());
        assert!(!db.column_exists("slewscanpositioners", "config_id").unwrap());
        assert_eq!(db.table_count("pvtypes").unwrap(), 4);
    }

    #[test]
    fn test_baseline_apply_twice_does_not_duplicate_seeds() {
        let db = info_db();
        for _ in 0..2 {
            let tx = db.transaction().unwrap();
            Baseline.apply(&tx).unwrap();
            tx.commit().unwrap();
        }
        assert_eq!(db.table_count("pvtypes").unwrap(), 4);
    }

    #[test]
    fn test_baseline_refuses_singular_tables() {
        let db = info_db();
        db.execute("CREATE TABLE instrument (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let tx = db.transaction().unwrap();
        assert!(matches!(
            Baseline.apply(&tx),
            Err(ScanDbError::SchemaConflict(_))
        ));
        drop(tx);
        assert!(!db.table_exists("instruments").unwrap());
    }

    #[test]
    fn test_rename_table_states() {
        let db = info_db();
        db.execute("CREATE TABLE things (id INTEGER PRIMARY KEY AUTOINCREMENT)")
            .unwrap();
        db.execute("INSERT INTO things DEFAULT VALUES").unwrap();

        let tx = db.transaction().unwrap();
        rename_table(&tx, "things", "thing").unwrap();
        // second call sees the new name only and leaves it alone
        rename_table(&tx, "things", "thing").unwrap();
        assert!(matches!(
            rename_table(&tx, "widgets", "widget"),
            Err(ScanDbError::SchemaConflict(_))
        ));
        tx.commit().unwrap();

        let seq_name: String = db
            .conn
            .query_row("SELECT name FROM sqlite_sequence", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seq_name, "thing");
    }

    #[test]
    fn test_rename_table_conflict_when_both_exist() {
        let db = info_db();
        db.execute("CREATE TABLE things (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute("CREATE TABLE thing (id INTEGER PRIMARY KEY)")
            .unwrap();
        let tx = db.transaction().unwrap();
        assert!(matches!(
            rename_table(&tx, "things", "thing"),
            Err(ScanDbError::SchemaConflict(_))
        ));
    }

    #[test]
    fn test_rename_column_states() {
        let db = info_db();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, positions_id INTEGER, pv_id INTEGER, pvs_id INTEGER)")
            .unwrap();

        let tx = db.transaction().unwrap();
        rename_column(&tx, "t", "positions_id", "position_id").unwrap();
        rename_column(&tx, "t", "positions_id", "position_id").unwrap();
        assert!(matches!(
            rename_column(&tx, "t", "pvs_id", "pv_id"),
            Err(ScanDbError::SchemaConflict(_))
        ));
        assert!(matches!(
            rename_column(&tx, "t", "instruments_id", "instrument_id"),
            Err(ScanDbError::SchemaConflict(_))
        ));
        tx.commit().unwrap();

        assert!(db.column_exists("t", "position_id").unwrap());
        assert!(!db.column_exists("t", "positions_id").unwrap());
    }
}
