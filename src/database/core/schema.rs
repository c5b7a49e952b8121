//! Database schema management
//!
//! This module holds the canonical (singular, `<entity>_id`) table definitions
//! of a scan database and the checks used to decide whether a store is
//! current, needs migration or has drifted.

use crate::database::core::connection::table_exists;
use crate::database::core::version::{SchemaVersion, CURRENT_SCHEMA_VERSION};
use crate::error::{Result, ScanDbError};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Key of the `info` row holding the schema version
pub const VERSION_KEY: &str = "version";

/// Tables every current store must have
pub const CANONICAL_TABLES: &[&str] = &[
    "info",
    "config",
    "pvtype",
    "pv",
    "instrument",
    "position",
    "instrument_pv",
    "position_pv",
    "slewscanpositioners",
    "scanpositioners",
    "scancounters",
    "scandetectors",
    "scandetectorconfig",
    "extrapvs",
];

/// Plural table names from the 1.x layout; none may survive a migration
pub const LEGACY_TABLES: &[&str] = &["instruments", "positions", "pvtypes", "pvs"];

/// Schema definitions for the canonical layout
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// Key/value metadata; shared by every schema generation
    pub const INFO_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS info (
            keyname TEXT PRIMARY KEY NOT NULL,
            value TEXT,
            notes TEXT,
            modify_time TEXT NOT NULL DEFAULT (datetime('now')),
            create_time TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#;

    pub const CONFIG_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS config (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT
        );
    "#;

    pub const PVTYPE_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS pvtype (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT
        );
    "#;

    pub const PV_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS pv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvtype_id INTEGER REFERENCES pvtype(id)
        );
    "#;

    pub const INSTRUMENT_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS instrument (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            show INTEGER NOT NULL DEFAULT 1,
            display_order INTEGER NOT NULL DEFAULT 0
        );
    "#;

    pub const POSITION_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS position (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            notes TEXT,
            image TEXT,
            modify_time TEXT,
            instrument_id INTEGER NOT NULL REFERENCES instrument(id),
            UNIQUE (name, instrument_id)
        );
    "#;

    pub const INSTRUMENT_PV_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS instrument_pv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instrument_id INTEGER NOT NULL REFERENCES instrument(id),
            pv_id INTEGER NOT NULL REFERENCES pv(id),
            display_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE (instrument_id, pv_id)
        );
    "#;

    pub const POSITION_PV_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS position_pv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            notes TEXT,
            position_id INTEGER NOT NULL REFERENCES position(id),
            pv_id INTEGER NOT NULL REFERENCES pv(id),
            value TEXT
        );
    "#;

    pub const SLEWSCAN_POSITIONERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS slewscanpositioners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            drivepv TEXT,
            readpv TEXT,
            extrapvs TEXT,
            config_id INTEGER REFERENCES config(id)
        );
    "#;

    pub const SCAN_POSITIONERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS scanpositioners (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            drivepv TEXT,
            readpv TEXT,
            extrapvs TEXT
        );
    "#;

    pub const SCAN_COUNTERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS scancounters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1
        );
    "#;

    pub const SCAN_DETECTORS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS scandetectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1,
            kind TEXT,
            options TEXT
        );
    "#;

    pub const SCAN_DETECTOR_CONFIG_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS scandetectorconfig (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            kind TEXT,
            text TEXT,
            scandetectors_id INTEGER REFERENCES scandetectors(id),
            modify_time TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#;

    /// PVs recorded at the breakpoints of a scan
    pub const EXTRA_PVS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS extrapvs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            notes TEXT,
            pvname TEXT,
            use INTEGER NOT NULL DEFAULT 1
        );
    "#;

    /// Tables in dependency order (parents before children)
    pub const TABLES: &'static [(&'static str, &'static str)] = &[
        ("info", Self::INFO_TABLE),
        ("config", Self::CONFIG_TABLE),
        ("pvtype", Self::PVTYPE_TABLE),
        ("pv", Self::PV_TABLE),
        ("instrument", Self::INSTRUMENT_TABLE),
        ("position", Self::POSITION_TABLE),
        ("instrument_pv", Self::INSTRUMENT_PV_TABLE),
        ("position_pv", Self::POSITION_PV_TABLE),
        ("slewscanpositioners", Self::SLEWSCAN_POSITIONERS_TABLE),
        ("scanpositioners", Self::SCAN_POSITIONERS_TABLE),
        ("scancounters", Self::SCAN_COUNTERS_TABLE),
        ("scandetectors", Self::SCAN_DETECTORS_TABLE),
        ("scandetectorconfig", Self::SCAN_DETECTOR_CONFIG_TABLE),
        ("extrapvs", Self::EXTRA_PVS_TABLE),
    ];

    pub const INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_pv_pvtype ON pv(pvtype_id)",
        "CREATE INDEX IF NOT EXISTS idx_position_instrument ON position(instrument_id)",
        "CREATE INDEX IF NOT EXISTS idx_instrument_pv_instrument ON instrument_pv(instrument_id)",
        "CREATE INDEX IF NOT EXISTS idx_position_pv_position ON position_pv(position_id)",
        "CREATE INDEX IF NOT EXISTS idx_slewscan_config ON slewscanpositioners(config_id)",
    ];
}

/// One entry of `sqlite_master`, used to compare schemas before and after work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
    pub sql: Option<String>,
}

/// Read the recorded schema version
///
/// Fails with [`ScanDbError::SchemaMissing`] when the store has no `info`
/// table or no `version` row. The value is always read from the store, never
/// cached.
pub fn read_version(conn: &Connection) -> Result<SchemaVersion> {
    if !table_exists(conn, "info")? {
        return Err(ScanDbError::SchemaMissing);
    }
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM info WHERE keyname = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value.flatten() {
        Some(v) => v.parse(),
        None => Err(ScanDbError::SchemaMissing),
    }
}

/// Schema manager for a scan database
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create every canonical table and index that is absent
    ///
    /// Invoking this on a store that already has the canonical layout is a
    /// no-op. A store still carrying plural 1.x tables is refused: creating
    /// the canonical tables next to them would leave both forms in place.
    pub fn create_tables(&self) -> Result<()> {
        if let Some(legacy) = self.legacy_tables()?.first() {
            return Err(ScanDbError::SchemaConflict(format!(
                "legacy table '{}' present, migrate before creating tables",
                legacy
            )));
        }

        for (_, sql) in SchemaDefinitions::TABLES {
            self.conn.execute_batch(sql)?;
        }
        for sql in SchemaDefinitions::INDEXES {
            self.conn.execute(sql, [])?;
        }
        Ok(())
    }

    /// Check the current schema status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        let version = match read_version(self.conn) {
            Ok(v) => v,
            Err(ScanDbError::SchemaMissing) => return Ok(SchemaStatus::NotInitialized),
            Err(e) => return Err(e),
        };

        if version == CURRENT_SCHEMA_VERSION {
            if self.verify_integrity()? {
                Ok(SchemaStatus::Current)
            } else {
                Ok(SchemaStatus::Corrupted)
            }
        } else if version < CURRENT_SCHEMA_VERSION {
            Ok(SchemaStatus::NeedsMigration {
                from: version,
                to: CURRENT_SCHEMA_VERSION,
            })
        } else {
            Ok(SchemaStatus::Incompatible {
                database_version: version,
                required_version: CURRENT_SCHEMA_VERSION,
            })
        }
    }

    /// All canonical tables exist and no legacy table remains
    pub fn verify_integrity(&self) -> Result<bool> {
        for table in CANONICAL_TABLES {
            if !table_exists(self.conn, table)? {
                return Ok(false);
            }
        }
        Ok(self.legacy_tables()?.is_empty())
    }

    /// Legacy plural tables still present in the store
    pub fn legacy_tables(&self) -> Result<Vec<&'static str>> {
        let mut found = vec![];
        for table in LEGACY_TABLES {
            if table_exists(self.conn, table)? {
                found.push(*table);
            }
        }
        Ok(found)
    }

    /// Every table, index and trigger definition, ordered by kind and name
    pub fn schema_snapshot(&self) -> Result<Vec<SchemaObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, name, sql FROM sqlite_master
             WHERE name NOT LIKE 'sqlite_%'
             ORDER BY type, name",
        )?;
        let objects = stmt
            .query_map([], |row| {
                Ok(SchemaObject {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(objects)
    }

    /// Row counts of the canonical tables that exist
    pub fn table_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut counts = vec![];
        for table in CANONICAL_TABLES {
            if table_exists(self.conn, table)? {
                let query = format!("SELECT COUNT(*) FROM \"{}\"", table);
                let count: u64 = self.conn.query_row(&query, [], |row| row.get(0))?;
                counts.push((table.to_string(), count));
            }
        }
        Ok(counts)
    }
}

/// Status of the database schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No recorded version (fresh or never provisioned)
    NotInitialized,

    /// Schema is current and valid
    Current,

    /// Schema needs migration from an older version
    NeedsMigration {
        from: SchemaVersion,
        to: SchemaVersion,
    },

    /// Database is from a newer version of this software
    Incompatible {
        database_version: SchemaVersion,
        required_version: SchemaVersion,
    },

    /// Version says current but tables are missing or legacy tables remain
    Corrupted,
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaStatus::NotInitialized => write!(f, "not initialized"),
            SchemaStatus::Current => write!(f, "current"),
            SchemaStatus::NeedsMigration { from, to } => {
                write!(f, "needs migration ({} -> {})", from, to)
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => write!(
                f,
                "incompatible (database {}, required {})",
                database_version, required_version
            ),
            SchemaStatus::Corrupted => write!(f, "corrupted"),
        }
    }
}
