//! Forward-only schema migrations
//!
//! A store records its schema version in the `info` table. The [`Migrator`]
//! holds an ordered list of [`MigrationStep`]s and applies every step whose
//! target lies above the recorded version, one transaction per step:
//!
//! ```text
//!   0.0 (no-op base) --baseline--> 1.0 --singular-names--> 2.0
//! ```
//!
//! The `version` row is written only here, inside the same transaction as
//! the step it records.

mod steps;

pub use steps::{
    rename_column, rename_table, Baseline, SingularNames, DEFAULT_CONFIG_NAME,
    SCANDATA_PREFIX_KEY,
};

use crate::database::core::{read_version, DatabaseConn, SchemaDefinitions, SchemaVersion, VERSION_KEY};
use crate::error::{Result, ScanDbError};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use tracing::{debug, info, warn};

/// One versioned schema change
pub trait MigrationStep {
    /// Short name used in logs and error reports
    fn name(&self) -> &'static str;

    /// Version the store is at once this step has been applied
    fn target(&self) -> SchemaVersion;

    /// Forward action; runs inside the step's transaction
    ///
    /// Any backfill needed for existing rows to satisfy the post-step
    /// invariants belongs here as well.
    fn apply(&self, tx: &Transaction<'_>) -> Result<()>;
}

/// Outcome of a [`Migrator::migrate`] call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub applied: Vec<SchemaVersion>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Runs migration steps against a store
pub struct Migrator {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new("")
    }
}

impl Migrator {
    /// Migrator with the built-in steps
    ///
    /// `scandata_prefix` is the value recorded for `epics_scandata_prefix`
    /// when a store reaches 2.0 without one.
    pub fn new(scandata_prefix: &str) -> Self {
        Self {
            steps: vec![Box::new(Baseline), Box::new(SingularNames::new(scandata_prefix))],
        }
    }

    /// Migrator with a custom step list; targets must be strictly ascending
    pub fn with_steps(steps: Vec<Box<dyn MigrationStep>>) -> Result<Self> {
        let mut last = SchemaVersion::BASE;
        for step in &steps {
            if step.target() <= last {
                return Err(ScanDbError::InvalidStepOrder);
            }
            last = step.target();
        }
        Ok(Self { steps })
    }

    /// Newest version any step reaches
    pub fn latest(&self) -> SchemaVersion {
        self.steps
            .last()
            .map(|s| s.target())
            .unwrap_or(SchemaVersion::BASE)
    }

    /// Read the recorded version of a store
    pub fn current_version(conn: &Connection) -> Result<SchemaVersion> {
        read_version(conn)
    }

    /// Record the no-op base version on a store that has none
    ///
    /// Returns `true` when the base was written, `false` if the store already
    /// had a version. A store holding tables but no version is refused
    /// without writing anything: the steps cannot know what shape it is in.
    pub fn initialize(&self, db: &DatabaseConn) -> Result<bool> {
        let tx = db.immediate_transaction()?;
        match read_version(&tx) {
            Ok(_) => return Ok(false),
            Err(ScanDbError::SchemaMissing) => {}
            Err(e) => return Err(e),
        }

        let unversioned = unversioned_tables(&tx)?;
        if !unversioned.is_empty() {
            return Err(ScanDbError::SchemaConflict(format!(
                "store has tables but no recorded version: {}",
                unversioned.join(", ")
            )));
        }

        tx.execute_batch(SchemaDefinitions::INFO_TABLE)?;
        tx.execute(
            "INSERT INTO info (keyname, value, notes) VALUES (?1, ?2, 'schema version')
             ON CONFLICT(keyname) DO UPDATE SET value = excluded.value",
            params![VERSION_KEY, SchemaVersion::BASE.to_string()],
        )?;
        tx.commit()?;
        info!("recorded base schema version {}", SchemaVersion::BASE);
        Ok(true)
    }

    /// Apply, in order, every step above the recorded version up to `target`
    ///
    /// A target at or below the recorded version is a no-op. On failure the
    /// store stays at the version of the last completed step and the error
    /// names the step that failed.
    pub fn migrate(&self, db: &DatabaseConn, target: SchemaVersion) -> Result<MigrationReport> {
        let latest = self.latest();
        if target > latest {
            return Err(ScanDbError::UnknownTarget { target, latest });
        }

        let from = read_version(&db.conn)?;
        let mut applied = vec![];

        for step in self.steps.iter().take_while(|s| s.target() <= target) {
            if step.target() <= from {
                continue;
            }
            let version = step.target();
            match run_step(db, step.as_ref()) {
                Ok(true) => {
                    info!("applied migration {} ({})", version, step.name());
                    applied.push(version);
                }
                Ok(false) => {
                    debug!("migration {} already applied, skipping", version);
                }
                Err(e) => {
                    warn!("migration {} ({}) failed: {}", version, step.name(), e);
                    return Err(ScanDbError::MigrationStepFailed {
                        version,
                        step: step.name(),
                        source: Box::new(e),
                    });
                }
            }
        }

        let to = read_version(&db.conn)?;
        Ok(MigrationReport { from, to, applied })
    }

    /// Bring a store to the newest version
    pub fn migrate_to_latest(&self, db: &DatabaseConn) -> Result<MigrationReport> {
        self.migrate(db, self.latest())
    }
}

/// Tables other than `info` and SQLite's own
fn unversioned_tables(tx: &Transaction<'_>) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name <> 'info' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Run one step in its own transaction; `Ok(false)` if it was already applied
fn run_step(db: &DatabaseConn, step: &dyn MigrationStep) -> Result<bool> {
    let tx = db.immediate_transaction()?;

    // re-read under the write lock: another administrator may have finished first
    let current = read_version(&tx)?;
    if step.target() <= current {
        return Ok(false);
    }

    step.apply(&tx)?;
    write_version(&tx, step.target())?;
    check_foreign_keys(&tx)?;
    tx.commit()?;
    Ok(true)
}

fn write_version(tx: &Transaction<'_>, version: SchemaVersion) -> Result<()> {
    let updated = tx.execute(
        "UPDATE info SET value = ?1, modify_time = datetime('now') WHERE keyname = ?2",
        params![version.to_string(), VERSION_KEY],
    )?;
    if updated == 0 {
        return Err(ScanDbError::SchemaMissing);
    }
    Ok(())
}

/// Fail if any row references a missing parent row
fn check_foreign_keys(tx: &Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match violations.first() {
        None => Ok(()),
        Some((table, rowid, parent)) => Err(ScanDbError::ReferentialViolation(format!(
            "{} row {} references a missing {} row ({} violation(s) in total)",
            table,
            rowid.map(|r| r.to_string()).unwrap_or_else(|| "?".to_string()),
            parent,
            violations.len()
        ))),
    }
}
