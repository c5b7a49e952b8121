//! Scan configuration database
//!
//! This module provides the store the scanning engine and GUI work against:
//! - PVs and their types
//! - Instruments and the PVs they group
//! - Saved positions of an instrument
//! - Slew-scan positioners and scan configurations
//! - Step-scan positioners, detectors, counters and extra PVs
//! - The `info` key/value table

mod detector;
mod info;
mod instrument;
mod position;
mod positioner;
mod pv;
mod slewscan;

pub use detector::{DetectorConfigRecord, DetectorRecord, DetectorRepository, NamedPvRecord};
pub use info::{InfoRecord, InfoRepository};
pub use instrument::{InstrumentRecord, InstrumentRepository, InstrumentSummary};
pub use position::{PositionRecord, PositionRepository};
pub use positioner::{PositionerRecord, PositionerRepository};
pub use pv::{normalize_pvname, PvKind, PvRecord, PvRepository};
pub use slewscan::{ConfigRecord, SlewPositionerRecord, SlewscanRepository};

use crate::database::core::{
    read_version, DatabaseConn, SchemaManager, SchemaStatus, SchemaVersion, DEFAULT_BUSY_TIMEOUT,
};
use crate::database::migration::Migrator;
use crate::error::{Result, ScanDbError};
use std::time::Duration;
use tracing::info;

/// An open, current scan database
///
/// Opening never migrates or repairs a store: anything other than a current
/// schema is reported to the caller, and migration is left to an administrator.
pub struct ScanDatabase {
    db: DatabaseConn,
}

impl ScanDatabase {
    /// Open the scan database at the specified path
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> Result<Self> {
        let db = DatabaseConn::open_with_timeout(Some(path), busy_timeout)?;
        match SchemaManager::new(&db.conn).check_status()? {
            SchemaStatus::Current => {
                info!("opened scan database {}", path);
                Ok(Self { db })
            }
            SchemaStatus::NotInitialized => Err(ScanDbError::SchemaMissing),
            SchemaStatus::NeedsMigration { from, to } => Err(ScanDbError::VersionMismatch {
                found: from,
                required: to,
            }),
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => Err(ScanDbError::VersionMismatch {
                found: database_version,
                required: required_version,
            }),
            SchemaStatus::Corrupted => Err(ScanDbError::SchemaConflict(format!(
                "{} is missing tables or still has legacy tables",
                path
            ))),
        }
    }

    /// Create a fully migrated in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let db = DatabaseConn::open_in_memory()?;
        let migrator = Migrator::default();
        migrator.initialize(&db)?;
        migrator.migrate_to_latest(&db)?;
        SchemaManager::new(&db.conn).create_tables()?;
        Ok(Self { db })
    }

    pub fn pvs(&self) -> PvRepository<'_> {
        PvRepository::new(&self.db.conn)
    }

    pub fn instruments(&self) -> InstrumentRepository<'_> {
        InstrumentRepository::new(&self.db.conn)
    }

    pub fn positions(&self) -> PositionRepository<'_> {
        PositionRepository::new(&self.db.conn)
    }

    pub fn info(&self) -> InfoRepository<'_> {
        InfoRepository::new(&self.db.conn)
    }

    pub fn slewscan(&self) -> SlewscanRepository<'_> {
        SlewscanRepository::new(&self.db.conn)
    }

    pub fn positioners(&self) -> PositionerRepository<'_> {
        PositionerRepository::new(&self.db.conn)
    }

    pub fn detectors(&self) -> DetectorRepository<'_> {
        DetectorRepository::new(&self.db.conn)
    }

    /// Recorded schema version, read from the store on every call
    pub fn version(&self) -> Result<SchemaVersion> {
        read_version(&self.db.conn)
    }

    pub fn db(&self) -> &DatabaseConn {
        &self.db
    }

    /// Get the underlying database connection (for cross-table queries)
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.db.conn
    }
}
