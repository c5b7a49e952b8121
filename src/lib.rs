#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! scandb - configuration store for EPICS scan control
//!
//! scandb keeps the persistent configuration that a scanning engine and its
//! GUI share: PVs, instruments, saved positions, scan positioners, detectors
//! and a key/value `info` table. Every store records its schema version and is
//! brought forward by ordered, atomic migration steps.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `scandb` administration binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! scandb = { version = "0.2", default-features = false }
//!
//! # Default (CLI binary)
//! scandb = "0.2"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: Schema store, migration engine, repositories and provisioning
//!   - `core`: SQLite connection management and schema definitions
//!   - `migration`: Versioned migration steps and the runner
//!   - `scan`: Repositories for scanning clients
//!   - `provision`: Creation of new scan databases
//!
//! - **[`config`]**: Configuration and credential resolution
//!
//! - **[`error`]**: The [`ScanDbError`] taxonomy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use scandb::{ScanDatabase, CURRENT_SCHEMA_VERSION};
//!
//! let db = ScanDatabase::open("/data/escan/xrm.sqlite3")?;
//! assert_eq!(db.version()?, CURRENT_SCHEMA_VERSION);
//!
//! for summary in db.instruments().summaries()? {
//!     println!("{}: {} PVs, {} positions", summary.name, summary.pvs, summary.positions);
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;

// =============================================================================
// Configuration (always available)
// =============================================================================

pub use config::{ConnectionDefaults, Credentials, ScanDbConfig};

// =============================================================================
// Errors
// =============================================================================

pub use error::{Result, ScanDbError};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

// Core database types
pub use database::{
    DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, SchemaVersion,
    CURRENT_SCHEMA_VERSION,
};

// Migration and provisioning
pub use database::{
    MigrationReport, MigrationStep, Migrator, ProvisionReport, ProvisionRequest, Provisioner,
};

// Scan database and repositories
pub use database::{
    ConfigRecord, DetectorConfigRecord, DetectorRecord, DetectorRepository, InfoRecord,
    InfoRepository, InstrumentRecord, InstrumentRepository, InstrumentSummary, NamedPvRecord,
    PositionRecord, PositionRepository, PositionerRecord, PositionerRepository, PvKind, PvRecord,
    PvRepository, ScanDatabase, SlewPositionerRecord, SlewscanRepository,
};
