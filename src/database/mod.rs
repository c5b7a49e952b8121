//! Database module
//!
//! This module provides all database functionality for scandb, organized into:
//!
//! - **core**: Core database infrastructure (SQLite connections, schema definitions, versions)
//! - **migration**: Forward-only, versioned schema migrations
//! - **scan**: Repositories over the canonical tables, used by scanning clients
//! - **provision**: Creation of new scan databases
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   ├── schema      # Canonical table definitions and status checks
//! │   └── version     # SchemaVersion ("2.0")
//! │
//! ├── migration/      # Migration engine
//! │   └── steps       # baseline (1.0), singular names (2.0)
//! │
//! ├── scan/           # Scan configuration store
//! │   ├── pv          # PVs and PV types
//! │   ├── instrument  # Instruments and their PVs
//! │   ├── position    # Saved positions
//! │   ├── slewscan    # Slew-scan positioners and configs
//! │   ├── positioner  # Step-scan positioners
//! │   ├── detector    # Detectors, counters and extra PVs
//! │   └── info        # Key/value table
//! │
//! └── provision       # New databases at the current version
//! ```
//!
//! # Usage
//!
//! ## Provisioning
//!
//! ```rust,ignore
//! use scandb::{Credentials, Provisioner, ProvisionRequest, ScanDbConfig};
//!
//! let config = ScanDbConfig::new(&None)?;
//! let creds = Credentials::resolve(None)?;
//! let report = Provisioner::new(&config).provision(ProvisionRequest {
//!     defaults: creds.connection_defaults(),
//!     name: Some("xrm_2026".to_string()),
//!     force: false,
//! })?;
//! println!("{} created {} at version {}", report.user, report.name, report.version);
//! ```
//!
//! ## Migrating an existing store
//!
//! ```rust,ignore
//! use scandb::database::{DatabaseConn, Migrator};
//!
//! let db = DatabaseConn::open_path("/data/escan/xrm.sqlite3")?;
//! let report = Migrator::default().migrate_to_latest(&db)?;
//! ```
//!
//! ## Scan configuration
//!
//! ```rust,ignore
//! use scandb::database::ScanDatabase;
//!
//! let db = ScanDatabase::open("/data/escan/xrm.sqlite3")?;
//! db.instruments().add_instrument("sample stage", &["13XRM:m1", "13XRM:m2"])?;
//! let values = db.positions().position_values("sample stage", "center")?;
//! ```

pub mod core;
pub mod migration;
pub mod provision;
pub mod scan;

// SQLite connection and schema management
pub use core::{
    DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, SchemaVersion,
    CURRENT_SCHEMA_VERSION,
};

// Migration engine
pub use migration::{MigrationReport, MigrationStep, Migrator};

// Provisioning
pub use provision::{ProvisionReport, ProvisionRequest, Provisioner};

// Scan database (main entry point for scanning clients)
pub use scan::ScanDatabase;

// Repositories
pub use scan::{
    ConfigRecord, DetectorConfigRecord, DetectorRecord, DetectorRepository, InfoRecord,
    InfoRepository, InstrumentRecord, InstrumentRepository, InstrumentSummary, NamedPvRecord,
    PositionRecord, PositionRepository, PositionerRecord, PositionerRepository, PvKind, PvRecord,
    PvRepository, SlewPositionerRecord, SlewscanRepository,
};
