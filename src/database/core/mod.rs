//! Core database infrastructure
//!
//! This module provides the foundational database components of a scan database:
//! - `DatabaseConn`: SQLite connection wrapper with foreign keys enforced
//! - `SchemaManager`: canonical table definitions and schema checks
//! - `SchemaStatus`: schema state enumeration
//! - `SchemaVersion`: the `major.minor` version stored in the `info` table

mod connection;
mod schema;
mod version;

pub use connection::{column_exists, table_exists, DatabaseConn, DEFAULT_BUSY_TIMEOUT};
pub use schema::{
    read_version, SchemaDefinitions, SchemaManager, SchemaObject, SchemaStatus, CANONICAL_TABLES,
    LEGACY_TABLES, VERSION_KEY,
};
pub use version::{SchemaVersion, CURRENT_SCHEMA_VERSION};
