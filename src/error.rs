//! Error types for the scan configuration store
//!
//! Every failure the store can report is a [`ScanDbError`]. None of them are
//! retried or repaired inside the library; the caller decides what to do.

use crate::database::core::SchemaVersion;
use rusqlite::ErrorCode;

pub type Result<T> = std::result::Result<T, ScanDbError>;

#[derive(Debug, thiserror::Error)]
pub enum ScanDbError {
    /// The store has no recorded schema version and must be provisioned first
    #[error("schema missing: store has no recorded version, provision it first")]
    SchemaMissing,

    /// A single version bump could not complete; the store is left at its pre-step version
    #[error("migration to version {version} ({step}) failed: {source}")]
    MigrationStepFailed {
        version: SchemaVersion,
        step: &'static str,
        #[source]
        source: Box<ScanDbError>,
    },

    /// A foreign-key or uniqueness invariant would be violated
    #[error("referential violation: {0}")]
    ReferentialViolation(String),

    /// The provisioning target already exists
    #[error("database '{name}' already exists at {path}")]
    AlreadyExists { name: String, path: String },

    /// No target database name was supplied to provisioning
    #[error("no target database name supplied")]
    MissingName,

    #[error("invalid schema version '{0}'")]
    InvalidVersion(String),

    #[error("no migration step reaches version {target} (latest known is {latest})")]
    UnknownTarget {
        target: SchemaVersion,
        latest: SchemaVersion,
    },

    #[error("migration steps must have strictly ascending target versions")]
    InvalidStepOrder,

    /// The store's shape does not match what a migration step expects
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// The store is usable only after an administrator migrates it
    #[error("store is at schema version {found}, this build requires {required}")]
    VersionMismatch {
        found: SchemaVersion,
        required: SchemaVersion,
    },

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("no value supplied for PVs: {}", .0.join(", "))]
    MissingPvValues(Vec<String>),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("info key '{0}' is managed by the migration engine")]
    ReadOnlyKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for ScanDbError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => ScanDbError::ReferentialViolation(e.to_string()),
            _ => ScanDbError::Sqlite(e),
        }
    }
}

impl ScanDbError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ScanDbError::NotFound {
            kind,
            name: name.into(),
        }
    }
}
