//! Provisioning of new scan databases
//!
//! Each scan database is one SQLite file under the configured data
//! directory. Provisioning creates the file, records the no-op base version
//! and runs every migration step in one pass, so a new store goes through the
//! same steps as an old one.

use crate::config::{ConnectionDefaults, ScanDbConfig};
use crate::database::core::{read_version, DatabaseConn, SchemaManager, SchemaStatus, SchemaVersion};
use crate::database::migration::Migrator;
use crate::database::scan::InfoRepository;
use crate::error::{Result, ScanDbError};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Info key recording who created a store
pub const CREATED_BY_KEY: &str = "created_by";

/// What to provision, and as whom
///
/// The target name is always given separately from the connection defaults;
/// a `dbname` left in a credentials file is never used as the target.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub defaults: ConnectionDefaults,
    pub name: Option<String>,
    /// Bring an existing store up to date instead of failing
    pub force: bool,
}

/// Outcome of a provisioning run, for audit logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub user: String,
    pub name: String,
    pub path: String,
    pub version: SchemaVersion,
    /// `false` when an existing store was brought up to date
    pub created: bool,
}

pub struct Provisioner {
    data_dir: String,
    busy_timeout: Duration,
    migrator: Migrator,
}

impl Provisioner {
    pub fn new(config: &ScanDbConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            busy_timeout: config.busy_timeout(),
            migrator: Migrator::new(&config.scandata_prefix),
        }
    }

    /// Use a different set of migration steps
    pub fn with_migrator(mut self, migrator: Migrator) -> Self {
        self.migrator = migrator;
        self
    }

    /// Create the store named in `req` at the newest schema version
    ///
    /// A store created by this call is removed again if it cannot be
    /// brought to a usable state.
    pub fn provision(&self, req: ProvisionRequest) -> Result<ProvisionReport> {
        let name = validate_name(req.name.as_deref())?;
        let path = format!("{}/{}.sqlite3", self.data_dir.trim_end_matches('/'), name);
        let user = req.defaults.user;

        let exists = Path::new(&path).exists();
        if exists && !req.force {
            return Err(ScanDbError::AlreadyExists { name, path });
        }
        info!(
            "provisioning scan database '{}' at {} for user '{}'",
            name, path, user
        );

        std::fs::create_dir_all(&self.data_dir)?;
        let version = match self.build(&path, &user, !exists) {
            Ok(version) => version,
            Err(e) => {
                if !exists {
                    remove_store_files(&path);
                }
                return Err(e);
            }
        };

        info!(
            "provisioned scan database '{}' at version {} for user '{}'",
            name, version, user
        );
        Ok(ProvisionReport {
            user,
            name,
            path,
            version,
            created: !exists,
        })
    }

    fn build(&self, path: &str, user: &str, created: bool) -> Result<SchemaVersion> {
        let db = DatabaseConn::open_with_timeout(Some(path), self.busy_timeout)?;

        self.migrator.initialize(&db)?;
        let report = self.migrator.migrate_to_latest(&db)?;
        debug!("{} migration steps applied to {}", report.applied.len(), path);

        let schema = SchemaManager::new(&db.conn);
        schema.create_tables()?;
        match schema.check_status()? {
            SchemaStatus::Current => {}
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                return Err(ScanDbError::VersionMismatch {
                    found: database_version,
                    required: required_version,
                })
            }
            status => {
                return Err(ScanDbError::SchemaConflict(format!(
                    "{} is not usable after provisioning: {}",
                    path, status
                )))
            }
        }

        if created {
            InfoRepository::new(&db.conn).set_info(CREATED_BY_KEY, user)?;
        }
        read_version(&db.conn)
    }
}

/// Remove a database file together with its WAL and shared-memory files
fn remove_store_files(path: &str) {
    for file in [path.to_string(), format!("{}-wal", path), format!("{}-shm", path)] {
        match std::fs::remove_file(&file) {
            Ok(()) => warn!("removed incomplete store file {}", file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove incomplete store file {}: {}", file, e),
        }
    }
}

/// Target names become file names: letters, digits, `_`, `-` and `.`,
/// not starting with `.`
fn validate_name(name: Option<&str>) -> Result<String> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ScanDbError::MissingName);
    }
    let valid = !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ScanDbError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{column_exists, table_exists, CURRENT_SCHEMA_VERSION, LEGACY_TABLES};
    use crate::database::migration::{DEFAULT_CONFIG_NAME, SCANDATA_PREFIX_KEY};
    use crate::database::scan::ScanDatabase;
    use tempfile::tempdir;

    fn request(name: Option<&str>, force: bool) -> ProvisionRequest {
        ProvisionRequest {
            defaults: ConnectionDefaults {
                user: "epics".to_string(),
                ..Default::default()
            },
            name: name.map(str::to_string),
            force,
        }
    }

    #[test]
    fn test_provision_new_database() {
        let dir = tempdir().unwrap();
        let mut config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        config.scandata_prefix = "13XRM:SCANDB:".to_string();
        let provisioner = Provisioner::new(&config);

        let report = provisioner.provision(request(Some("xrm_2026"), false)).unwrap();
        assert!(report.created);
        assert_eq!(report.user, "epics");
        assert_eq!(report.name, "xrm_2026");
        assert_eq!(report.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(report.path, config.database_path("xrm_2026"));

        let db = ScanDatabase::open(&report.path).unwrap();
        let conn = db.connection();
        assert_eq!(db.info().get_info("version").unwrap().as_deref(), Some("2.0"));
        for table in LEGACY_TABLES {
            assert!(!table_exists(conn, table).unwrap());
        }
        assert!(table_exists(conn, "position").unwrap());
        assert!(column_exists(conn, "position_pv", "position_id").unwrap());
        assert!(column_exists(conn, "slewscanpositioners", "config_id").unwrap());

        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM slewscanpositioners WHERE config_id IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
        assert!(db.slewscan().get_config(DEFAULT_CONFIG_NAME).unwrap().is_some());
        assert_eq!(
            db.info().get_info(SCANDATA_PREFIX_KEY).unwrap().as_deref(),
            Some("13XRM:SCANDB:")
        );
        assert_eq!(
            db.info().get_info(CREATED_BY_KEY).unwrap().as_deref(),
            Some("epics")
        );
    }

    #[test]
    fn test_existing_database_requires_force() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        let provisioner = Provisioner::new(&config);
        provisioner.provision(request(Some("xrm"), false)).unwrap();

        match provisioner.provision(request(Some("xrm"), false)) {
            Err(ScanDbError::AlreadyExists { name, .. }) => assert_eq!(name, "xrm"),
            other => panic!("unexpected {:?}", other),
        }

        // forcing a current store changes nothing
        let report = provisioner.provision(request(Some("xrm"), true)).unwrap();
        assert!(!report.created);
        assert_eq!(report.version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_missing_or_invalid_name() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        let provisioner = Provisioner::new(&config);

        assert!(matches!(
            provisioner.provision(request(None, false)),
            Err(ScanDbError::MissingName)
        ));
        assert!(matches!(
            provisioner.provision(request(Some("   "), false)),
            Err(ScanDbError::MissingName)
        ));
        for bad in ["../etc", "a/b", ".hidden", "x rm"] {
            assert!(matches!(
                provisioner.provision(request(Some(bad), false)),
                Err(ScanDbError::InvalidName(_))
            ));
        }
        // nothing was created
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_force_migrates_legacy_store() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        let path = config.database_path("old");
        {
            let db = DatabaseConn::open_path(&path).unwrap();
            let migrator = Migrator::default();
            migrator.initialize(&db).unwrap();
            migrator.migrate(&db, SchemaVersion::new(1, 0)).unwrap();
            db.execute(
                "INSERT INTO slewscanpositioners (name, drivepv) VALUES ('fine x', '13XRM:m1.VAL')",
            )
            .unwrap();
        }

        let report = Provisioner::new(&config)
            .provision(request(Some("old"), true))
            .unwrap();
        assert!(!report.created);
        assert_eq!(report.version, CURRENT_SCHEMA_VERSION);

        let db = ScanDatabase::open(&path).unwrap();
        let pos = db.slewscan().get_slewpositioner("fine x").unwrap().unwrap();
        assert_eq!(pos.config.as_deref(), Some(DEFAULT_CONFIG_NAME));
        // only stores created here carry a creator
        assert!(db.info().get_info(CREATED_BY_KEY).unwrap().is_none());
    }

    #[test]
    fn test_force_refuses_unversioned_tables() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        let path = config.database_path("handmade");
        {
            let db = DatabaseConn::open_path(&path).unwrap();
            SchemaManager::new(&db.conn).create_tables().unwrap();
        }

        let err = Provisioner::new(&config)
            .provision(request(Some("handmade"), true))
            .unwrap_err();
        assert!(matches!(err, ScanDbError::SchemaConflict(_)));

        // the existing file is left as it was
        let db = DatabaseConn::open_path(&path).unwrap();
        assert!(SchemaManager::new(&db.conn).legacy_tables().unwrap().is_empty());
        assert!(matches!(
            read_version(&db.conn),
            Err(ScanDbError::SchemaMissing)
        ));
    }

    /// Fails after the baseline has been applied
    struct FailingStep;

    impl crate::database::migration::MigrationStep for FailingStep {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn target(&self) -> SchemaVersion {
            SchemaVersion::new(2, 0)
        }

        fn apply(&self, _tx: &rusqlite::Transaction<'_>) -> Result<()> {
            Err(ScanDbError::SchemaConflict("unexpected layout".to_string()))
        }
    }

    #[test]
    fn test_failed_creation_leaves_no_file() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        let migrator = Migrator::with_steps(vec![
            Box::new(crate::database::migration::Baseline),
            Box::new(FailingStep),
        ])
        .unwrap();

        let err = Provisioner::new(&config)
            .with_migrator(migrator)
            .provision(request(Some("xrm"), false))
            .unwrap_err();
        assert!(matches!(err, ScanDbError::MigrationStepFailed { .. }));
        assert!(!Path::new(&config.database_path("xrm")).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // the name is free for a working provisioner
        let report = Provisioner::new(&config)
            .provision(request(Some("xrm"), false))
            .unwrap();
        assert!(report.created);
    }
}
