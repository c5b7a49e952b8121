use anyhow::Result;
use clap::Args;
use scandb::{DatabaseConn, Migrator, ScanDbConfig, SchemaVersion};

use super::existing_database;

/// Arguments for the Migrate command
#[derive(Args)]
pub struct MigrateArgs {
    /// Name of the scan database
    #[clap()]
    pub name: String,

    /// Version to migrate to, e.g. 2.0; defaults to the newest version
    #[clap(long)]
    pub to: Option<SchemaVersion>,
}

pub fn run(config: &ScanDbConfig, args: MigrateArgs) -> Result<()> {
    let MigrateArgs { name, to } = args;

    let path = existing_database(config, &name)?;
    let db = DatabaseConn::open_with_timeout(Some(&path), config.busy_timeout())?;
    let migrator = Migrator::new(&config.scandata_prefix);
    let report = match to {
        Some(target) => migrator.migrate(&db, target)?,
        None => migrator.migrate_to_latest(&db)?,
    };

    if report.is_noop() {
        println!("'{}' is already at version {}", name, report.to);
    } else {
        let steps: Vec<String> = report.applied.iter().map(|v| v.to_string()).collect();
        println!(
            "migrated '{}' from {} to {} (applied {})",
            name,
            report.from,
            report.to,
            steps.join(", ")
        );
    }
    Ok(())
}
