use anyhow::Result;
use clap::Args;
use scandb::database::core::read_version;
use scandb::{DatabaseConn, ScanDbConfig, SchemaManager, SchemaVersion};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::existing_database;

/// Arguments for the Status command
#[derive(Args)]
pub struct StatusArgs {
    /// Name of the scan database
    #[clap()]
    pub name: String,

    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct DatabaseStatus {
    name: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<SchemaVersion>,
    status: String,
    legacy_tables: Vec<&'static str>,
    tables: Vec<TableCount>,
}

#[derive(Debug, Serialize, Tabled)]
struct TableCount {
    table: String,
    rows: u64,
}

pub fn run(config: &ScanDbConfig, args: StatusArgs) -> Result<()> {
    let StatusArgs { name, json } = args;

    let path = existing_database(config, &name)?;
    let db = DatabaseConn::open_with_timeout(Some(&path), config.busy_timeout())?;
    let manager = SchemaManager::new(&db.conn);

    let status = DatabaseStatus {
        name,
        path,
        version: read_version(&db.conn).ok(),
        status: manager.check_status()?.to_string(),
        legacy_tables: manager.legacy_tables()?,
        tables: manager
            .table_counts()?
            .into_iter()
            .map(|(table, rows)| TableCount { table, rows })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let version = status
        .version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!("Database:   {} ({})", status.name, status.path);
    println!("Version:    {}", version);
    println!("Status:     {}", status.status);
    if !status.legacy_tables.is_empty() {
        println!("Legacy:     {}", status.legacy_tables.join(", "));
    }
    if !status.tables.is_empty() {
        println!("{}", Table::new(&status.tables).with(Style::rounded()));
    }
    Ok(())
}
