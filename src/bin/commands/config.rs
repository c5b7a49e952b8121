use anyhow::Result;
use clap::Args;
use scandb::ScanDbConfig;
use serde::Serialize;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    data_dir: String,
    busy_timeout_ms: u64,
    scandata_prefix: String,
    databases: Vec<String>,
}

pub fn run(config: &ScanDbConfig, args: ConfigArgs) -> Result<()> {
    let databases = config.database_names()?;

    if args.json {
        let info = ConfigInfo {
            data_dir: config.data_dir.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
            scandata_prefix: config.scandata_prefix.clone(),
            databases,
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{}", config.summary());
    if databases.is_empty() {
        println!("Databases:          none");
    } else {
        println!("Databases:          {}", databases.join(", "));
    }
    Ok(())
}
