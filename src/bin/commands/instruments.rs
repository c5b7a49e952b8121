use anyhow::Result;
use clap::Args;
use scandb::{ScanDatabase, ScanDbConfig};
use tabled::settings::Style;
use tabled::Table;

use super::existing_database;

/// Arguments for the Instruments command
#[derive(Args)]
pub struct InstrumentsArgs {
    /// Name of the scan database
    #[clap()]
    pub name: String,

    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

pub fn run(config: &ScanDbConfig, args: InstrumentsArgs) -> Result<()> {
    let InstrumentsArgs { name, json } = args;

    let path = existing_database(config, &name)?;
    let db = ScanDatabase::open_with_timeout(&path, config.busy_timeout())?;
    let summaries = db.instruments().summaries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("no instruments defined in '{}'", name);
    } else {
        println!("{}", Table::new(&summaries).with(Style::rounded()));
    }
    Ok(())
}
