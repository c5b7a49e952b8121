use anyhow::Result;
use clap::Args;
use scandb::{Credentials, ProvisionRequest, Provisioner, ScanDbConfig};

/// Arguments for the Create command
#[derive(Args)]
pub struct CreateArgs {
    /// Name of the new scan database
    #[clap()]
    pub name: Option<String>,

    /// Bring an existing database up to date instead of failing
    #[clap(short, long)]
    pub force: bool,

    /// Output the provisioning report as JSON
    #[clap(long)]
    pub json: bool,
}

pub fn run(config: &ScanDbConfig, credentials: Option<&str>, args: CreateArgs) -> Result<()> {
    let CreateArgs { name, force, json } = args;

    let credentials = Credentials::resolve(credentials)?;
    let report = Provisioner::new(config).provision(ProvisionRequest {
        defaults: credentials.connection_defaults(),
        name,
        force,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let action = match report.created {
            true => "created",
            false => "updated",
        };
        println!(
            "{} scan database '{}' at version {} ({}), user '{}'",
            action, report.name, report.version, report.path, report.user
        );
    }
    Ok(())
}
