pub mod config;
pub mod create;
pub mod instruments;
pub mod migrate;
pub mod status;

use anyhow::{anyhow, Result};
use scandb::ScanDbConfig;
use std::path::Path;

/// Path of an existing scan database; commands other than `create` never create files
pub(crate) fn existing_database(config: &ScanDbConfig, name: &str) -> Result<String> {
    let path = config.database_path(name.trim());
    if !Path::new(&path).exists() {
        return Err(anyhow!(
            "scan database '{}' does not exist at {}, create it first",
            name,
            path
        ));
    }
    Ok(path)
}
