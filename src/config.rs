use anyhow::{anyhow, Result};
use config::{Config, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the path of the credentials file
pub const CREDENTIALS_ENV: &str = "ESCAN_CREDENTIALS";

pub struct ScanDbConfig {
    /// Directory holding one SQLite file per scan database
    pub data_dir: String,

    /// How long a writer waits on a locked database, in milliseconds (default: 5000)
    pub busy_timeout_ms: u64,

    /// Value seeded into `info.epics_scandata_prefix` when a store reaches 2.0
    pub scandata_prefix: String,
}

const EMPTY_CONFIG: &str = r#"### scandb configuration file

### directory holding the scan databases
# data_dir = "~/.escan"

### milliseconds a writer waits on a locked database
# busy_timeout_ms = 5000

### EPICS prefix for scan data records, seeded into new databases
# scandata_prefix = ""
"#;

fn home_dir() -> Result<String> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home directory"))?
        .to_str()
        .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
        .to_owned())
}

impl Default for ScanDbConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.escan", home_dir),
            busy_timeout_ms: 5000,
            scandata_prefix: String::new(),
        }
    }
}

impl ScanDbConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<ScanDbConfig> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        let escan_dir = format!("{}/.escan", home_dir()?);

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(escan_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create escan directory: {}", e))?;
                let p = format!("{}/scandb.toml", escan_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of ESCAN)
        // E.g., `ESCAN_DATA_DIR=/data/escan scandb status xrm` would set the data directory
        builder = builder.add_source(config::Environment::with_prefix("ESCAN"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config, &escan_dir)
    }

    fn from_map(config: &HashMap<String, String>, default_dir: &str) -> Result<ScanDbConfig> {
        let data_dir = match config.get("data_dir") {
            Some(p) => match p.strip_prefix("~/") {
                Some(rest) => format!("{}/{}", home_dir()?, rest),
                None => p.to_string(),
            },
            None => default_dir.to_string(),
        };
        std::fs::create_dir_all(data_dir.as_str())
            .map_err(|e| anyhow!("Unable to create data directory {}: {}", data_dir, e))?;

        let busy_timeout_ms = match config.get("busy_timeout_ms") {
            Some(s) => s
                .parse()
                .map_err(|_| anyhow!("busy_timeout_ms must be an integer, got '{}'", s))?,
            None => 5000,
        };

        let scandata_prefix = config
            .get("scandata_prefix")
            .cloned()
            .unwrap_or_default();

        Ok(ScanDbConfig {
            data_dir,
            busy_timeout_ms,
            scandata_prefix,
        })
    }

    /// Configuration rooted at an explicit data directory, with default settings
    pub fn with_data_dir(data_dir: &str) -> ScanDbConfig {
        ScanDbConfig {
            data_dir: data_dir.to_string(),
            ..Default::default()
        }
    }

    /// Path of the SQLite file backing the scan database `name`
    pub fn database_path(&self, name: &str) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}.sqlite3", data_dir, name)
    }

    /// Names of the scan databases found in the data directory, sorted
    pub fn database_names(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|e| anyhow!("Unable to read data directory {}: {}", self.data_dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sqlite3") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!("Scandata Prefix:    {}", self.scandata_prefix),
        ]
        .join("\n")
    }
}

/// Connection bundle read from a credentials file
///
/// `dbname` names the database a client connects to. Provisioning never
/// reads it; see [`ConnectionDefaults`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub server: String,
    pub dbname: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: std::env::var("USER").unwrap_or_default(),
            password: String::new(),
            server: "sqlite".to_string(),
            dbname: None,
        }
    }
}

impl Credentials {
    /// Read a YAML credentials file
    pub fn from_file(path: &str) -> Result<Credentials> {
        if !Path::new(path).exists() {
            return Err(anyhow!("Credentials file {} does not exist", path));
        }
        Config::builder()
            .add_source(config::File::new(path, FileFormat::Yaml))
            .build()
            .map_err(|e| anyhow!("Failed to read credentials {}: {}", path, e))?
            .try_deserialize::<Credentials>()
            .map_err(|e| anyhow!("Failed to parse credentials {}: {}", path, e))
    }

    /// Use the given file, then `ESCAN_CREDENTIALS`, then the defaults
    pub fn resolve(path: Option<&str>) -> Result<Credentials> {
        match path {
            Some(p) => Self::from_file(p),
            None => match std::env::var(CREDENTIALS_ENV) {
                Ok(p) if !p.trim().is_empty() => Self::from_file(p.trim()),
                _ => Ok(Credentials::default()),
            },
        }
    }

    pub fn connection_defaults(&self) -> ConnectionDefaults {
        ConnectionDefaults {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// Where and as whom to connect, without any database name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDefaults {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Credentials::default().connection_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_path() {
        let config = ScanDbConfig::with_data_dir("/data/escan/");
        assert_eq!(config.database_path("xrm"), "/data/escan/xrm.sqlite3");
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_summary_and_database_names() {
        let dir = tempdir().unwrap();
        let config = ScanDbConfig::with_data_dir(dir.path().to_str().unwrap());
        assert!(config.database_names().unwrap().is_empty());

        std::fs::write(config.database_path("xrm_2026"), b"").unwrap();
        std::fs::write(config.database_path("old_scans"), b"").unwrap();
        std::fs::write(dir.path().join("old_scans.sqlite3-wal"), b"").unwrap();
        std::fs::write(dir.path().join("scandb.toml"), b"").unwrap();
        assert_eq!(
            config.database_names().unwrap(),
            vec!["old_scans".to_string(), "xrm_2026".to_string()]
        );

        let summary = config.summary();
        assert!(summary.contains(dir.path().to_str().unwrap()));
        assert!(summary.contains("5000 ms"));
    }

    #[test]
    fn test_from_map() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("dbs");
        let map = HashMap::from([
            (
                "data_dir".to_string(),
                data_dir.to_str().unwrap().to_string(),
            ),
            ("busy_timeout_ms".to_string(), "250".to_string()),
            ("scandata_prefix".to_string(), "13XRM:SCANDB:".to_string()),
        ]);
        let config = ScanDbConfig::from_map(&map, "/nonexistent").unwrap();
        assert!(data_dir.exists());
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.scandata_prefix, "13XRM:SCANDB:");

        let bad = HashMap::from([
            (
                "data_dir".to_string(),
                data_dir.to_str().unwrap().to_string(),
            ),
            ("busy_timeout_ms".to_string(), "soon".to_string()),
        ]);
        assert!(ScanDbConfig::from_map(&bad, "/nonexistent").is_err());
    }

    #[test]
    fn test_credentials_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("escan_credentials.yaml");
        std::fs::write(
            &path,
            "host: ioc.example.org\nuser: epics\npassword: s3cret\ndbname: old_scans\n",
        )
        .unwrap();

        let creds = Credentials::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(creds.host, "ioc.example.org");
        assert_eq!(creds.port, 5432);
        assert_eq!(creds.server, "sqlite");
        assert_eq!(creds.dbname.as_deref(), Some("old_scans"));

        let defaults = creds.connection_defaults();
        assert_eq!(defaults.user, "epics");
        let json = serde_json::to_string(&defaults).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("old_scans"));
    }

    #[test]
    fn test_missing_credentials_file() {
        assert!(Credentials::from_file("/nonexistent/credentials.yaml").is_err());
        assert!(Credentials::resolve(Some("/nonexistent/credentials.yaml")).is_err());
    }
}
