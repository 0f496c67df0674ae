//! Configuration loading.
//!
//! A single YAML file maps profile names to MySQL connection settings and
//! carries the tool-wide defaults (storage root, compression codec,
//! retention policy, tool binary paths). Everything is injected into the
//! pipelines as explicit values; nothing reads process-wide state after
//! construction.

use crate::compress::Compression;
use crate::error::{Error, Result};
use crate::retention::RetentionPolicy;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Multiplier from the base connection timeout to the dump/load subprocess
/// timeout: a 30 s connection timeout yields the default 30 minute bound.
const SUBPROCESS_TIMEOUT_FACTOR: u64 = 60;

/// Environment variable overriding the storage root.
pub const STORAGE_ROOT_ENV: &str = "CADANGKAN_BACKUP_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Default codec for new backups.
    #[serde(default = "default_codec")]
    pub compression: Compression,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub tools: ToolConfig,

    /// Named connection profiles.
    #[serde(default)]
    pub databases: BTreeMap<String, ConnectionConfig>,
}

fn default_codec() -> Compression {
    Compression::Gzip
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Backup root directory; defaults to `~/.cadangkan/backups`.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Paths of the external dump/load utilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_mysqldump")]
    pub mysqldump: PathBuf,
    #[serde(default = "default_mysql")]
    pub mysql: PathBuf,
}

fn default_mysqldump() -> PathBuf {
    PathBuf::from("mysqldump")
}

fn default_mysql() -> PathBuf {
    PathBuf::from("mysql")
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            mysqldump: default_mysqldump(),
            mysql: default_mysql(),
        }
    }
}

/// One named connection profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Logical database name; defaults to the profile name.
    #[serde(default)]
    pub database: Option<String>,
    /// Base connection timeout in seconds. The dump/load subprocess bound
    /// is this value scaled by 60.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional cron expression for scheduled backups of this profile.
    #[serde(default)]
    pub schedule: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: None,
            timeout_secs: default_timeout_secs(),
            schedule: None,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bound on a full dump or load subprocess run.
    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs * SUBPROCESS_TIMEOUT_FACTOR)
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {e}", path.display())))
    }

    /// Default config file location: `~/.cadangkan/config.yaml`.
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".cadangkan").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from(".cadangkan/config.yaml"))
    }

    /// Resolve the storage layer from config, honoring the environment
    /// override and falling back to the home-relative default.
    pub fn storage(&self) -> Storage {
        let root = std::env::var_os(STORAGE_ROOT_ENV)
            .map(PathBuf::from)
            .or_else(|| self.storage.root.clone())
            .unwrap_or_else(Storage::default_root);
        Storage::new(root)
    }

    /// Look up a connection profile, with its logical database name
    /// resolved.
    pub fn profile(&self, name: &str) -> Result<(ConnectionConfig, String)> {
        let conn = self
            .databases
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("No database profile named '{name}'")))?;
        let database = conn.database.clone().unwrap_or_else(|| name.to_string());
        Ok((conn, database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
databases:
  shop:
    host: db.internal
    password: secret
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let (conn, database) = config.profile("shop").unwrap();
        assert_eq!(conn.host, "db.internal");
        assert_eq!(conn.port, 3306);
        assert_eq!(conn.user, "root");
        assert_eq!(database, "shop");
        assert_eq!(config.compression, Compression::Gzip);
    }

    #[test]
    fn test_profile_database_override() {
        let yaml = r#"
databases:
  prod:
    database: shop_production
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let (_, database) = config.profile("prod").unwrap();
        assert_eq!(database, "shop_production");
    }

    #[test]
    fn test_unknown_profile_errors() {
        let config = Config::default();
        assert!(matches!(config.profile("ghost"), Err(Error::Config(_))));
    }

    #[test]
    fn test_subprocess_timeout_scales_from_connect_timeout() {
        let conn = ConnectionConfig::default();
        assert_eq!(conn.connect_timeout(), Duration::from_secs(30));
        assert_eq!(conn.subprocess_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_full_config_round_trip() {
        let yaml = r#"
storage:
  root: /var/backups/cadangkan
compression: none
retention:
  daily: 3
  weekly: 2
  monthly: 1
tools:
  mysqldump: /opt/mysql/bin/mysqldump
databases:
  shop:
    host: localhost
    schedule: "0 2 * * *"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.retention.daily, 3);
        assert_eq!(
            config.tools.mysqldump,
            PathBuf::from("/opt/mysql/bin/mysqldump")
        );
        assert_eq!(
            config.databases["shop"].schedule.as_deref(),
            Some("0 2 * * *")
        );
        assert_eq!(
            config.storage.root.as_deref(),
            Some(Path::new("/var/backups/cadangkan"))
        );
    }
}
