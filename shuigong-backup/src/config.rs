//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; omitted values fall back to
//! defaults rooted in the data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding `shuigong_backup_*.zip` archives
    pub directory: PathBuf,

    /// Archives kept by the retention policy
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    #[serde(default = "default_auto_backup_enabled")]
    pub auto_backup_enabled: bool,

    #[serde(default = "default_auto_backup_interval_days")]
    pub auto_backup_interval_days: u32,

    /// Version recorded in archive metadata
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub database: PathBuf,
    pub config: PathBuf,
    pub images: PathBuf,
    pub videos: PathBuf,

    /// JSON file holding the last successful backup time
    pub last_backup_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_max_backups() -> usize {
    crate::retention::DEFAULT_MAX_BACKUPS
}

fn default_auto_backup_enabled() -> bool {
    true
}

fn default_auto_backup_interval_days() -> u32 {
    1
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.backup.max_backups >= 1,
            "backup.max_backups must be at least 1 (got {})",
            self.backup.max_backups
        );
        Ok(())
    }

    /// Default layout under `data_dir`
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Config {
            backup: BackupConfig {
                directory: data_dir.join("backups"),
                max_backups: default_max_backups(),
                auto_backup_enabled: default_auto_backup_enabled(),
                auto_backup_interval_days: default_auto_backup_interval_days(),
                app_version: default_app_version(),
            },
            sources: SourcesConfig {
                database: data_dir.join("databases").join("shuigong.db"),
                config: data_dir.join("config.json"),
                images: data_dir.join("images"),
                videos: data_dir.join("videos"),
                last_backup_file: data_dir.join("last_backup.json"),
            },
            log: LogConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(Path::new("/var/lib/shuigong"))
    }
}
