//! Configuration types for the chubby storage layer
//!
//! The storage components take their tuning explicitly; nothing here is
//! process-global. A node loads one [`Config`] from TOML and hands the
//! relevant sections to each component it constructs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name of the operation log below the data directory
pub const LOG_DIR_NAME: &str = "#binlog";

/// Directory name of the consensus metadata below the data directory
pub const META_DIR_NAME: &str = "meta";

/// Directory name of the namespaced data stores below the data directory
pub const DATA_DIR_NAME: &str = "data";

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        let log = &self.storage.log;
        if log.block_size == 0 || log.write_buffer_size == 0 {
            return Err(Error::Configuration(
                "storage.log block_size and write_buffer_size must be non-zero".into(),
            ));
        }
        let data = &self.storage.data;
        if data.block_size_kb == 0 || data.write_buffer_size_mb == 0 {
            return Err(Error::Configuration(
                "storage.data block_size_kb and write_buffer_size_mb must be non-zero".into(),
            ));
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("storage.data_dir is empty".into()));
        }
        Ok(())
    }
}

/// Storage layout and engine tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the log, the metadata and the data stores
    pub data_dir: PathBuf,
    /// Operation log engine tuning
    pub log: LogStoreConfig,
    /// Namespaced data store engine tuning
    pub data: DataStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chubby-data"),
            log: LogStoreConfig::default(),
            data: DataStoreConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Parent directory of the operation log (the log itself lives in
    /// `{log_path}/#binlog`)
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Directory of the term/vote/root files
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(META_DIR_NAME)
    }

    /// Root of the per-namespace stores
    pub fn data_path(&self) -> PathBuf {
        self.data_dir.join(DATA_DIR_NAME)
    }
}

/// Operation log engine tuning (sizes in bytes)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    /// Compress stored blocks
    pub compress: bool,
    /// Engine block size
    pub block_size: usize,
    /// Engine write buffer size
    pub write_buffer_size: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            compress: false,
            block_size: 32748,
            write_buffer_size: 32 * 1024 * 1024, // 32 MB
        }
    }
}

/// Namespaced data store engine tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    /// Compress stored blocks
    pub compress: bool,
    /// Engine block size in KB
    pub block_size_kb: usize,
    /// Engine write buffer size in MB
    pub write_buffer_size_mb: usize,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            compress: true,
            block_size_kb: 4,
            write_buffer_size_mb: 4,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.log.block_size, 32748);
        assert_eq!(config.storage.log.write_buffer_size, 33_554_432);
        assert!(!config.storage.log.compress);
        assert!(config.storage.data.compress);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [storage]
            data_dir = "/var/lib/chubby"

            [storage.data]
            write_buffer_size_mb = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/chubby"));
        assert_eq!(config.storage.data.write_buffer_size_mb, 16);
        assert_eq!(config.storage.data.block_size_kb, 4);
        assert_eq!(
            config.storage.meta_path(),
            PathBuf::from("/var/lib/chubby/meta")
        );
    }

    #[test]
    fn test_invalid_config() {
        let err = Config::from_toml_str("[storage.log]\nblock_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = Config::from_toml_str("[storage\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chubby.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, Error::Configuration(_)));
    }
}
