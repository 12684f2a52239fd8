//! Engine configuration.
//!
//! YAML on disk, explicit validation, and a SHA-256 hash that binds
//! checkpoints to the configuration that produced them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};
use crate::job::{SyncDirection, TableSyncConfig};
use crate::sync::{DEFAULT_BATCH_SIZE, MAX_CONCURRENT_JOBS, MAX_TABLES_PER_JOB};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database.
    pub source: DbConfig,

    /// Target database.
    pub target: DbConfig,

    /// Sync behavior.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Tables to sync. Empty means every syncable table discovered at
    /// validation time.
    #[serde(default)]
    pub tables: Vec<TableSyncConfig>,

    /// Sync direction.
    #[serde(default = "default_direction")]
    pub direction: SyncDirection,

    /// Whether the target is a production environment.
    #[serde(default)]
    pub production_target: bool,
}

fn default_direction() -> SyncDirection {
    SyncDirection::OneWay
}

/// One database endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Connection string (URL or key/value form), already decrypted.
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    4
}

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent jobs per process.
    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: usize,

    /// Enabled tables per job.
    #[serde(default = "default_max_tables")]
    pub max_tables_per_job: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_jobs() -> usize {
    MAX_CONCURRENT_JOBS
}

fn default_max_tables() -> usize {
    MAX_TABLES_PER_JOB
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_jobs: default_max_jobs(),
            max_tables_per_job: default_max_tables(),
        }
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.source.url.is_empty() {
            return Err(SyncError::Config("source.url is required".into()));
        }
        if self.target.url.is_empty() {
            return Err(SyncError::Config("target.url is required".into()));
        }
        if self.source.url == self.target.url {
            return Err(SyncError::Config(
                "source and target cannot be the same database".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be at least 1".into()));
        }
        if self.sync.max_concurrent_jobs == 0 {
            return Err(SyncError::Config(
                "sync.max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.tables.len() > self.sync.max_tables_per_job {
            return Err(SyncError::Config(format!(
                "{} tables configured, the per-job limit is {}",
                self.tables.len(),
                self.sync.max_tables_per_job
            )));
        }
        Ok(())
    }

    /// SHA-256 hash of the configuration.
    pub fn hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  url: postgres://app@source-host/app
target:
  url: postgres://app@target-host/app
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.sync.max_concurrent_jobs, 3);
        assert_eq!(config.sync.max_tables_per_job, 50);
        assert_eq!(config.direction, SyncDirection::OneWay);
        assert!(!config.production_target);
        assert!(config.tables.is_empty());
        assert_eq!(config.source.max_connections, 4);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
source:
  url: postgres://app@source-host/app
  max_connections: 8
target:
  url: postgres://app@target-host/app
direction: two_way
production_target: true
sync:
  batch_size: 500
tables:
  - table: users
    strategy: source_wins
  - table: orders
    enabled: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.direction, SyncDirection::TwoWay);
        assert!(config.production_target);
        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.tables.len(), 2);
        assert!(config.tables[0].enabled);
        assert!(!config.tables[1].enabled);
    }

    #[test]
    fn test_same_database_rejected() {
        let yaml = r#"
source:
  url: postgres://app@host/app
target:
  url: postgres://app@host/app
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let yaml = r#"
source:
  url: postgres://app@source-host/app
target:
  url: postgres://app@target-host/app
sync:
  batch_size: 0
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let b = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());

        let mut c = Config::from_yaml(MINIMAL).unwrap();
        c.sync.batch_size = 42;
        assert_ne!(a.hash().unwrap(), c.hash().unwrap());
    }
}
