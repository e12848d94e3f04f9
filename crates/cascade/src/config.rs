//! Engine configuration.
//!
//! The configuration is a small YAML document:
//!
//! ```yaml
//! lock-timeout-ms: 5000
//! max-concurrent-subgraphs: 4
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Default wait for object write locks, in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default number of independent subgraphs deleted in parallel
pub const DEFAULT_MAX_CONCURRENT_SUBGRAPHS: usize = 4;

/// Configuration of a [`DeleteEngine`](crate::engine::DeleteEngine)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Bounded wait for the write locks of one batch
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Upper bound on subgraphs executing at the same time
    #[serde(default = "default_max_concurrent_subgraphs")]
    pub max_concurrent_subgraphs: usize,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_max_concurrent_subgraphs() -> usize {
    DEFAULT_MAX_CONCURRENT_SUBGRAPHS
}

impl EngineConfig {
    /// Lock wait as a [`Duration`]
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a value is zero.
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config(
                "lock-timeout-ms must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_subgraphs == 0 {
            return Err(Error::Config(
                "max-concurrent-subgraphs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the YAML is malformed or fails validation.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config`
    /// if its content is invalid.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on serialization failure and `Error::Io` if
    /// the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            max_concurrent_subgraphs: DEFAULT_MAX_CONCURRENT_SUBGRAPHS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = EngineConfig::from_yaml("lock-timeout-ms: 250\n").unwrap();
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(
            config.max_concurrent_subgraphs,
            DEFAULT_MAX_CONCURRENT_SUBGRAPHS
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        let result = EngineConfig::from_yaml("max-concurrent-subgraphs: 0\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = EngineConfig::from_yaml("lock-timeout-ms: 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        let result = EngineConfig::from_yaml("lock-timeout-ms: [oops");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cascade.yaml");
        let config = EngineConfig {
            lock_timeout_ms: 100,
            max_concurrent_subgraphs: 2,
        };

        config.save(&path).await.unwrap();
        let loaded = EngineConfig::load(&path).await.unwrap();

        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = EngineConfig::load(&dir.path().join("absent.yaml")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
