//! Server configuration (ezb.toml)
//!
//! Every section and key is optional; missing values take the defaults
//! below.
//!
//! ```toml
//! [server]
//! name = "ezb"
//! statistics = true
//!
//! [container]
//! pool_size = 16
//! pool_acquire_timeout_ms = 5000
//! stateful_timeout_secs = 600
//! no_interface_view = true
//! ejb21_view = true
//!
//! [statistics]
//! default_enabled = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enhancer::EnhancerOptions;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to write TOML
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, first segment of statistic provider ids
    pub name: String,

    /// Register containers and beans as statistic providers
    pub statistics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "ezb".to_string(),
            statistics: true,
        }
    }
}

/// `[container]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Maximum instances per pooled factory
    pub pool_size: usize,

    /// How long a call waits for a pooled instance
    pub pool_acquire_timeout_ms: u64,

    /// Idle time after which a stateful instance is evicted (0 = never)
    pub stateful_timeout_secs: u64,

    /// Generate no-interface views
    pub no_interface_view: bool,

    /// Generate the EJB 2.1 surface
    pub ejb21_view: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            pool_acquire_timeout_ms: 5_000,
            stateful_timeout_secs: 600,
            no_interface_view: true,
            ejb21_view: true,
        }
    }
}

impl ContainerConfig {
    /// Pool acquire timeout
    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_timeout_ms)
    }

    /// Stateful idle timeout, if eviction is enabled
    pub fn stateful_timeout(&self) -> Option<Duration> {
        (self.stateful_timeout_secs > 0).then(|| Duration::from_secs(self.stateful_timeout_secs))
    }

    /// Enhancer switches derived from this section
    pub fn enhancer_options(&self) -> EnhancerOptions {
        EnhancerOptions {
            no_interface_view: self.no_interface_view,
            ejb21_view: self.ejb21_view,
        }
    }
}

/// `[statistics]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Effective state of the statistic factory root
    pub default_enabled: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            default_enabled: true,
        }
    }
}

/// Complete configuration of an embedded server
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Server settings
    pub server: ServerConfig,

    /// Defaults for every container
    pub container: ContainerConfig,

    /// Statistics settings
    pub statistics: StatisticsConfig,
}

impl EmbeddedConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write as TOML
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.server.name;
        if name.is_empty() {
            return Err(ConfigError::ValidationError(
                "server.name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('.') {
            return Err(ConfigError::ValidationError(format!(
                "server.name '{}' cannot contain '/' or '.'",
                name
            )));
        }
        if self.container.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "container.pool_size must be at least 1".to_string(),
            ));
        }
        if self.container.pool_acquire_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "container.pool_acquire_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EmbeddedConfig::from_toml_str("").unwrap();
        assert_eq!(config, EmbeddedConfig::default());
        assert_eq!(config.container.pool_size, 16);
        assert!(config.statistics.default_enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config = EmbeddedConfig::from_toml_str(
            r#"
            [server]
            name = "node1"

            [container]
            pool_size = 2
            stateful_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.server.name, "node1");
        assert!(config.server.statistics);
        assert_eq!(config.container.pool_size, 2);
        assert_eq!(config.container.stateful_timeout(), None);
        assert_eq!(config.container.pool_acquire_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            EmbeddedConfig::from_toml_str("[container]\npool_size = 0"),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            EmbeddedConfig::from_toml_str("[server]\nname = \"a/b\""),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(matches!(
            EmbeddedConfig::from_toml_str("[server\nname"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ezb.toml");
        let mut config = EmbeddedConfig::default();
        config.container.pool_size = 3;
        config.save(&path).unwrap();
        assert_eq!(EmbeddedConfig::load(&path).unwrap(), config);
    }
}
