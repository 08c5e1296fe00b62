//! Application configuration.
//!
//! Loaded once by the parent process and re-loaded by each spawned
//! controller process from the same file, so every controller sees an
//! identical view of the topology and sibling set.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::broker::BrokerConfig;
use crate::controller::REALNET_NAME;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "digsinet.yml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DIGSINET_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DIGSINET";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DIGSINET_LOG";
/// Environment variable carrying the role of a spawned controller process.
pub const ROLE_ENV_VAR: &str = "DIGSINET_ROLE";
/// Environment variable carrying the sibling name of a spawned controller.
pub const SIBLING_ENV_VAR: &str = "DIGSINET_SIBLING";

/// Default build-response wait per sibling, in seconds.
pub const DEFAULT_SIBLING_TIMEOUT_SECS: f64 = 10.0;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Real network topology.
    pub topology: TopologyConfig,
    /// Seconds the realnet controller waits for each sibling build response.
    pub sibling_timeout: f64,
    /// Sibling topologies to run, in build order.
    pub siblings: Vec<SiblingConfig>,
    /// Event broker backend. Controllers cannot run without one.
    pub broker: Option<BrokerConfig>,
    /// Directory where generated sibling topology files are written.
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::default(),
            sibling_timeout: DEFAULT_SIBLING_TIMEOUT_SECS,
            siblings: Vec::new(),
            broker: None,
            work_dir: PathBuf::from("."),
        }
    }
}

/// Real network topology configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Path to the containerlab topology definition.
    pub file: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("topology.clab.yml"),
        }
    }
}

/// One sibling topology.
#[derive(Debug, Clone, Deserialize)]
pub struct SiblingConfig {
    /// Sibling name; doubles as its broker channel.
    pub name: String,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `digsinet.yml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `DIGSINET_CONFIG` environment variable (if set)
    /// 4. Environment variables with `DIGSINET` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        // Add config file from path argument if provided
        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        // Add config file from DIGSINET_CONFIG env var if set
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Build-response wait as a [`Duration`].
    pub fn sibling_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.sibling_timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_SIBLING_TIMEOUT_SECS))
    }

    /// Sibling names in configured (build) order.
    pub fn sibling_names(&self) -> Vec<String> {
        self.siblings.iter().map(|s| s.name.clone()).collect()
    }

    /// Where the generated topology file for a sibling is written.
    pub fn sibling_topology_path(&self, sibling: &str) -> PathBuf {
        self.work_dir.join(format!("{sibling}.clab.yml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.sibling_timeout.is_finite() || self.sibling_timeout <= 0.0 {
            return Err(ConfigError::InvalidTimeout(self.sibling_timeout));
        }
        let mut seen = Vec::with_capacity(self.siblings.len());
        for sibling in &self.siblings {
            if sibling.name.is_empty() {
                return Err(ConfigError::InvalidSibling(
                    "sibling name must not be empty".to_string(),
                ));
            }
            if sibling.name == REALNET_NAME {
                return Err(ConfigError::InvalidSibling(format!(
                    "'{REALNET_NAME}' is reserved for the real network controller"
                )));
            }
            if seen.contains(&&sibling.name) {
                return Err(ConfigError::InvalidSibling(format!(
                    "duplicate sibling name '{}'",
                    sibling.name
                )));
            }
            seen.push(&sibling.name);
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] ::config::ConfigError),

    #[error("Invalid sibling_timeout {0}: must be a positive number of seconds")]
    InvalidTimeout(f64),

    #[error("Invalid sibling definition: {0}")]
    InvalidSibling(String),
}
