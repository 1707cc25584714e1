//! Layered configuration loading for the controller.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/stationbus/config.toml` (system)
//! 2. `~/.config/stationbus/config.toml` (user)
//! 3. `./stationbus.toml` (local override)
//! 4. Environment variables (`STATIONBUS_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! database_path = "/var/lib/stationbus/db"
//!
//! [bind]
//! listen_address = "0.0.0.0:8080"
//! broker_address = "redis://broker.lan:6379"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [tunables]
//! default_command_timeout_ms = 5000
//! ```

pub mod infra;
pub mod loader;

pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig, TunablesConfig};
pub use loader::ConfigSources;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete controller configuration.
#[derive(Debug, Clone, Default)]
pub struct StationConfig {
    pub infra: InfraConfig,
}

impl StationConfig {
    /// Load configuration from all sources: defaults, then config files
    /// (system, user, local), then environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env
    /// overrides. If `config_path` is provided, it takes precedence over
    /// the local `./stationbus.toml` override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return provenance information alongside it.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = StationConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}
