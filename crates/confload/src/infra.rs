//! Settings sections for the controller. All of these are fixed at
//! startup; nothing here is mutated once the process is running.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for controller state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Sled database directory for the durable store.
    /// Default: ~/.local/share/stationbus/db
    #[serde(default = "PathsConfig::default_database_path")]
    pub database_path: PathBuf,
}

impl PathsConfig {
    fn default_database_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/stationbus/db"))
            .unwrap_or_else(|| PathBuf::from(".local/share/stationbus/db"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
        }
    }
}

/// Network bind/connect addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP/WebSocket listen address.
    /// Default: 0.0.0.0:8080
    #[serde(default = "BindConfig::default_listen_address")]
    pub listen_address: String,

    /// Broker (Redis) connection address.
    /// Default: redis://127.0.0.1:6379
    #[serde(default = "BindConfig::default_broker_address")]
    pub broker_address: String,
}

impl BindConfig {
    fn default_listen_address() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_broker_address() -> String {
        "redis://127.0.0.1:6379".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            listen_address: Self::default_listen_address(),
            broker_address: Self::default_broker_address(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `tracing-subscriber` EnvFilter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// Optional OTLP gRPC endpoint. When unset, only the fmt layer runs.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

/// Operational tunables that aren't fixed by the protocol itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunablesConfig {
    /// Health sweep interval, seconds.
    #[serde(default = "TunablesConfig::default_health_sweep_interval_secs")]
    pub health_sweep_interval_secs: u64,

    /// Broker liveness probe interval, seconds.
    #[serde(default = "TunablesConfig::default_broker_probe_interval_secs")]
    pub broker_probe_interval_secs: u64,

    /// Station poller interval, seconds.
    #[serde(default = "TunablesConfig::default_station_poll_interval_secs")]
    pub station_poll_interval_secs: u64,

    /// Default command timeout when a request omits `timeout_ms`.
    #[serde(default = "TunablesConfig::default_command_timeout_ms")]
    pub default_command_timeout_ms: u64,

    /// Per-client WebSocket send queue depth.
    #[serde(default = "TunablesConfig::default_hub_queue_depth")]
    pub hub_queue_depth: usize,

    /// HTTP graceful-shutdown drain budget, seconds.
    #[serde(default = "TunablesConfig::default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
}

impl TunablesConfig {
    fn default_health_sweep_interval_secs() -> u64 {
        2
    }

    fn default_broker_probe_interval_secs() -> u64 {
        5
    }

    fn default_station_poll_interval_secs() -> u64 {
        10
    }

    fn default_command_timeout_ms() -> u64 {
        5000
    }

    fn default_hub_queue_depth() -> usize {
        64
    }

    fn default_shutdown_drain_secs() -> u64 {
        5
    }
}

impl Default for TunablesConfig {
    fn default() -> Self {
        Self {
            health_sweep_interval_secs: Self::default_health_sweep_interval_secs(),
            broker_probe_interval_secs: Self::default_broker_probe_interval_secs(),
            station_poll_interval_secs: Self::default_station_poll_interval_secs(),
            default_command_timeout_ms: Self::default_command_timeout_ms(),
            hub_queue_depth: Self::default_hub_queue_depth(),
            shutdown_drain_secs: Self::default_shutdown_drain_secs(),
        }
    }
}

/// All settings combined; this is the root of `StationConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub tunables: TunablesConfig,
}
