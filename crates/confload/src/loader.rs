//! Config file discovery, loading, and environment variable overlay.

use crate::infra::{BindConfig, TelemetryConfig, TunablesConfig};
use crate::{ConfigError, InfraConfig, PathsConfig, StationConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded, in load order.
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values.
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// Returns paths in load order (system, user, local/cli). If `cli_path` is
/// provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stationbus/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stationbus/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("stationbus.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<StationConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<StationConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut infra = InfraConfig::default();

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("database_path").and_then(|v| v.as_str()) {
            infra.paths.database_path = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("listen_address").and_then(|v| v.as_str()) {
            infra.bind.listen_address = v.to_string();
        }
        if let Some(v) = bind.get("broker_address").and_then(|v| v.as_str()) {
            infra.bind.broker_address = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.otlp_endpoint = Some(v.to_string());
        }
    }

    if let Some(tunables) = table.get("tunables").and_then(|v| v.as_table()) {
        if let Some(v) = tunables
            .get("health_sweep_interval_secs")
            .and_then(|v| v.as_integer())
        {
            infra.tunables.health_sweep_interval_secs = v as u64;
        }
        if let Some(v) = tunables
            .get("broker_probe_interval_secs")
            .and_then(|v| v.as_integer())
        {
            infra.tunables.broker_probe_interval_secs = v as u64;
        }
        if let Some(v) = tunables
            .get("station_poll_interval_secs")
            .and_then(|v| v.as_integer())
        {
            infra.tunables.station_poll_interval_secs = v as u64;
        }
        if let Some(v) = tunables
            .get("default_command_timeout_ms")
            .and_then(|v| v.as_integer())
        {
            infra.tunables.default_command_timeout_ms = v as u64;
        }
        if let Some(v) = tunables.get("hub_queue_depth").and_then(|v| v.as_integer()) {
            infra.tunables.hub_queue_depth = v as usize;
        }
        if let Some(v) = tunables
            .get("shutdown_drain_secs")
            .and_then(|v| v.as_integer())
        {
            infra.tunables.shutdown_drain_secs = v as u64;
        }
    }

    Ok(StationConfig { infra })
}

/// Merge two configs field-by-field, with `overlay` taking precedence over
/// `base` wherever the overlaid value differs from the compiled default
/// (so an overlay file that doesn't mention a field doesn't clobber an
/// earlier file's setting for it).
pub fn merge_configs(base: StationConfig, overlay: StationConfig) -> StationConfig {
    let defaults = InfraConfig::default();
    StationConfig {
        infra: InfraConfig {
            paths: PathsConfig {
                database_path: pick(
                    overlay.infra.paths.database_path,
                    base.infra.paths.database_path,
                    defaults.paths.database_path,
                ),
            },
            bind: BindConfig {
                listen_address: pick(
                    overlay.infra.bind.listen_address,
                    base.infra.bind.listen_address,
                    defaults.bind.listen_address,
                ),
                broker_address: pick(
                    overlay.infra.bind.broker_address,
                    base.infra.bind.broker_address,
                    defaults.bind.broker_address,
                ),
            },
            telemetry: TelemetryConfig {
                log_level: pick(
                    overlay.infra.telemetry.log_level,
                    base.infra.telemetry.log_level,
                    defaults.telemetry.log_level,
                ),
                otlp_endpoint: overlay.infra.telemetry.otlp_endpoint.or(base.infra.telemetry.otlp_endpoint),
            },
            tunables: TunablesConfig {
                health_sweep_interval_secs: pick(
                    overlay.infra.tunables.health_sweep_interval_secs,
                    base.infra.tunables.health_sweep_interval_secs,
                    defaults.tunables.health_sweep_interval_secs,
                ),
                broker_probe_interval_secs: pick(
                    overlay.infra.tunables.broker_probe_interval_secs,
                    base.infra.tunables.broker_probe_interval_secs,
                    defaults.tunables.broker_probe_interval_secs,
                ),
                station_poll_interval_secs: pick(
                    overlay.infra.tunables.station_poll_interval_secs,
                    base.infra.tunables.station_poll_interval_secs,
                    defaults.tunables.station_poll_interval_secs,
                ),
                default_command_timeout_ms: pick(
                    overlay.infra.tunables.default_command_timeout_ms,
                    base.infra.tunables.default_command_timeout_ms,
                    defaults.tunables.default_command_timeout_ms,
                ),
                hub_queue_depth: pick(
                    overlay.infra.tunables.hub_queue_depth,
                    base.infra.tunables.hub_queue_depth,
                    defaults.tunables.hub_queue_depth,
                ),
                shutdown_drain_secs: pick(
                    overlay.infra.tunables.shutdown_drain_secs,
                    base.infra.tunables.shutdown_drain_secs,
                    defaults.tunables.shutdown_drain_secs,
                ),
            },
        },
    }
}

/// If `overlay` differs from the compiled default, it was set explicitly
/// in that file; otherwise keep whatever `base` already had.
fn pick<T: PartialEq>(overlay: T, base: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut StationConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("STATIONBUS_DATABASE_PATH") {
        config.infra.paths.database_path = expand_path(&v);
        sources.env_overrides.push("STATIONBUS_DATABASE_PATH".to_string());
    }

    if let Ok(v) = env::var("STATIONBUS_LISTEN_ADDRESS") {
        config.infra.bind.listen_address = v;
        sources.env_overrides.push("STATIONBUS_LISTEN_ADDRESS".to_string());
    }

    // The broker address is the one setting the spec calls out as
    // explicitly environment-overridable.
    if let Ok(v) = env::var("STATIONBUS_BROKER_ADDRESS") {
        config.infra.bind.broker_address = v;
        sources.env_overrides.push("STATIONBUS_BROKER_ADDRESS".to_string());
    }

    if let Ok(v) = env::var("STATIONBUS_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("STATIONBUS_LOG_LEVEL".to_string());
    }
    // Also honor the ecosystem-standard variable.
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
}

/// Expand `~` and `$VAR` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }
    if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            return env::var(var_name)
                .map(|v| PathBuf::from(v).join(&stripped[slash_pos + 1..]))
                .unwrap_or_else(|_| PathBuf::from(path));
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn parse_minimal_toml_keeps_other_defaults() {
        let toml = r#"
[bind]
listen_address = "0.0.0.0:9000"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.bind.listen_address, "0.0.0.0:9000");
        assert_eq!(config.infra.bind.broker_address, "redis://127.0.0.1:6379");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[paths]
database_path = "/data/stationbus/db"

[bind]
listen_address = "0.0.0.0:9000"
broker_address = "redis://broker.lan:6379"

[telemetry]
log_level = "debug"

[tunables]
default_command_timeout_ms = 8000
hub_queue_depth = 128
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(
            config.infra.paths.database_path,
            PathBuf::from("/data/stationbus/db")
        );
        assert_eq!(config.infra.bind.broker_address, "redis://broker.lan:6379");
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.infra.tunables.default_command_timeout_ms, 8000);
        assert_eq!(config.infra.tunables.hub_queue_depth, 128);
    }

    #[test]
    fn merge_keeps_base_when_overlay_omits_field() {
        let mut base = StationConfig::default();
        base.infra.bind.broker_address = "redis://custom:6379".to_string();
        let overlay = StationConfig::default();
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.infra.bind.broker_address, "redis://custom:6379");
    }
}
