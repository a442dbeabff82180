//! Gateway configuration management.
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults (the values the watch protocol was tuned with)
//! 2. An optional TOML file (`/etc/vitalgate/config.toml` on Linux)
//! 3. Environment variables prefixed `VITALGATE__`, using `__` between
//!    section and key, e.g. `VITALGATE__CONNECTION__MAX_ATTEMPTS=5`
//!
//! Every interval the engine sleeps on lives here rather than in the code.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::FileFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::transport::{DEFAULT_NOTIFY_CHARACTERISTIC, DEFAULT_WRITE_CHARACTERISTIC};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "VITALGATE_CONFIG";

const ENV_PREFIX: &str = "VITALGATE";

static MAC_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

/// Returns `true` for colon-separated MAC addresses (`AA:BB:CC:DD:EE:FF`).
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Configuration file not found at: {}", .0.display())]
    NotFound(PathBuf),

    /// The file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field holds an unusable value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{}", join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Scanning and GATT settings.
    pub bluetooth: BluetoothConfig,
    /// Connection retry policy.
    pub connection: ConnectionConfig,
    /// Handshake retry policy.
    pub handshake: HandshakeConfig,
    /// Telemetry polling schedule.
    pub polling: PollingConfig,
    /// Health alert thresholds.
    pub alerts: AlertsConfig,
    /// Backend ingestion endpoints.
    pub backend: BackendConfig,
    /// Gateway identity.
    pub gateway: GatewaySection,
    /// Local status server.
    pub server: ServerConfig,
}

/// Scanning and GATT settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// BlueZ adapter name (`hci0`); the default adapter when unset.
    pub adapter: Option<String>,
    /// Only devices whose advertised name starts with this are connected.
    pub name_prefix: String,
    /// Characteristic commands are written to.
    pub write_characteristic: Uuid,
    /// Characteristic the watch notifies on.
    pub notify_characteristic: Uuid,
    /// How long each discovery scan listens.
    pub scan_window_secs: u64,
    /// Pause between scans.
    pub scan_interval_secs: u64,
    /// Upper bound on a single connect call.
    pub connect_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            name_prefix: "GT".to_string(),
            write_characteristic: DEFAULT_WRITE_CHARACTERISTIC,
            notify_characteristic: DEFAULT_NOTIFY_CHARACTERISTIC,
            scan_window_secs: 20,
            scan_interval_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl BluetoothConfig {
    /// Scan observation window.
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }

    /// Pause between scans.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Connection retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connection attempts before giving up and alerting.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay_secs: u64,
    /// Send the bind request before the configuration handshakes.
    pub bind_on_connect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            bind_on_connect: false,
        }
    }
}

impl ConnectionConfig {
    /// Pause between failed attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Handshake retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Command writes before a handshake is abandoned.
    pub max_attempts: u32,
    /// Wait for the acknowledgement after each write.
    pub attempt_wait_secs: u64,
    /// How long the bind request listens for a verdict.
    pub bind_window_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            attempt_wait_secs: 5,
            bind_window_secs: 10,
        }
    }
}

impl HandshakeConfig {
    /// Wait after each command write.
    #[must_use]
    pub const fn attempt_wait(&self) -> Duration {
        Duration::from_secs(self.attempt_wait_secs)
    }

    /// Bind observation window.
    #[must_use]
    pub const fn bind_window(&self) -> Duration {
        Duration::from_secs(self.bind_window_secs)
    }
}

/// Telemetry polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Gap between the vitals request and the battery request.
    pub battery_delay_secs: u64,
    /// Gap between the battery request and the next vitals request.
    pub cycle_interval_secs: u64,
    /// Identical samples in a row before the watch counts as not worn.
    pub unworn_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            battery_delay_secs: 1,
            cycle_interval_secs: 30,
            unworn_threshold: crate::classifier::DEFAULT_UNWORN_THRESHOLD,
        }
    }
}

impl PollingConfig {
    /// Gap between the vitals and battery requests.
    #[must_use]
    pub const fn battery_delay(&self) -> Duration {
        Duration::from_secs(self.battery_delay_secs)
    }

    /// Gap before the next cycle.
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Health alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Lowest heart rate considered normal (inclusive).
    pub heart_rate_low: u32,
    /// Highest heart rate considered normal (inclusive).
    pub heart_rate_high: u32,
    /// Battery levels below this raise an alert.
    pub battery_low: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            heart_rate_low: 84,
            heart_rate_high: 100,
            battery_low: 20,
        }
    }
}

/// Backend ingestion endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Vitals ingestion URL.
    pub vitals_url: String,
    /// Alerts ingestion URL.
    pub alerts_url: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// `device_id` reported with every vitals sample.
    pub device_id: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            vitals_url: "http://51.20.63.166:8000/api/v1/fbd-device/vitals".to_string(),
            alerts_url: "http://51.20.63.166:8000/api/v1/fbd-device/alerts".to_string(),
            request_timeout_secs: 15,
            device_id: 12345,
        }
    }
}

impl BackendConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Gateway identity settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Use this MAC instead of reading the host's interfaces.
    pub mac_address: Option<String>,
}

/// Local status server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_address: SocketAddr,
    /// JSON file logs plus compact stdout instead of pretty stdout.
    pub production_logging: bool,
    /// `tracing` filter directives; `RUST_LOG` takes precedence when set.
    pub log_level: String,
    /// Where production logs are written. Defaults per platform.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5000)),
            production_logging: false,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Configured log directory, or `/var/log/vitalgate` on Linux and the
    /// platform data directory elsewhere.
    #[must_use]
    pub fn log_directory(&self) -> PathBuf {
        if let Some(dir) = &self.log_dir {
            return dir.clone();
        }
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/var/log/vitalgate")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "vitalgate")
                .map_or_else(|| PathBuf::from("logs"), |dirs| dirs.data_dir().join("logs"))
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing default file is fine; a missing explicit file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => Self::default_path(),
        };

        let config: Self = config::Config::builder()
            .add_source(
                config::File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `$VITALGATE_CONFIG` or the default location.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::load`].
    pub fn from_env() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    /// Default configuration file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        // On the gateway: /etc/vitalgate/config.toml
        // For development: ~/.config/vitalgate/config.toml
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/vitalgate/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "vitalgate").map_or_else(
                || PathBuf::from("vitalgate.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Check every section, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &'static str, message: String| {
            errors.push(ConfigError::ValidationError { field, message });
        };

        for (field, value) in [
            ("backend.vitals_url", &self.backend.vitals_url),
            ("backend.alerts_url", &self.backend.alerts_url),
        ] {
            match Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => invalid(field, format!("unsupported scheme '{}'", url.scheme())),
                Err(e) => invalid(field, e.to_string()),
            }
        }

        if let Some(mac) = &self.gateway.mac_address {
            if !is_valid_mac_address(mac) {
                invalid(
                    "gateway.mac_address",
                    format!("'{mac}' is not in XX:XX:XX:XX:XX:XX format"),
                );
            }
        }

        if self.connection.max_attempts == 0 {
            invalid("connection.max_attempts", "must be at least 1".to_string());
        }
        if self.handshake.max_attempts == 0 {
            invalid("handshake.max_attempts", "must be at least 1".to_string());
        }
        if self.polling.cycle_interval_secs == 0 {
            invalid("polling.cycle_interval_secs", "must be at least 1".to_string());
        }
        if self.server.log_level.trim().is_empty() {
            invalid("server.log_level", "must not be empty".to_string());
        }
        if self.alerts.heart_rate_low > self.alerts.heart_rate_high {
            invalid(
                "alerts.heart_rate_low",
                format!(
                    "{} is above heart_rate_high {}",
                    self.alerts.heart_rate_low, self.alerts.heart_rate_high
                ),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bluetooth.name_prefix, "GT");
        assert_eq!(config.connection.max_attempts, 3);
        assert_eq!(config.connection.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.handshake.max_attempts, 10);
        assert_eq!(config.handshake.attempt_wait(), Duration::from_secs(5));
        assert_eq!(config.handshake.bind_window(), Duration::from_secs(10));
        assert_eq!(config.polling.battery_delay(), Duration::from_secs(1));
        assert_eq!(config.polling.cycle_interval(), Duration::from_secs(30));
        assert_eq!(config.bluetooth.scan_window(), Duration::from_secs(20));
        assert_eq!(config.server.bind_address.port(), 5000);
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("b8:27:eb:12:34:56"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("unknown"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
[bluetooth]
name_prefix = "GTS"
scan_window_secs = 5

[connection]
max_attempts = 4
bind_on_connect = true

[gateway]
mac_address = "b8:27:eb:00:11:22"
"#,
        )
        .unwrap();

        let config = GatewayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bluetooth.name_prefix, "GTS");
        assert_eq!(config.bluetooth.scan_window_secs, 5);
        assert_eq!(config.connection.max_attempts, 4);
        assert!(config.connection.bind_on_connect);
        assert_eq!(config.gateway.mac_address.as_deref(), Some("b8:27:eb:00:11:22"));
        // untouched sections keep their defaults
        assert_eq!(config.handshake.max_attempts, 10);
        assert_eq!(config.alerts.battery_low, 20);
    }

    #[test]
    fn test_server_logging_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "[server]\nproduction_logging = true\nlog_level = \"vitalgate_core=debug\"\nlog_dir = \"/tmp/vg-logs\"\n",
        )
        .unwrap();

        let server = GatewayConfig::load(Some(&path)).unwrap().server;
        assert!(server.production_logging);
        assert_eq!(server.log_level, "vitalgate_core=debug");
        assert_eq!(server.log_directory(), PathBuf::from("/tmp/vg-logs"));

        let defaults = ServerConfig::default();
        assert_eq!(defaults.log_level, "info");
        assert!(!defaults.log_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[polling]\nbattery_delay_secs = 2\n").unwrap();

        std::env::set_var("VITALGATE__POLLING__BATTERY_DELAY_SECS", "3");
        let config = GatewayConfig::load(Some(&path));
        std::env::remove_var("VITALGATE__POLLING__BATTERY_DELAY_SECS");

        assert_eq!(config.unwrap().polling.battery_delay_secs, 3);
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = GatewayConfig::load(Some(Path::new("/nonexistent/vitalgate.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = GatewayConfig::default();
        config.connection.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "connection.max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn test_multiple_validation_errors_are_collected() {
        let mut config = GatewayConfig::default();
        config.backend.vitals_url = "not a url".to_string();
        config.backend.alerts_url = "ftp://example.com/alerts".to_string();
        config.gateway.mac_address = Some("nope".to_string());
        config.alerts.heart_rate_low = 120;

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
    }
}
