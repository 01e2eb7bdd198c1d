//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use erouska_core::{
    AdvertiseMode, AdvertiseSettings, RepositoryOptions, ScanMode, TxPowerLevel, WatchdogOptions,
};
use erouska_types::Buid;

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan window settings.
    pub scanning: ScanningConfig,
    /// Advertising settings.
    pub advertising: AdvertisingConfig,
    /// Screen-off watchdog timings.
    pub watchdog: WatchdogConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Identity of this device.
    pub device: DeviceConfig,
    /// Location availability.
    pub location: LocationConfig,
    /// System state polling.
    pub receivers: ReceiversConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all errors found.
    ///
    /// # Example
    ///
    /// ```
    /// use erouska_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.scanning.validate());
        errors.extend(self.advertising.validate());
        errors.extend(self.watchdog.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.device.validate());
        errors.extend(self.receivers.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Options for the Bluetooth repository.
    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions::new()
            .scan_mode(self.scanning.mode)
            .advertise(self.advertising.settings())
            .gatt_timeout(Duration::from_secs(self.scanning.gatt_timeout_seconds))
    }

    /// Options for the screen-off watchdog.
    pub fn watchdog_options(&self) -> WatchdogOptions {
        WatchdogOptions::new()
            .duration(Duration::from_secs(self.watchdog.duration_seconds))
            .interval(Duration::from_secs(self.watchdog.interval_seconds))
            .tolerance(Duration::from_millis(self.watchdog.tolerance_millis))
    }
}

fn push_range(
    errors: &mut Vec<ValidationError>,
    field: &str,
    value: u64,
    min: u64,
    max: u64,
    unit: &str,
) {
    if value < min {
        errors.push(ValidationError {
            field: field.to_string(),
            message: format!("{} is too short (minimum {} {})", value, min, unit),
        });
    } else if value > max {
        errors.push(ValidationError {
            field: field.to_string(),
            message: format!("{} is too long (maximum {} {})", value, max, unit),
        });
    }
}

/// Scan window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Length of a scan window.
    pub collection_seconds: u64,
    /// Idle time between scan windows.
    pub waiting_seconds: u64,
    /// Scan duty cycle.
    pub mode: ScanMode,
    /// Start with the service filter on instead of waiting for the
    /// screen-off watchdog to turn it on.
    pub use_scan_filter: bool,
    /// Timeout of each GATT step when identifying an iOS peer.
    pub gatt_timeout_seconds: u64,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            collection_seconds: 120,
            waiting_seconds: 30,
            mode: ScanMode::default(),
            use_scan_filter: false,
            gatt_timeout_seconds: 10,
        }
    }
}

impl ScanningConfig {
    /// Length of a scan window.
    pub fn collection(&self) -> Duration {
        Duration::from_secs(self.collection_seconds)
    }

    /// Idle time between scan windows.
    pub fn waiting(&self) -> Duration {
        Duration::from_secs(self.waiting_seconds)
    }

    /// Validate scanning configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        push_range(
            &mut errors,
            "scanning.collection_seconds",
            self.collection_seconds,
            5,
            3600,
            "seconds",
        );
        push_range(
            &mut errors,
            "scanning.waiting_seconds",
            self.waiting_seconds,
            0,
            3600,
            "seconds",
        );
        push_range(
            &mut errors,
            "scanning.gatt_timeout_seconds",
            self.gatt_timeout_seconds,
            1,
            60,
            "seconds",
        );
        errors
    }
}

/// Advertising settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    /// Advertising is stopped and started again this often.
    pub restart_minutes: u64,
    /// Transmit power.
    pub tx_power: TxPowerLevel,
    /// Interval class.
    pub mode: AdvertiseMode,
    /// Accept GATT connections from iOS peers.
    pub connectable: bool,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        let settings = AdvertiseSettings::default();
        Self {
            restart_minutes: 15,
            tx_power: settings.tx_power,
            mode: settings.mode,
            connectable: settings.connectable,
        }
    }
}

impl AdvertisingConfig {
    /// How long one advertisement runs before it is restarted.
    pub fn restart(&self) -> Duration {
        Duration::from_secs(self.restart_minutes.saturating_mul(60))
    }

    /// Radio settings for the repository.
    pub fn settings(&self) -> AdvertiseSettings {
        AdvertiseSettings {
            mode: self.mode,
            tx_power: self.tx_power,
            connectable: self.connectable,
        }
    }

    /// Validate advertising configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        push_range(
            &mut errors,
            "advertising.restart_minutes",
            self.restart_minutes,
            1,
            24 * 60,
            "minutes",
        );
        errors
    }
}

/// Screen-off watchdog timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How long to wait for a scan result after the screen turns off.
    pub duration_seconds: u64,
    /// How often to check.
    pub interval_seconds: u64,
    /// Results this soon after switch-off do not count.
    pub tolerance_millis: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let options = WatchdogOptions::default();
        Self {
            duration_seconds: options.duration.as_secs(),
            interval_seconds: options.interval.as_secs(),
            tolerance_millis: options.tolerance.as_millis() as u64,
        }
    }
}

impl WatchdogConfig {
    /// Validate watchdog configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_seconds == 0 {
            errors.push(ValidationError {
                field: "watchdog.interval_seconds".to_string(),
                message: "interval cannot be 0".to_string(),
            });
        }
        push_range(
            &mut errors,
            "watchdog.duration_seconds",
            self.duration_seconds,
            1,
            3600,
            "seconds",
        );
        if self.duration_seconds < self.interval_seconds {
            errors.push(ValidationError {
                field: "watchdog.duration_seconds".to_string(),
                message: format!(
                    "duration {} is shorter than the interval {}",
                    self.duration_seconds, self.interval_seconds
                ),
            });
        }
        if self.tolerance_millis >= self.duration_seconds.saturating_mul(1000) {
            errors.push(ValidationError {
                field: "watchdog.tolerance_millis".to_string(),
                message: format!(
                    "tolerance {} ms must be shorter than the duration",
                    self.tolerance_millis
                ),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Scan results older than this are deleted.
    pub persist_data_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: erouska_store::default_db_path(),
            persist_data_days: 14,
        }
    }
}

impl StorageConfig {
    /// Retention period of scan results.
    pub fn retention(&self) -> time::Duration {
        time::Duration::days(i64::from(self.persist_data_days))
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }
        if self.persist_data_days == 0 {
            errors.push(ValidationError {
                field: "storage.persist_data_days".to_string(),
                message: "retention must be at least 1 day".to_string(),
            });
        }

        errors
    }
}

/// Identity of this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// BUID to advertise. A random one is generated at start when unset.
    pub buid: Option<Buid>,
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(buid) = &self.buid
            && buid.is_zero()
        {
            errors.push(ValidationError {
                field: "device.buid".to_string(),
                message: "the all-zero BUID is reserved (omit it to generate one)".to_string(),
            });
        }

        errors
    }
}

/// Location availability.
///
/// Desktop hosts have no location service; scanning is gated on it only
/// when configured so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Whether location services count as enabled.
    pub enabled: bool,
    /// Whether battery saver turns location off.
    pub battery_saver_disables_location: bool,
    /// File holding the platform power profile.
    pub power_profile_path: PathBuf,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            battery_saver_disables_location: false,
            power_profile_path: PathBuf::from(crate::receivers::PLATFORM_PROFILE_PATH),
        }
    }
}

/// System state polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiversConfig {
    /// How often Bluetooth, location and power state are polled.
    pub poll_seconds: u64,
    /// Read screen state and commands from standard input.
    pub stdin_control: bool,
}

impl Default for ReceiversConfig {
    fn default() -> Self {
        Self {
            poll_seconds: 5,
            stdin_control: true,
        }
    }
}

impl ReceiversConfig {
    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }

    /// Validate receiver configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        push_range(
            &mut errors,
            "receivers.poll_seconds",
            self.poll_seconds,
            1,
            300,
            "seconds",
        );
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `scanning.collection_seconds`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("erouska")
        .join("service.toml")
}
