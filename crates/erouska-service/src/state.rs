//! System state the service reacts to, and the status it publishes.
//!
//! Bluetooth power comes from the radio. Location and power-save state come
//! from a [`SystemMonitor`]: [`HostMonitor`] reads the platform power profile
//! and takes location availability from configuration, [`FixedMonitor`]
//! holds values set by hand.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LocationConfig;
use crate::receivers::read_power_save;

/// Source of location and power-save state.
#[async_trait]
pub trait SystemMonitor: Send + Sync {
    /// Whether location services are enabled.
    async fn location_enabled(&self) -> bool;

    /// Whether battery saver is on.
    async fn power_save_mode(&self) -> bool;

    /// Whether battery saver turns location off.
    fn battery_saver_disables_location(&self) -> bool;
}

/// Monitor for desktop hosts.
#[derive(Debug, Clone)]
pub struct HostMonitor {
    location_enabled: bool,
    battery_saver_disables_location: bool,
    power_profile_path: PathBuf,
}

impl HostMonitor {
    /// Create a monitor from the `[location]` configuration.
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            location_enabled: config.enabled,
            battery_saver_disables_location: config.battery_saver_disables_location,
            power_profile_path: config.power_profile_path.clone(),
        }
    }
}

#[async_trait]
impl SystemMonitor for HostMonitor {
    async fn location_enabled(&self) -> bool {
        self.location_enabled
    }

    async fn power_save_mode(&self) -> bool {
        match read_power_save(&self.power_profile_path).await {
            Ok(power_save) => power_save,
            Err(e) => {
                debug!(
                    "No power profile at {}: {}",
                    self.power_profile_path.display(),
                    e
                );
                false
            }
        }
    }

    fn battery_saver_disables_location(&self) -> bool {
        self.battery_saver_disables_location
    }
}

/// Monitor with values set by hand.
#[derive(Debug)]
pub struct FixedMonitor {
    location_enabled: AtomicBool,
    power_save: AtomicBool,
    battery_saver_disables_location: AtomicBool,
}

impl Default for FixedMonitor {
    fn default() -> Self {
        Self {
            location_enabled: AtomicBool::new(true),
            power_save: AtomicBool::new(false),
            battery_saver_disables_location: AtomicBool::new(false),
        }
    }
}

impl FixedMonitor {
    /// Location on, battery saver off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set location availability.
    pub fn set_location_enabled(&self, enabled: bool) {
        self.location_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Set battery saver.
    pub fn set_power_save(&self, enabled: bool) {
        self.power_save.store(enabled, Ordering::SeqCst);
    }

    /// Set whether battery saver turns location off.
    pub fn set_battery_saver_disables_location(&self, disables: bool) {
        self.battery_saver_disables_location
            .store(disables, Ordering::SeqCst);
    }
}

#[async_trait]
impl SystemMonitor for FixedMonitor {
    async fn location_enabled(&self) -> bool {
        self.location_enabled.load(Ordering::SeqCst)
    }

    async fn power_save_mode(&self) -> bool {
        self.power_save.load(Ordering::SeqCst)
    }

    fn battery_saver_disables_location(&self) -> bool {
        self.battery_saver_disables_location.load(Ordering::SeqCst)
    }
}

/// One reading of the state the service depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    /// Bluetooth adapter powered on.
    pub bluetooth_enabled: bool,
    /// Location services on.
    pub location_enabled: bool,
    /// Battery saver on.
    pub power_save: bool,
    /// Battery saver is on and turns location off.
    pub battery_saver_restricts_location: bool,
}

impl SystemState {
    /// Read the current state.
    pub async fn read(bluetooth_enabled: bool, monitor: &dyn SystemMonitor) -> Self {
        let power_save = monitor.power_save_mode().await;
        Self {
            bluetooth_enabled,
            location_enabled: monitor.location_enabled().await,
            power_save,
            battery_saver_restricts_location: power_save
                && monitor.battery_saver_disables_location(),
        }
    }

    /// Whether location is usable for scanning.
    pub fn location_available(&self) -> bool {
        self.location_enabled && !self.battery_saver_restricts_location
    }

    /// Whether both advertising and scanning can run.
    pub fn can_run(&self) -> bool {
        self.bluetooth_enabled && self.location_available()
    }
}

/// Snapshot of the service published to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Bluetooth adapter powered on.
    pub bluetooth_enabled: bool,
    /// Location services on.
    pub location_enabled: bool,
    /// Battery saver turns location off.
    pub battery_saver_restricts_location: bool,
    /// Advertise and scan loops running.
    pub mask_on: bool,
    /// A scan window is open.
    pub scanning: bool,
    /// The radio is broadcasting.
    pub advertising: bool,
    /// Scans use the service filter.
    pub use_scan_filter: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_from_fixed_monitor() {
        let monitor = FixedMonitor::new();
        let state = SystemState::read(true, &monitor).await;
        assert!(state.can_run());
        assert!(!state.power_save);

        let state = SystemState::read(false, &monitor).await;
        assert!(!state.can_run());
    }

    #[tokio::test]
    async fn test_battery_saver_restricts_location_only_when_configured() {
        let monitor = FixedMonitor::new();
        monitor.set_power_save(true);

        let state = SystemState::read(true, &monitor).await;
        assert!(state.power_save);
        assert!(!state.battery_saver_restricts_location);
        assert!(state.can_run());

        monitor.set_battery_saver_disables_location(true);
        let state = SystemState::read(true, &monitor).await;
        assert!(state.battery_saver_restricts_location);
        assert!(!state.location_available());
        assert!(!state.can_run());
    }

    #[tokio::test]
    async fn test_location_disabled() {
        let monitor = FixedMonitor::new();
        monitor.set_location_enabled(false);
        let state = SystemState::read(true, &monitor).await;
        assert!(!state.location_available());
    }

    #[tokio::test]
    async fn test_host_monitor_reads_power_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform_profile");
        std::fs::write(&path, "low-power\n").unwrap();

        let monitor = HostMonitor::new(&LocationConfig {
            enabled: true,
            battery_saver_disables_location: true,
            power_profile_path: path.clone(),
        });
        assert!(monitor.power_save_mode().await);
        assert!(!SystemState::read(true, &monitor).await.can_run());

        std::fs::write(&path, "balanced\n").unwrap();
        assert!(!monitor.power_save_mode().await);
    }

    #[tokio::test]
    async fn test_host_monitor_without_power_profile() {
        let monitor = HostMonitor::new(&LocationConfig {
            power_profile_path: PathBuf::from("/nonexistent/platform_profile"),
            ..Default::default()
        });
        assert!(!monitor.power_save_mode().await);
        assert!(monitor.location_enabled().await);
    }
}
