//! Foreground proximity service for eRouska.
//!
//! This crate provides a service that:
//! - Advertises this device's BUID, restarting the advertisement periodically
//! - Scans for eRouska peers in fixed windows and stores one record per peer
//! - Turns itself off while Bluetooth or location is unavailable
//! - Restarts scanning with a service filter when background scans stall
//!   after the screen turns off
//! - Deletes records past the retention period
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/erouska/service.toml`:
//!
//! ```toml
//! [scanning]
//! collection_seconds = 120
//! waiting_seconds = 30
//! mode = "balanced"
//!
//! [advertising]
//! restart_minutes = 15
//! tx_power = "medium"
//!
//! [storage]
//! path = "~/.local/share/erouska/data.db"
//! persist_data_days = 14
//!
//! [device]
//! buid = "0123456789abcdef0123"
//! ```
//!
//! # Control
//!
//! The binary reads `screen-off`, `screen-on`, `update` and `stop` from
//! standard input, one per line.

pub mod config;
pub mod receivers;
pub mod service;
pub mod sink;
pub mod state;

pub use config::{
    AdvertisingConfig, Config, ConfigError, DeviceConfig, LocationConfig, ReceiversConfig,
    ScanningConfig, StorageConfig, ValidationError, WatchdogConfig,
};
pub use service::{CovidService, ScreenState, ServiceCommand, ServiceOptions};
pub use sink::StoreSink;
pub use state::{FixedMonitor, HostMonitor, ServiceStatus, SystemMonitor, SystemState};
