//! Radio settings for scanning and advertising.
//!
//! The numeric codes follow the Android BLE API so that settings exported
//! from a phone configuration can be used unchanged.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Scan duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Only receive results of scans started by others.
    Opportunistic,
    /// Lowest power, longest latency.
    LowPower,
    /// Trade-off between power and latency.
    #[default]
    Balanced,
    /// Scan continuously.
    LowLatency,
}

impl ScanMode {
    /// Android `ScanSettings` code.
    pub fn code(&self) -> i8 {
        match self {
            ScanMode::Opportunistic => -1,
            ScanMode::LowPower => 0,
            ScanMode::Balanced => 1,
            ScanMode::LowLatency => 2,
        }
    }

    /// Try to create from an Android `ScanSettings` code.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(ScanMode::Opportunistic),
            0 => Some(ScanMode::LowPower),
            1 => Some(ScanMode::Balanced),
            2 => Some(ScanMode::LowLatency),
            _ => None,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanMode::Opportunistic => "opportunistic",
            ScanMode::LowPower => "low power",
            ScanMode::Balanced => "balanced",
            ScanMode::LowLatency => "low latency",
        };
        f.write_str(name)
    }
}

/// Advertising interval class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    /// Advertise about once a second.
    LowPower,
    /// Advertise about four times a second.
    #[default]
    Balanced,
    /// Advertise about ten times a second.
    LowLatency,
}

impl AdvertiseMode {
    /// Android `AdvertiseSettings` code.
    pub fn code(&self) -> u8 {
        match self {
            AdvertiseMode::LowPower => 0,
            AdvertiseMode::Balanced => 1,
            AdvertiseMode::LowLatency => 2,
        }
    }

    /// Try to create from an Android `AdvertiseSettings` code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AdvertiseMode::LowPower),
            1 => Some(AdvertiseMode::Balanced),
            2 => Some(AdvertiseMode::LowLatency),
            _ => None,
        }
    }

    /// Nominal advertising interval.
    pub fn interval(&self) -> Duration {
        match self {
            AdvertiseMode::LowPower => Duration::from_millis(1000),
            AdvertiseMode::Balanced => Duration::from_millis(250),
            AdvertiseMode::LowLatency => Duration::from_millis(100),
        }
    }
}

/// Advertising transmit power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPowerLevel {
    /// Ultra low power (about -21 dBm).
    UltraLow,
    /// Low power (about -15 dBm).
    Low,
    /// Medium power (about -7 dBm).
    #[default]
    Medium,
    /// High power (about +1 dBm).
    High,
}

impl TxPowerLevel {
    /// Android `AdvertiseSettings` code.
    pub fn code(&self) -> u8 {
        match self {
            TxPowerLevel::UltraLow => 0,
            TxPowerLevel::Low => 1,
            TxPowerLevel::Medium => 2,
            TxPowerLevel::High => 3,
        }
    }

    /// Try to create from an Android `AdvertiseSettings` code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TxPowerLevel::UltraLow),
            1 => Some(TxPowerLevel::Low),
            2 => Some(TxPowerLevel::Medium),
            3 => Some(TxPowerLevel::High),
            _ => None,
        }
    }

    /// Approximate transmit power in dBm.
    pub fn dbm(&self) -> i16 {
        match self {
            TxPowerLevel::UltraLow => -21,
            TxPowerLevel::Low => -15,
            TxPowerLevel::Medium => -7,
            TxPowerLevel::High => 1,
        }
    }
}

/// Settings for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanSettings {
    /// Duty cycle.
    pub mode: ScanMode,
    /// Only report peers advertising this service.
    pub service_filter: Option<Uuid>,
}

impl ScanSettings {
    /// Create new settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan mode.
    pub fn mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Filter to peers advertising the given service.
    pub fn filter_service(mut self, uuid: Uuid) -> Self {
        self.service_filter = Some(uuid);
        self
    }
}

/// Settings for advertising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertiseSettings {
    /// Interval class.
    pub mode: AdvertiseMode,
    /// Transmit power.
    pub tx_power: TxPowerLevel,
    /// Accept GATT connections from peers.
    pub connectable: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::default(),
            tx_power: TxPowerLevel::default(),
            connectable: true,
        }
    }
}

/// What to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseParams {
    /// Service UUID listed in the advertisement.
    pub service_uuid: Uuid,
    /// Service data attached to the service UUID (in the scan response).
    pub service_data: Vec<u8>,
    /// Radio settings.
    pub settings: AdvertiseSettings,
}

impl AdvertiseParams {
    /// Create advertising parameters, rejecting empty service data.
    pub fn new(service_uuid: Uuid, service_data: Vec<u8>, settings: AdvertiseSettings) -> Result<Self> {
        if service_data.is_empty() {
            return Err(Error::InvalidData("Empty service data".to_string()));
        }
        Ok(Self {
            service_uuid,
            service_data,
            settings,
        })
    }
}
