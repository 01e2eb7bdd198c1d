//! Core BLE library for eRouska proximity detection.
//!
//! This crate discovers nearby eRouska peers over Bluetooth Low Energy,
//! aggregates their signal strength per scan window, and broadcasts this
//! device's own identifier.
//!
//! # Features
//!
//! - **Advertisement parsing**: Extract a peer's BUID from raw advertisement bytes
//! - **RSSI aggregation**: One session per peer per window, reduced to max/median/mean
//! - **GATT fallback**: Read the BUID of iOS peers that cannot advertise it
//! - **Advertising**: Broadcast the eRouska service with this device's BUID
//! - **Screen-off watchdog**: Detect and work around throttled background scans
//! - **Mock radio**: Scripted radio for tests without hardware
//!
//! # Peers
//!
//! | Platform | How the BUID is obtained |
//! |----------|--------------------------|
//! | Android | Service data of the eRouska service in the advertisement |
//! | iOS | GATT read of the BUID characteristic (detected by Apple manufacturer data) |
//!
//! # Platform Differences
//!
//! - **Scanning and GATT** use btleplug everywhere.
//! - **Advertising** uses BlueZ on Linux. Other platforms scan only.
//! - **macOS** reports peers by a CoreBluetooth UUID instead of a MAC address.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use erouska_core::mock::MemorySink;
//! use erouska_core::{BluetoothRepository, PlatformRadio, RepositoryOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(PlatformRadio::new().await?);
//!     let sink = Arc::new(MemorySink::new());
//!     let repo = BluetoothRepository::new(radio, sink, RepositoryOptions::default());
//!
//!     repo.start_advertising(erouska_core::util::random_buid()).await?;
//!     repo.start_scanning(true).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     let summary = repo.stop_scanning().await;
//!     println!("{} peers seen", summary.persisted);
//!     Ok(())
//! }
//! ```

pub mod advertisement;
pub mod error;
pub mod gatt;
pub mod mock;
pub mod radio;
pub mod repository;
pub mod scan;
pub mod session;
pub mod settings;
pub mod traits;
pub mod util;
pub mod watchdog;

// Re-export types and uuid modules from erouska-types
pub use erouska_types::types;
pub use erouska_types::uuid as uuids;

// Core exports
pub use advertisement::{encode_service_data, extract_buid};
pub use error::{Error, Result};
pub use radio::PlatformRadio;
pub use repository::{BluetoothRepository, RepositoryOptions, WindowSummary};
pub use scan::{Sighting, SightingStream};
pub use session::{RssiStats, ScanSession, SessionTable};
pub use settings::{
    AdvertiseMode, AdvertiseParams, AdvertiseSettings, ScanMode, ScanSettings, TxPowerLevel,
};
pub use traits::{BleRadio, GattService, RecordSink};
pub use watchdog::{ScreenOffWatchdog, WatchdogOptions, WatchdogOutcome};

// Re-export from erouska-types
pub use erouska_types::{Buid, ScanRecord};
