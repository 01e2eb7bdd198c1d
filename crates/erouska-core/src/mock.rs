//! Mock radio implementation for testing.
//!
//! This module provides a scripted radio that can be used for unit testing
//! without requiring actual BLE hardware.
//!
//! The [`MockRadio`] implements the [`BleRadio`] trait, allowing it to be
//! used interchangeably with [`PlatformRadio`](crate::radio::PlatformRadio).
//!
//! # Features
//!
//! - **Scripted sightings**: Push sightings into the running scan
//! - **Scripted GATT peers**: Decide per address what a GATT read returns
//! - **Failure injection**: Fail scans, advertising or GATT steps
//! - **Call recording**: Inspect scan settings, connects and disconnects

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use uuid::Uuid;

use erouska_types::uuids::{APPLE_COMPANY_ID, BUID_CHARACTERISTIC, SERVICE_UUID};
use erouska_types::{Buid, ScanRecord};

use crate::error::{Error, Result};
use crate::scan::{Sighting, SightingStream};
use crate::settings::{AdvertiseParams, ScanSettings};
use crate::traits::{BleRadio, GattService, RecordSink};

/// Generic Access service, present on every GATT server.
const GENERIC_ACCESS: Uuid = Uuid::from_u128(0x0000_1800_0000_1000_8000_0080_5f9b_34fb);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the sighting of an Android peer advertising `buid`.
pub fn android_sighting(address: &str, buid: Buid, rssi: i16) -> Sighting {
    Sighting::from_advertisement(
        address,
        rssi,
        vec![SERVICE_UUID],
        &HashMap::from([(SERVICE_UUID, buid.as_bytes().to_vec())]),
        HashMap::new(),
    )
}

/// Build the sighting of an iOS peer, which advertises no BUID.
pub fn ios_sighting(address: &str, rssi: i16) -> Sighting {
    Sighting::from_advertisement(
        address,
        rssi,
        vec![SERVICE_UUID],
        &HashMap::new(),
        HashMap::from([(APPLE_COMPANY_ID, vec![0x10, 0x05, 0x01])]),
    )
}

/// How a scripted peer answers the GATT fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattScript {
    /// The characteristic holds this value.
    Value(Vec<u8>),
    /// The eRouska service exists but lacks the BUID characteristic.
    MissingCharacteristic,
    /// Connecting fails.
    ConnectFails,
    /// Service discovery fails.
    DiscoveryFails,
    /// Reading the characteristic fails.
    ReadFails,
}

/// A scripted radio for testing.
///
/// # Example
///
/// ```
/// use erouska_core::mock::{MockRadio, android_sighting};
/// use erouska_core::{BleRadio, ScanSettings};
/// use erouska_types::Buid;
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() {
///     let radio = MockRadio::new();
///     let mut stream = radio.start_scan(&ScanSettings::new()).await.unwrap();
///     radio.emit(android_sighting("AA:BB:CC:DD:EE:FF", Buid::new([1; 10]), -60));
///
///     let sighting = stream.next().await.unwrap().unwrap();
///     assert_eq!(sighting.rssi, -60);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockRadio {
    disabled: AtomicBool,
    no_advertising: AtomicBool,
    fail_scan: AtomicBool,
    power_off_on_scan: AtomicBool,
    fail_advertise: AtomicBool,
    gatt_latency_ms: AtomicU64,
    scan_tx: Mutex<Option<mpsc::UnboundedSender<Result<Sighting>>>>,
    scans: Mutex<Vec<ScanSettings>>,
    scan_stops: AtomicU32,
    advertising: Mutex<Option<AdvertiseParams>>,
    advertise_starts: AtomicU32,
    peers: Mutex<HashMap<String, GattScript>>,
    connected: Mutex<HashSet<String>>,
    connects: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<String>>,
}

impl MockRadio {
    /// Create a powered-on radio that supports advertising.
    pub fn new() -> Self {
        Self::default()
    }

    /// Power the radio on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::SeqCst);
    }

    /// Set whether advertising is supported.
    pub fn set_supports_advertising(&self, supported: bool) {
        self.no_advertising.store(!supported, Ordering::SeqCst);
    }

    /// Make `start_scan` fail.
    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Power the radio off as the next scan starts, as when the adapter
    /// goes away between a power check and the start.
    pub fn set_power_off_on_scan(&self, power_off: bool) {
        self.power_off_on_scan.store(power_off, Ordering::SeqCst);
    }

    /// Make `start_advertising` fail.
    pub fn set_fail_advertise(&self, fail: bool) {
        self.fail_advertise.store(fail, Ordering::SeqCst);
    }

    /// Delay every GATT step by `latency`.
    pub fn set_gatt_latency(&self, latency: Duration) {
        self.gatt_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Script the GATT behavior of a peer.
    pub fn script_peer(&self, address: &str, script: GattScript) {
        lock(&self.peers).insert(address.to_string(), script);
    }

    /// Deliver a sighting to the running scan. Returns `false` if no scan runs.
    pub fn emit(&self, sighting: Sighting) -> bool {
        match lock(&self.scan_tx).as_ref() {
            Some(tx) => tx.unbounded_send(Ok(sighting)).is_ok(),
            None => false,
        }
    }

    /// Deliver a scan failure and end the scan.
    pub fn fail_stream(&self, message: &str) -> bool {
        let Some(tx) = lock(&self.scan_tx).take() else {
            return false;
        };
        tx.unbounded_send(Err(Error::ScanAborted(message.to_string())))
            .is_ok()
    }

    /// Whether a scan stream is open.
    pub fn is_scanning(&self) -> bool {
        lock(&self.scan_tx).is_some()
    }

    /// Settings of every scan started so far.
    pub fn scans(&self) -> Vec<ScanSettings> {
        lock(&self.scans).clone()
    }

    /// Number of `stop_scan` calls.
    pub fn scan_stop_count(&self) -> u32 {
        self.scan_stops.load(Ordering::SeqCst)
    }

    /// Current advertisement, if broadcasting.
    pub fn advertising(&self) -> Option<AdvertiseParams> {
        lock(&self.advertising).clone()
    }

    /// Number of successful `start_advertising` calls.
    pub fn advertise_start_count(&self) -> u32 {
        self.advertise_starts.load(Ordering::SeqCst)
    }

    /// Addresses passed to `connect`, in call order.
    pub fn connects(&self) -> Vec<String> {
        lock(&self.connects).clone()
    }

    /// Addresses passed to `disconnect`, in call order.
    pub fn disconnects(&self) -> Vec<String> {
        lock(&self.disconnects).clone()
    }

    /// Number of connections not yet closed.
    pub fn open_connections(&self) -> usize {
        lock(&self.connected).len()
    }

    fn script(&self, address: &str) -> Result<GattScript> {
        lock(&self.peers)
            .get(address)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(address.to_string()))
    }

    fn ensure_connected(&self, address: &str) -> Result<()> {
        if lock(&self.connected).contains(address) {
            Ok(())
        } else {
            Err(Error::gatt(address, "request", "not connected"))
        }
    }

    async fn gatt_delay(&self) {
        let ms = self.gatt_latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl BleRadio for MockRadio {
    async fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    fn supports_advertising(&self) -> bool {
        !self.no_advertising.load(Ordering::SeqCst)
    }

    async fn start_scan(&self, settings: &ScanSettings) -> Result<SightingStream> {
        if self.power_off_on_scan.swap(false, Ordering::SeqCst) {
            self.set_enabled(false);
        }
        if !self.is_enabled().await {
            return Err(Error::BluetoothDisabled);
        }
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(Error::Unsupported("mock scan failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        *lock(&self.scan_tx) = Some(tx);
        lock(&self.scans).push(settings.clone());
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        lock(&self.scan_tx).take();
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_advertising(&self, params: &AdvertiseParams) -> Result<()> {
        if !self.is_enabled().await {
            return Err(Error::BluetoothDisabled);
        }
        if !self.supports_advertising() {
            return Err(Error::Unsupported("advertising".to_string()));
        }
        if self.fail_advertise.load(Ordering::SeqCst) {
            return Err(Error::Unsupported("mock advertise failure".to_string()));
        }

        *lock(&self.advertising) = Some(params.clone());
        self.advertise_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        lock(&self.advertising).take();
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        lock(&self.connects).push(address.to_string());
        self.gatt_delay().await;

        match self.script(address)? {
            GattScript::ConnectFails => Err(Error::gatt(address, "connect", "status 133")),
            _ => {
                lock(&self.connected).insert(address.to_string());
                Ok(())
            }
        }
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<GattService>> {
        self.ensure_connected(address)?;
        self.gatt_delay().await;

        let generic = GattService {
            uuid: GENERIC_ACCESS,
            characteristics: vec![Uuid::from_u128(0x0000_2a00_0000_1000_8000_0080_5f9b_34fb)],
        };
        match self.script(address)? {
            GattScript::DiscoveryFails => Err(Error::gatt(address, "discover", "status 129")),
            GattScript::MissingCharacteristic => Ok(vec![
                generic,
                GattService {
                    uuid: SERVICE_UUID,
                    characteristics: Vec::new(),
                },
            ]),
            _ => Ok(vec![
                generic,
                GattService {
                    uuid: SERVICE_UUID,
                    characteristics: vec![BUID_CHARACTERISTIC],
                },
            ]),
        }
    }

    async fn read_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.ensure_connected(address)?;
        self.gatt_delay().await;

        if service != SERVICE_UUID || characteristic != BUID_CHARACTERISTIC {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 2));
        }
        match self.script(address)? {
            GattScript::Value(value) => Ok(value),
            GattScript::ReadFails => Err(Error::gatt(address, "read", "status 2")),
            GattScript::MissingCharacteristic => Err(Error::characteristic_not_found(
                characteristic.to_string(),
                2,
            )),
            GattScript::ConnectFails | GattScript::DiscoveryFails => {
                Err(Error::gatt(address, "read", "not connected"))
            }
        }
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        lock(&self.disconnects).push(address.to_string());
        lock(&self.connected).remove(address);
        Ok(())
    }
}

/// In-memory [`RecordSink`] for testing.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ScanRecord>>,
    reject: Mutex<HashSet<Buid>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail to persist records of this peer.
    pub fn reject(&self, buid: Buid) {
        lock(&self.reject).insert(buid);
    }

    /// Records persisted so far.
    pub fn records(&self) -> Vec<ScanRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn persist(&self, record: &ScanRecord) -> Result<()> {
        if lock(&self.reject).contains(&record.buid) {
            return Err(Error::persistence(format!("rejected {}", record.buid)));
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }
}
