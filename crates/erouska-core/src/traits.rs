//! Trait abstractions for the radio and record persistence.
//!
//! [`BleRadio`] abstracts over the platform Bluetooth stack and the mock
//! radio used in tests. [`RecordSink`] receives finalized scan records.

use async_trait::async_trait;
use uuid::Uuid;

use erouska_types::ScanRecord;

use crate::error::Result;
use crate::scan::SightingStream;
use crate::settings::{AdvertiseParams, ScanSettings};

/// A GATT service discovered on a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristic UUIDs of the service.
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    /// Whether the service exposes the given characteristic.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.contains(uuid)
    }
}

/// Operations the proximity core needs from a Bluetooth stack.
///
/// Peers are addressed by the string form of their address as reported in
/// [`Sighting::address`](crate::scan::Sighting::address).
///
/// # Example
///
/// ```ignore
/// use erouska_core::{BleRadio, ScanSettings};
/// use futures::StreamExt;
///
/// async fn first_rssi<R: BleRadio>(radio: &R) -> Option<i16> {
///     let mut stream = radio.start_scan(&ScanSettings::new()).await.ok()?;
///     let sighting = stream.next().await?.ok()?;
///     Some(sighting.rssi)
/// }
/// ```
#[async_trait]
pub trait BleRadio: Send + Sync {
    /// Whether the adapter is present and powered on.
    async fn is_enabled(&self) -> bool;

    /// Whether the platform can broadcast advertisements.
    fn supports_advertising(&self) -> bool;

    // --- Scanning ---

    /// Start scanning and return the stream of sightings.
    async fn start_scan(&self, settings: &ScanSettings) -> Result<SightingStream>;

    /// Stop a running scan.
    async fn stop_scan(&self) -> Result<()>;

    // --- Advertising ---

    /// Start broadcasting. Replaces any running advertisement.
    async fn start_advertising(&self, params: &AdvertiseParams) -> Result<()>;

    /// Stop broadcasting.
    async fn stop_advertising(&self) -> Result<()>;

    // --- GATT client ---

    /// Connect to a peer.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Discover the services of a connected peer.
    async fn discover_services(&self, address: &str) -> Result<Vec<GattService>>;

    /// Read a characteristic of a connected peer.
    async fn read_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>>;

    /// Close the connection to a peer.
    async fn disconnect(&self, address: &str) -> Result<()>;
}

/// Destination for finalized scan records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one record.
    async fn persist(&self, record: &ScanRecord) -> Result<()>;
}
