//! Scan results and adapter discovery.
//!
//! A [`Sighting`] is one advertisement received from a peer during a scan.
//! Radios deliver sightings as a [`SightingStream`].

use std::collections::HashMap;

use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::BoxStream;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::advertisement::{encode_manufacturer_data, encode_service_data, encode_service_uuids};
use crate::error::{Error, Result};
use erouska_types::uuids::{APPLE_COMPANY_ID, SERVICE_UUID};

/// Stream of sightings produced by a running scan.
///
/// An `Err` item reports a scan failure; the scan is considered stopped.
pub type SightingStream = BoxStream<'static, Result<Sighting>>;

/// One advertisement received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Peer address (MAC address, or the platform identifier on macOS).
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Service UUIDs listed in the advertisement.
    pub services: Vec<Uuid>,
    /// Manufacturer specific data keyed by company id.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Raw advertisement and scan response payload.
    pub payload: Bytes,
    /// When the sighting was received.
    pub received_at: OffsetDateTime,
}

impl Sighting {
    /// Build a sighting from parsed advertisement fields.
    ///
    /// Backends that only expose parsed fields use this to reconstruct the
    /// raw payload as the peer would have sent it. The eRouska service data
    /// is written first and other entries follow in UUID order, so the
    /// payload does not depend on map iteration order. Entries too large
    /// for an AD structure are left out.
    pub fn from_advertisement(
        address: impl Into<String>,
        rssi: i16,
        services: Vec<Uuid>,
        service_data: &HashMap<Uuid, Vec<u8>>,
        manufacturer_data: HashMap<u16, Vec<u8>>,
    ) -> Self {
        let mut structures = Vec::new();
        if !services.is_empty() {
            structures.push(encode_service_uuids(&services));
        }

        let mut entries: Vec<_> = service_data.iter().collect();
        entries.sort_by_key(|(uuid, _)| (**uuid != SERVICE_UUID, **uuid));
        structures.extend(
            entries
                .into_iter()
                .map(|(uuid, data)| encode_service_data(uuid, data)),
        );

        let mut companies: Vec<_> = manufacturer_data.iter().collect();
        companies.sort_by_key(|(company, _)| **company);
        structures.extend(
            companies
                .into_iter()
                .map(|(company, data)| encode_manufacturer_data(*company, data)),
        );

        let mut payload = BytesMut::new();
        for structure in structures {
            match structure {
                Some(bytes) => payload.put(bytes),
                None => debug!("Skipping oversized advertisement entry"),
            }
        }

        Self {
            address: address.into(),
            rssi,
            services,
            manufacturer_data,
            payload: payload.freeze(),
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether the advertisement lists the given service.
    pub fn advertises(&self, uuid: &Uuid) -> bool {
        self.services.contains(uuid)
    }

    /// Whether the advertisement carries Apple manufacturer data.
    pub fn is_apple(&self) -> bool {
        self.manufacturer_data.contains_key(&APPLE_COMPANY_ID)
    }

    /// Set the receive time.
    pub fn at(mut self, received_at: OffsetDateTime) -> Self {
        self.received_at = received_at;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}
