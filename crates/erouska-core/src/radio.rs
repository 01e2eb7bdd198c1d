//! The platform Bluetooth stack.
//!
//! [`PlatformRadio`] scans and acts as GATT client through btleplug on every
//! platform. btleplug has no peripheral role, so advertising goes through
//! BlueZ (`bluer`) on Linux and is unsupported elsewhere.
//!
//! btleplug only exposes parsed advertisement fields. Sightings rebuild the
//! raw payload from them, see [`Sighting::from_advertisement`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::channel::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scan::{Sighting, SightingStream, get_adapter};
use crate::settings::{AdvertiseParams, ScanSettings};
use crate::traits::{BleRadio, GattService};
use crate::util::create_identifier;

use self::advertiser::Advertiser;

#[cfg(target_os = "linux")]
mod advertiser {
    use std::collections::{BTreeMap, BTreeSet};

    use bluer::adv::{Advertisement, AdvertisementHandle, Type};
    use bluer::{Adapter, Session};
    use tokio::sync::Mutex;

    use crate::error::Result;
    use crate::settings::AdvertiseParams;

    /// LE advertising through BlueZ.
    pub struct Advertiser {
        _session: Session,
        adapter: Adapter,
        handle: Mutex<Option<AdvertisementHandle>>,
    }

    impl Advertiser {
        pub async fn open() -> Result<Self> {
            let session = Session::new().await?;
            let adapter = session.default_adapter().await?;
            Ok(Self {
                _session: session,
                adapter,
                handle: Mutex::new(None),
            })
        }

        pub async fn is_powered(&self) -> bool {
            self.adapter.is_powered().await.unwrap_or(false)
        }

        pub async fn start(&self, params: &AdvertiseParams) -> Result<()> {
            let mut handle = self.handle.lock().await;
            // unregister the previous advertisement first
            handle.take();

            let settings = params.settings;
            let interval = settings.mode.interval();
            let advertisement = Advertisement {
                advertisement_type: if settings.connectable {
                    Type::Peripheral
                } else {
                    Type::Broadcast
                },
                service_uuids: BTreeSet::from([params.service_uuid]),
                service_data: BTreeMap::from([(params.service_uuid, params.service_data.clone())]),
                min_interval: Some(interval),
                max_interval: Some(interval),
                tx_power: Some(settings.tx_power.dbm()),
                ..Default::default()
            };

            *handle = Some(self.adapter.advertise(advertisement).await?);
            Ok(())
        }

        pub async fn stop(&self) {
            self.handle.lock().await.take();
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod advertiser {
    use crate::error::{Error, Result};
    use crate::settings::AdvertiseParams;

    /// No advertising backend on this platform.
    pub enum Advertiser {}

    impl Advertiser {
        pub async fn open() -> Result<Self> {
            Err(Error::Unsupported("BLE advertising".to_string()))
        }

        pub async fn is_powered(&self) -> bool {
            match *self {}
        }

        pub async fn start(&self, _params: &AdvertiseParams) -> Result<()> {
            match *self {}
        }

        pub async fn stop(&self) {
            match *self {}
        }
    }
}

/// The platform Bluetooth stack.
pub struct PlatformRadio {
    adapter: Adapter,
    advertiser: Option<Advertiser>,
    scan: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for PlatformRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRadio")
            .field("advertising_supported", &self.advertiser.is_some())
            .finish()
    }
}

impl PlatformRadio {
    /// Open the first Bluetooth adapter.
    ///
    /// Missing advertising support is logged, not an error: the radio then
    /// only scans.
    pub async fn new() -> Result<Self> {
        let adapter = get_adapter().await?;
        let advertiser = match Advertiser::open().await {
            Ok(advertiser) => Some(advertiser),
            Err(e) => {
                warn!("BLE advertising unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            adapter,
            advertiser,
            scan: Mutex::new(None),
        })
    }

    fn scan(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(props)) = peripheral.properties().await
                && create_identifier(&props.address.to_string(), &peripheral.id()) == address
            {
                return Ok(peripheral);
            }
        }
        Err(Error::PeerNotFound(address.to_string()))
    }
}

async fn read_sighting(adapter: &Adapter, id: &PeripheralId) -> Result<Option<Sighting>> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(rssi) = props.rssi else {
        return Ok(None);
    };

    let address = create_identifier(&props.address.to_string(), id);
    Ok(Some(Sighting::from_advertisement(
        address,
        rssi,
        props.services,
        &props.service_data,
        props.manufacturer_data,
    )))
}

#[async_trait]
impl BleRadio for PlatformRadio {
    async fn is_enabled(&self) -> bool {
        match &self.advertiser {
            Some(advertiser) => advertiser.is_powered().await,
            None => self.adapter.adapter_info().await.is_ok(),
        }
    }

    fn supports_advertising(&self) -> bool {
        self.advertiser.is_some()
    }

    async fn start_scan(&self, settings: &ScanSettings) -> Result<SightingStream> {
        if !self.is_enabled().await {
            return Err(Error::BluetoothDisabled);
        }
        let mut events = self.adapter.events().await?;
        let filter = ScanFilter {
            services: settings.service_filter.into_iter().collect(),
        };
        // btleplug has no duty cycle control; the mode only matters on stacks that do
        debug!("Starting btleplug scan ({} mode requested)", settings.mode);
        self.adapter.start_scan(filter).await?;

        let (tx, rx) = mpsc::unbounded();
        let cancel = CancellationToken::new();
        if let Some(previous) = self.scan().replace(cancel.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            match read_sighting(&adapter, &id).await {
                                Ok(Some(sighting)) => {
                                    if tx.unbounded_send(Ok(sighting)).is_err() {
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => debug!("Skipping {:?}: {}", id, e),
                            }
                        }
                        Some(_) => {}
                        None => {
                            let _ = tx.unbounded_send(Err(Error::ScanAborted(
                                "adapter event stream closed".to_string(),
                            )));
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(cancel) = self.scan().take() {
            cancel.cancel();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn start_advertising(&self, params: &AdvertiseParams) -> Result<()> {
        let advertiser = self
            .advertiser
            .as_ref()
            .ok_or_else(|| Error::Unsupported("BLE advertising".to_string()))?;
        if !advertiser.is_powered().await {
            return Err(Error::BluetoothDisabled);
        }
        advertiser.start(params).await?;
        info!("BLE advertising started");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        if let Some(advertiser) = &self.advertiser {
            advertiser.stop().await;
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| Error::gatt(address, "connect", e))?;
        debug!("GATT connected to {}", address);
        Ok(())
    }

    async fn discover_services(&self, address: &str) -> Result<Vec<GattService>> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| Error::gatt(address, "discover", e))?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn read_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let peripheral = self.find_peripheral(address).await?;
        let services = peripheral.services();
        let target = services
            .iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or_else(|| Error::characteristic_not_found(characteristic.to_string(), services.len()))?;

        peripheral
            .read(&target)
            .await
            .map_err(|e| Error::gatt(address, "read", e))
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| Error::gatt(address, "disconnect", e))?;
        debug!("GATT disconnected from {}", address);
        Ok(())
    }
}
