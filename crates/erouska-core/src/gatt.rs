//! GATT fallback for peers that do not advertise their BUID.
//!
//! iOS restricts what a backgrounded app may put into an advertisement, so
//! iOS peers expose their BUID through a readable characteristic instead.
//! [`read_remote_buid`] connects, discovers services, reads the
//! characteristic and closes the connection whatever the outcome.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use erouska_types::Buid;
use erouska_types::uuids::{BUID_CHARACTERISTIC, SERVICE_UUID};

use crate::error::{Error, Result};
use crate::traits::BleRadio;

/// Default timeout of each GATT step.
pub const DEFAULT_GATT_TIMEOUT: Duration = Duration::from_secs(10);

async fn timed<T>(
    operation: &str,
    duration: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(duration, fut)
        .await
        .map_err(|_| Error::timeout(operation, duration))?
}

/// Read the BUID of a peer over GATT.
///
/// Each step is bounded by `step_timeout`. The connection is closed in
/// every terminal state, including a failed connect. An empty or all-zero
/// value is reported as [`Error::InvalidData`].
pub async fn read_remote_buid<R>(radio: &R, address: &str, step_timeout: Duration) -> Result<Buid>
where
    R: BleRadio + ?Sized,
{
    debug!("Connecting to GATT of {}", address);
    let result = match timed("connect", step_timeout, radio.connect(address)).await {
        Ok(()) => read_connected(radio, address, step_timeout).await,
        Err(e) => Err(e),
    };

    if let Err(e) = radio.disconnect(address).await {
        warn!("Failed to close GATT connection to {}: {}", address, e);
    }
    result
}

async fn read_connected<R>(radio: &R, address: &str, step_timeout: Duration) -> Result<Buid>
where
    R: BleRadio + ?Sized,
{
    let services = timed("discover services", step_timeout, radio.discover_services(address)).await?;
    debug!("Found {} services on {}", services.len(), address);

    let found = services
        .iter()
        .any(|s| s.uuid == SERVICE_UUID && s.has_characteristic(&BUID_CHARACTERISTIC));
    if !found {
        return Err(Error::characteristic_not_found(
            BUID_CHARACTERISTIC.to_string(),
            services.len(),
        ));
    }

    let value = timed(
        "read characteristic",
        step_timeout,
        radio.read_characteristic(address, SERVICE_UUID, BUID_CHARACTERISTIC),
    )
    .await?;

    Buid::from_slice(&value)?
        .non_zero()
        .ok_or_else(|| Error::InvalidData("BUID not found in characteristic".to_string()))
}
