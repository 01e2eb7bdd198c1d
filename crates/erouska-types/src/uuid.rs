//! Bluetooth identifiers used by eRouska peers.
//!
//! Every eRouska device advertises [`SERVICE_UUID`]. Android peers put their
//! BUID into the service data of that UUID. iOS peers cannot, so they expose
//! it through [`BUID_CHARACTERISTIC`] on a GATT server instead.

use uuid::{Uuid, uuid};

/// Custom eRouska service UUID, advertised by every peer.
pub const SERVICE_UUID: Uuid = uuid!("1440dd68-67e4-11ea-bc55-0242ac130003");

/// GATT characteristic carrying the BUID of an iOS peer.
pub const BUID_CHARACTERISTIC: Uuid = uuid!("9472fbde-04ff-4fff-be1c-b9d3287e8f28");

/// Apple company identifier in manufacturer-specific advertisement data.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// The Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

/// Returns the 16-bit short form of a UUID derived from the Bluetooth base UUID.
///
/// ```
/// use erouska_types::uuid::{short_uuid, SERVICE_UUID};
/// use uuid::uuid;
///
/// assert_eq!(short_uuid(&uuid!("0000fd6f-0000-1000-8000-00805f9b34fb")), Some(0xfd6f));
/// assert_eq!(short_uuid(&SERVICE_UUID), None);
/// ```
#[must_use]
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let bytes = uuid.as_bytes();
    let base = BLUETOOTH_BASE_UUID.as_bytes();
    if bytes[0] == 0 && bytes[1] == 0 && bytes[4..] == base[4..] {
        Some(u16::from_be_bytes([bytes[2], bytes[3]]))
    } else {
        None
    }
}
