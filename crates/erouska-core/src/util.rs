//! Utility functions for erouska-core.

use btleplug::platform::PeripheralId;
use rand::Rng;

use erouska_types::{BUID_LEN, Buid};

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_peripheral_id(&format!("{:?}", id)).to_string()
}

fn strip_peripheral_id(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}

/// Create a peer address from a BLE address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_unknown_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_unknown_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}

/// Generate a random non-zero BUID.
pub fn random_buid() -> Buid {
    random_buid_with(&mut rand::rng())
}

/// Generate a random non-zero BUID from the given generator.
pub fn random_buid_with<R: Rng + ?Sized>(rng: &mut R) -> Buid {
    loop {
        let mut bytes = [0u8; BUID_LEN];
        rng.fill(&mut bytes[..]);
        if let Some(buid) = Buid::new(bytes).non_zero() {
            return buid;
        }
    }
}
