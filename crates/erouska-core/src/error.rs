//! Error types for erouska-core.
//!
//! Nothing in the proximity core is fatal. Every error defined here is
//! logged by the caller and the next scan or advertise cycle proceeds as
//! scheduled.
//!
//! | Error | Where it comes from | Handling |
//! |-------|---------------------|----------|
//! | [`Error::BluetoothDisabled`] | Radio powered off as a scan or advertisement starts | End the loop until the next update |
//! | [`Error::Bluetooth`] | btleplug / BlueZ failure | Log, next cycle retries |
//! | [`Error::CharacteristicNotFound`] | iOS peer without the BUID characteristic | Skip peer |
//! | [`Error::Gatt`] | Connection, discovery or read failed | Skip peer, no retry in window |
//! | [`Error::InvalidData`] | Malformed identifier | Skip peer |
//! | [`Error::ScanAborted`] | Scan stream ended by the stack | Mark scanning stopped |
//! | [`Error::Persistence`] | Record sink rejected a record | Log, keep persisting the rest |
//! | [`Error::Unsupported`] | Platform cannot advertise | Scan only |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the proximity core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from btleplug.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// BlueZ error (Linux advertising and adapter state).
    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    BlueZ(#[from] bluer::Error),

    /// The Bluetooth adapter is missing or powered off.
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,

    /// No Bluetooth adapter available.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Peer with the given address is not known to the adapter.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Required GATT characteristic not found on the peer.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// A GATT operation failed.
    #[error("GATT {operation} failed for {address}: {reason}")]
    Gatt {
        /// Address of the peer.
        address: String,
        /// The operation that failed (connect, discover, read).
        operation: &'static str,
        /// Failure description.
        reason: String,
    },

    /// Failed to parse data received from a peer.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The platform does not support the requested radio operation.
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    /// A running scan ended unexpectedly.
    #[error("Scan aborted: {0}")]
    ScanAborted(String),

    /// A scan record could not be persisted.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a GATT failure.
    pub fn gatt(address: impl Into<String>, operation: &'static str, reason: impl ToString) -> Self {
        Self::Gatt {
            address: address.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl ToString) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Whether the error means the radio is unavailable rather than a
    /// single operation failing.
    pub fn is_radio_unavailable(&self) -> bool {
        matches!(self, Self::BluetoothDisabled | Self::NoAdapter)
    }
}

impl From<erouska_types::ParseError> for Error {
    fn from(err: erouska_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using erouska-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
