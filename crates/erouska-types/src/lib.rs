//! Platform-agnostic types for eRouska proximity detection.
//!
//! This crate provides the identifiers and records shared by the BLE core
//! (erouska-core), the storage layer (erouska-store) and the service.
//!
//! # Features
//!
//! - [`Buid`]: the 10-byte anonymous identifier broadcast by each device
//! - [`ScanRecord`]: one peer's aggregated signal statistics for one scan window
//! - UUID constants for the eRouska service and GATT characteristic
//! - Error types for identifier parsing
//!
//! # Example
//!
//! ```
//! use erouska_types::{Buid, uuids};
//!
//! let buid = Buid::from_hex("00112233445566778899").unwrap();
//! assert_eq!(buid.as_bytes().len(), 10);
//! assert_eq!(uuids::APPLE_COMPANY_ID, 0x004C);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{BUID_LEN, Buid, ScanRecord};
pub use uuid as uuids;
