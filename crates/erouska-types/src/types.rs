//! Core types for proximity records.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Length of a BUID in bytes.
pub const BUID_LEN: usize = 10;

/// Bluetooth user identifier: the rotating anonymous identifier a device
/// broadcasts.
///
/// A BUID is 10 raw bytes. Its canonical text form is 20 lowercase hex
/// characters. The all-zero BUID is reserved to mean "not found"; see
/// [`Buid::is_zero`].
///
/// # Examples
///
/// ```
/// use erouska_types::Buid;
///
/// let buid: Buid = "0a1b2c3d4e5f60718293".parse().unwrap();
/// assert_eq!(buid.to_string(), "0a1b2c3d4e5f60718293");
/// assert_eq!(buid.as_bytes()[0], 0x0a);
/// assert!(!buid.is_zero());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Buid([u8; BUID_LEN]);

impl Buid {
    /// The all-zero BUID.
    pub const ZERO: Buid = Buid([0; BUID_LEN]);

    /// Create a BUID from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; BUID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a BUID from a byte slice of exactly [`BUID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        let array: [u8; BUID_LEN] =
            bytes
                .try_into()
                .map_err(|_| ParseError::InvalidLength {
                    expected: BUID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    /// Parse a BUID from its hex text form (case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        let hex = hex.trim();
        if hex.len() != BUID_LEN * 2 {
            return Err(ParseError::InvalidLength {
                expected: BUID_LEN * 2,
                actual: hex.len(),
            });
        }

        let mut bytes = [0u8; BUID_LEN];
        let mut chars = hex.char_indices();
        for byte in &mut bytes {
            let (hi_pos, hi) = chars.next().ok_or(ParseError::InvalidLength {
                expected: BUID_LEN * 2,
                actual: hex.len(),
            })?;
            let (lo_pos, lo) = chars.next().ok_or(ParseError::InvalidLength {
                expected: BUID_LEN * 2,
                actual: hex.len(),
            })?;
            *byte = (hex_value(hi, hi_pos)? << 4) | hex_value(lo, lo_pos)?;
        }
        Ok(Self(bytes))
    }

    /// Lowercase hex text form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BUID_LEN] {
        &self.0
    }

    /// Whether this is the reserved all-zero "not found" value.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; BUID_LEN]
    }

    /// Returns `Some(self)` unless the BUID is all zeros.
    #[must_use]
    pub fn non_zero(self) -> Option<Self> {
        if self.is_zero() { None } else { Some(self) }
    }
}

fn hex_value(c: char, position: usize) -> Result<u8, ParseError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(ParseError::InvalidHex {
            character: c,
            position,
        })
}

impl fmt::Display for Buid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Buid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buid({})", self)
    }
}

impl FromStr for Buid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; BUID_LEN]> for Buid {
    fn from(bytes: [u8; BUID_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "serde")]
impl Serialize for Buid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Buid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Buid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Aggregated observation of one peer over one scan window.
///
/// This is the immutable row handed to persistent storage when a scan window
/// closes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanRecord {
    /// The peer's BUID.
    pub buid: Buid,
    /// First sighting in the window.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp_start: OffsetDateTime,
    /// Last sighting in the window.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp_end: OffsetDateTime,
    /// Strongest RSSI seen, in dBm.
    pub max_rssi: i16,
    /// Median RSSI, in dBm.
    pub med_rssi: i16,
    /// Mean RSSI, in dBm (truncated toward zero).
    pub avg_rssi: i16,
    /// Number of RSSI samples aggregated.
    pub rssi_count: u32,
}

impl ScanRecord {
    /// Duration between the first and last sighting.
    #[must_use]
    pub fn duration(&self) -> time::Duration {
        self.timestamp_end - self.timestamp_start
    }
}

impl fmt::Display for ScanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} samples, max {} dBm, med {} dBm, {}s]",
            self.buid,
            self.rssi_count,
            self.max_rssi,
            self.med_rssi,
            self.duration().whole_seconds()
        )
    }
}
