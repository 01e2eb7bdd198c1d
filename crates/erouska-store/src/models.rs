//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use erouska_types::{Buid, ScanRecord};

/// A scan result stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScanResult {
    /// Database row ID.
    pub id: i64,
    /// Peer identifier.
    pub buid: Buid,
    /// First sighting in the window.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp_start: OffsetDateTime,
    /// Last sighting in the window.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp_end: OffsetDateTime,
    /// Strongest sample in dBm.
    pub max_rssi: i16,
    /// Median sample in dBm.
    pub med_rssi: i16,
    /// Mean sample in dBm.
    pub avg_rssi: i16,
    /// Number of samples.
    pub rssi_count: u32,
}

impl StoredScanResult {
    /// Convert to the record it was stored from.
    pub fn to_record(&self) -> ScanRecord {
        ScanRecord {
            buid: self.buid,
            timestamp_start: self.timestamp_start,
            timestamp_end: self.timestamp_end,
            max_rssi: self.max_rssi,
            med_rssi: self.med_rssi,
            avg_rssi: self.avg_rssi,
            rssi_count: self.rssi_count,
        }
    }
}

/// Encounters with one peer, aggregated over stored windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Peer identifier.
    pub buid: Buid,
    /// Number of windows the peer was seen in.
    pub windows: u64,
    /// Total samples over all windows.
    pub samples: u64,
    /// Strongest sample over all windows in dBm.
    pub max_rssi: i16,
    /// First sighting.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Last sighting.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}
