//! Per-peer RSSI aggregation within one scan window.
//!
//! A [`ScanSession`] collects the signal strength samples of one peer while
//! a scan window is open. When the window closes the session is reduced to
//! an immutable [`ScanRecord`]. The [`SessionTable`] keeps one session per
//! BUID and tracks iOS peers by address until their BUID is known.
//!
//! GATT reads of iOS peers can outlive the window they started in. Each
//! window has a number, and a read only acts on the window it was started
//! for. At most one read per address is in flight across windows.
//!
//! # Statistics
//!
//! | Field | Reduction |
//! |-------|-----------|
//! | `max_rssi` | Largest sample |
//! | `med_rssi` | Middle sorted sample; mean of the two middle samples for an even count |
//! | `avg_rssi` | Arithmetic mean |
//! | `rssi_count` | Number of samples |
//!
//! Means are truncated toward zero.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use time::OffsetDateTime;

use erouska_types::{Buid, ScanRecord};

/// Reduced RSSI statistics of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiStats {
    /// Strongest sample in dBm.
    pub max: i16,
    /// Median sample in dBm.
    pub median: i16,
    /// Mean sample in dBm.
    pub average: i16,
    /// Number of samples.
    pub count: u32,
}

impl RssiStats {
    /// Reduce a set of samples. Returns `None` for no samples.
    pub fn from_samples(samples: &[i16]) -> Option<Self> {
        let max = *samples.iter().max()?;

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            ((i32::from(sorted[mid - 1]) + i32::from(sorted[mid])) / 2) as i16
        };

        let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();
        let average = (sum / samples.len() as i64) as i16;

        Some(Self {
            max,
            median,
            average,
            count: samples.len() as u32,
        })
    }
}

/// RSSI samples of one peer in one scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    device_id: Option<Buid>,
    mac_address: String,
    rssi_samples: Vec<i16>,
    timestamp_start: OffsetDateTime,
    timestamp_end: OffsetDateTime,
}

impl ScanSession {
    /// Start a session from its first sighting.
    pub fn new(
        device_id: Option<Buid>,
        mac_address: impl Into<String>,
        rssi: i16,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            device_id,
            mac_address: mac_address.into(),
            rssi_samples: vec![rssi],
            timestamp_start: at,
            timestamp_end: at,
        }
    }

    /// The peer's BUID, `None` while an iOS peer awaits its GATT read.
    pub fn device_id(&self) -> Option<Buid> {
        self.device_id
    }

    /// Address the peer was first seen with.
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Samples in arrival order.
    pub fn rssi_samples(&self) -> &[i16] {
        &self.rssi_samples
    }

    /// First sighting.
    pub fn timestamp_start(&self) -> OffsetDateTime {
        self.timestamp_start
    }

    /// Last sighting.
    pub fn timestamp_end(&self) -> OffsetDateTime {
        self.timestamp_end
    }

    /// Add a sample and extend the session window.
    pub fn add_rssi(&mut self, rssi: i16, at: OffsetDateTime) {
        self.rssi_samples.push(rssi);
        self.timestamp_start = self.timestamp_start.min(at);
        self.timestamp_end = self.timestamp_end.max(at);
    }

    /// Fold another session of the same peer into this one.
    pub fn merge(&mut self, other: ScanSession) {
        self.rssi_samples.extend(other.rssi_samples);
        self.timestamp_start = self.timestamp_start.min(other.timestamp_start);
        self.timestamp_end = self.timestamp_end.max(other.timestamp_end);
    }

    /// Current statistics.
    pub fn calculate(&self) -> Option<RssiStats> {
        RssiStats::from_samples(&self.rssi_samples)
    }

    /// Reduce to a record. Sessions without a usable BUID yield `None`.
    pub fn finalize(self) -> Option<ScanRecord> {
        let buid = self.device_id?.non_zero()?;
        let stats = self.calculate()?;
        Some(ScanRecord {
            buid,
            timestamp_start: self.timestamp_start,
            timestamp_end: self.timestamp_end,
            max_rssi: stats.max,
            med_rssi: stats.median,
            avg_rssi: stats.average,
            rssi_count: stats.count,
        })
    }
}

/// State of an iOS peer within a window.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IosPeer {
    /// GATT read in flight, samples collected so far.
    Pending(ScanSession),
    /// BUID known, samples go to that session.
    Resolved(Buid),
    /// GATT read failed, peer skipped for the rest of the window.
    Unresolved,
}

/// What a sighting of an iOS peer means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IosSighting {
    /// First sighting in this window; its BUID must be read over GATT.
    /// The read is counted as in flight until [`SessionTable::finish_read`].
    New,
    /// BUID still being read, or waiting for a read left over from an
    /// earlier window to finish.
    Pending,
    /// Sample added to the session of this BUID.
    Resolved(Buid),
    /// Peer could not be identified this window.
    Skipped,
}

/// What a finished GATT read means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The peer's samples now belong to this BUID.
    Resolved(Buid),
    /// The peer is skipped for the rest of the window.
    Failed,
    /// The read belongs to a closed window and was discarded.
    Stale,
    /// The read was discarded, but the peer is pending in the current
    /// window; a new read must start for window `window`.
    Restart {
        /// Window the new read belongs to.
        window: u64,
    },
}

/// Sessions of the current scan window.
#[derive(Debug, Default)]
pub struct SessionTable {
    window: u64,
    sessions: HashMap<Buid, ScanSession>,
    ios_peers: HashMap<String, IosPeer>,
    // address -> window of the GATT read in flight
    reads: HashMap<String, u64>,
}

/// Records drained from a [`SessionTable`].
#[derive(Debug, Default)]
pub struct DrainedSessions {
    /// One record per resolved peer.
    pub records: Vec<ScanRecord>,
    /// iOS peers whose BUID was never read.
    pub unresolved: usize,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of an Android peer. Returns `true` for a new peer.
    pub fn record_android(
        &mut self,
        buid: Buid,
        address: &str,
        rssi: i16,
        at: OffsetDateTime,
    ) -> bool {
        match self.sessions.entry(buid) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().add_rssi(rssi, at);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(ScanSession::new(Some(buid), address, rssi, at));
                true
            }
        }
    }

    /// Number of the current window.
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Record a sighting of an iOS peer identified only by address.
    pub fn record_ios(&mut self, address: &str, rssi: i16, at: OffsetDateTime) -> IosSighting {
        match self.ios_peers.get_mut(address) {
            None => {
                self.ios_peers.insert(
                    address.to_string(),
                    IosPeer::Pending(ScanSession::new(None, address, rssi, at)),
                );
                if self.reads.contains_key(address) {
                    return IosSighting::Pending;
                }
                self.reads.insert(address.to_string(), self.window);
                IosSighting::New
            }
            Some(IosPeer::Pending(session)) => {
                session.add_rssi(rssi, at);
                IosSighting::Pending
            }
            Some(IosPeer::Resolved(buid)) => {
                let buid = *buid;
                match self.sessions.get_mut(&buid) {
                    Some(session) => session.add_rssi(rssi, at),
                    None => {
                        self.sessions
                            .insert(buid, ScanSession::new(Some(buid), address, rssi, at));
                    }
                }
                IosSighting::Resolved(buid)
            }
            Some(IosPeer::Unresolved) => IosSighting::Skipped,
        }
    }

    /// Apply the result of a GATT read started for `window`.
    ///
    /// A BUID read in the current window resolves the pending peer; a
    /// failure marks it unresolved. A result from a closed window never
    /// touches the current one.
    pub fn finish_read(&mut self, address: &str, window: u64, buid: Option<Buid>) -> ReadOutcome {
        if self.reads.get(address) == Some(&window) {
            self.reads.remove(address);
        }

        if window != self.window {
            if matches!(self.ios_peers.get(address), Some(IosPeer::Pending(_)))
                && !self.reads.contains_key(address)
            {
                self.reads.insert(address.to_string(), self.window);
                return ReadOutcome::Restart {
                    window: self.window,
                };
            }
            return ReadOutcome::Stale;
        }

        match buid {
            Some(buid) if self.resolve_ios(address, buid) => ReadOutcome::Resolved(buid),
            Some(_) => ReadOutcome::Stale,
            None => {
                self.fail_ios(address);
                ReadOutcome::Failed
            }
        }
    }

    /// Whether a GATT read of `address` is in flight.
    pub fn is_reading(&self, address: &str) -> bool {
        self.reads.contains_key(address)
    }

    /// Attach a BUID read over GATT to a pending iOS peer.
    ///
    /// The pending samples join the session of that BUID, merging with an
    /// existing one. Returns `false` if the peer is not pending in this
    /// window.
    fn resolve_ios(&mut self, address: &str, buid: Buid) -> bool {
        match self.ios_peers.remove(address) {
            Some(IosPeer::Pending(mut session)) => {
                self.ios_peers
                    .insert(address.to_string(), IosPeer::Resolved(buid));
                session.device_id = Some(buid);
                match self.sessions.entry(buid) {
                    Entry::Occupied(mut entry) => entry.get_mut().merge(session),
                    Entry::Vacant(entry) => {
                        entry.insert(session);
                    }
                }
                true
            }
            Some(other) => {
                self.ios_peers.insert(address.to_string(), other);
                false
            }
            None => false,
        }
    }

    /// Mark a pending iOS peer as unidentifiable for this window.
    fn fail_ios(&mut self, address: &str) {
        if let Some(peer) = self.ios_peers.get_mut(address)
            && matches!(peer, IosPeer::Pending(_))
        {
            *peer = IosPeer::Unresolved;
        }
    }

    /// Session of a peer.
    pub fn get(&self, buid: &Buid) -> Option<&ScanSession> {
        self.sessions.get(buid)
    }

    /// Number of identified peers.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no peer has been identified.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of iOS peers still awaiting their BUID.
    pub fn pending_count(&self) -> usize {
        self.ios_peers
            .values()
            .filter(|p| matches!(p, IosPeer::Pending(_)))
            .count()
    }

    /// Finalize every identified session and clear the table.
    ///
    /// Starts the next window. Reads in flight stay tracked.
    pub fn drain(&mut self) -> DrainedSessions {
        let unresolved = self.pending_count();
        self.ios_peers.clear();
        self.window += 1;

        let mut records: Vec<ScanRecord> = self
            .sessions
            .drain()
            .filter_map(|(_, session)| session.finalize())
            .collect();
        records.sort_by_key(|r| r.timestamp_start);

        DrainedSessions {
            records,
            unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2020-04-20 10:00:00 UTC);

    fn at(secs: i64) -> OffsetDateTime {
        T0 + time::Duration::seconds(secs)
    }

    fn buid(n: u8) -> Buid {
        Buid::new([n; 10])
    }

    #[test]
    fn test_statistics_of_three_samples() {
        let stats = RssiStats::from_samples(&[-70, -65, -80]).unwrap();
        assert_eq!(stats.max, -65);
        assert_eq!(stats.median, -70);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average, -71);
    }

    #[test]
    fn test_median_of_even_count() {
        let stats = RssiStats::from_samples(&[-60, -70, -65, -80]).unwrap();
        // sorted: -80 -70 -65 -60, middle pair -70 / -65
        assert_eq!(stats.median, -67);
        assert_eq!(stats.max, -60);
        assert_eq!(stats.average, -68);
    }

    #[test]
    fn test_single_sample() {
        let stats = RssiStats::from_samples(&[-55]).unwrap();
        assert_eq!(
            stats,
            RssiStats {
                max: -55,
                median: -55,
                average: -55,
                count: 1
            }
        );
        assert_eq!(RssiStats::from_samples(&[]), None);
    }

    #[test]
    fn test_session_window_tracks_first_and_last() {
        let mut session = ScanSession::new(Some(buid(1)), "AA", -70, at(5));
        session.add_rssi(-65, at(12));
        session.add_rssi(-80, at(9));

        assert_eq!(session.timestamp_start(), at(5));
        assert_eq!(session.timestamp_end(), at(12));
        assert_eq!(session.rssi_samples(), &[-70, -65, -80]);

        let record = session.finalize().unwrap();
        assert_eq!(record.max_rssi, -65);
        assert_eq!(record.med_rssi, -70);
        assert_eq!(record.rssi_count, 3);
        assert_eq!(record.duration().whole_seconds(), 7);
    }

    #[test]
    fn test_finalize_requires_buid() {
        assert_eq!(ScanSession::new(None, "AA", -70, T0).finalize(), None);
        assert_eq!(
            ScanSession::new(Some(Buid::ZERO), "AA", -70, T0).finalize(),
            None
        );
    }

    #[test]
    fn test_first_sighting_counted_once() {
        let mut table = SessionTable::new();
        assert!(table.record_android(buid(1), "AA", -70, at(0)));
        assert_eq!(table.get(&buid(1)).unwrap().rssi_samples().len(), 1);
    }

    #[test]
    fn test_two_sightings_one_record() {
        let mut table = SessionTable::new();
        assert!(table.record_android(buid(1), "AA", -70, at(0)));
        assert!(!table.record_android(buid(1), "AA", -60, at(4)));
        assert_eq!(table.len(), 1);

        let drained = table.drain();
        assert_eq!(drained.records.len(), 1);
        let record = &drained.records[0];
        assert_eq!(record.buid, buid(1));
        assert_eq!(record.rssi_count, 2);
        assert_eq!(record.max_rssi, -60);
        assert!(table.is_empty());
    }

    #[test]
    fn test_same_buid_from_new_address_joins_session() {
        let mut table = SessionTable::new();
        table.record_android(buid(1), "AA", -70, at(0));
        table.record_android(buid(1), "BB", -72, at(1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&buid(1)).unwrap().mac_address(), "AA");
    }

    #[test]
    fn test_ios_lifecycle() {
        let mut table = SessionTable::new();
        assert_eq!(table.record_ios("IOS", -75, at(0)), IosSighting::New);
        assert_eq!(table.record_ios("IOS", -74, at(1)), IosSighting::Pending);
        assert_eq!(table.pending_count(), 1);
        assert!(table.is_empty());

        assert!(table.is_reading("IOS"));
        assert_eq!(
            table.finish_read("IOS", 0, Some(buid(9))),
            ReadOutcome::Resolved(buid(9))
        );
        assert!(!table.is_reading("IOS"));
        assert_eq!(table.pending_count(), 0);
        assert_eq!(table.record_ios("IOS", -73, at(2)), IosSighting::Resolved(buid(9)));

        let session = table.get(&buid(9)).unwrap();
        assert_eq!(session.device_id(), Some(buid(9)));
        assert_eq!(session.rssi_samples(), &[-75, -74, -73]);

        // second resolution is ignored
        assert_eq!(table.finish_read("IOS", 0, Some(buid(8))), ReadOutcome::Stale);
    }

    #[test]
    fn test_ios_resolution_merges_into_existing_buid() {
        let mut table = SessionTable::new();
        table.record_android(buid(3), "AA", -60, at(10));
        table.record_ios("IOS", -80, at(0));
        table.finish_read("IOS", 0, Some(buid(3)));

        assert_eq!(table.len(), 1);
        let session = table.get(&buid(3)).unwrap();
        assert_eq!(session.rssi_samples().len(), 2);
        assert_eq!(session.timestamp_start(), at(0));
        assert_eq!(session.timestamp_end(), at(10));
    }

    #[test]
    fn test_failed_ios_peer_is_skipped() {
        let mut table = SessionTable::new();
        table.record_ios("IOS", -75, at(0));
        assert_eq!(table.finish_read("IOS", 0, None), ReadOutcome::Failed);
        assert_eq!(table.record_ios("IOS", -70, at(1)), IosSighting::Skipped);

        let drained = table.drain();
        assert!(drained.records.is_empty());
        assert_eq!(drained.unresolved, 0);
    }

    #[test]
    fn test_drain_drops_pending_ios_sessions() {
        let mut table = SessionTable::new();
        table.record_android(buid(1), "AA", -70, at(0));
        table.record_ios("IOS", -75, at(0));

        let drained = table.drain();
        assert_eq!(drained.records.len(), 1);
        assert_eq!(drained.unresolved, 1);

        // the next window starts clean
        assert_eq!(table.window(), 1);
        assert_eq!(table.record_ios("OTHER", -75, at(30)), IosSighting::New);
    }

    #[test]
    fn test_late_read_does_not_touch_next_window() {
        let mut table = SessionTable::new();
        assert_eq!(table.record_ios("IOS", -75, at(0)), IosSighting::New);
        table.drain();

        // the read of the closed window is still running
        assert_eq!(table.record_ios("IOS", -70, at(30)), IosSighting::Pending);
        assert_eq!(
            table.finish_read("IOS", 0, None),
            ReadOutcome::Restart { window: 1 }
        );
        assert!(table.is_reading("IOS"));
        assert_eq!(table.record_ios("IOS", -69, at(31)), IosSighting::Pending);

        assert_eq!(
            table.finish_read("IOS", 1, Some(buid(9))),
            ReadOutcome::Resolved(buid(9))
        );
        assert_eq!(table.record_ios("IOS", -68, at(32)), IosSighting::Resolved(buid(9)));

        let records = table.drain().records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].buid, buid(9));
        assert_eq!(records[0].rssi_count, 3);
    }

    #[test]
    fn test_late_read_without_new_sighting_is_stale() {
        let mut table = SessionTable::new();
        table.record_ios("IOS", -75, at(0));
        table.drain();

        assert_eq!(table.finish_read("IOS", 0, Some(buid(4))), ReadOutcome::Stale);
        assert!(!table.is_reading("IOS"));
        assert!(table.is_empty());
        assert_eq!(table.record_ios("IOS", -70, at(30)), IosSighting::New);
    }

    #[test]
    fn test_drain_orders_by_start() {
        let mut table = SessionTable::new();
        table.record_android(buid(2), "BB", -70, at(5));
        table.record_android(buid(1), "AA", -70, at(1));
        let records = table.drain().records;
        assert_eq!(records[0].buid, buid(1));
        assert_eq!(records[1].buid, buid(2));
    }
}
