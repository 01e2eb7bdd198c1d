//! The Bluetooth repository: scanning, advertising and session bookkeeping.
//!
//! [`BluetoothRepository`] owns the sessions of the current scan window.
//! Sightings from the radio are aggregated per BUID. Android peers carry
//! the BUID in the advertisement; iOS peers are identified over GATT in a
//! background task. [`stop_scanning`](BluetoothRepository::stop_scanning)
//! closes the window and persists one record per identified peer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use erouska_core::mock::{MemorySink, MockRadio, android_sighting};
//! use erouska_core::{BluetoothRepository, RepositoryOptions};
//! use erouska_types::Buid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let radio = Arc::new(MockRadio::new());
//!     let sink = Arc::new(MemorySink::new());
//!     let repo = BluetoothRepository::new(radio.clone(), sink.clone(), RepositoryOptions::default());
//!
//!     repo.start_scanning(true).await.unwrap();
//!     repo.on_scan_result(android_sighting("AA:BB:CC:DD:EE:FF", Buid::new([1; 10]), -60)).await;
//!     let summary = repo.stop_scanning().await;
//!
//!     assert_eq!(summary.persisted, 1);
//!     assert_eq!(sink.records().len(), 1);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use erouska_types::Buid;
use erouska_types::uuids::SERVICE_UUID;

use crate::advertisement::extract_buid;
use crate::error::Result;
use crate::gatt::{DEFAULT_GATT_TIMEOUT, read_remote_buid};
use crate::scan::{Sighting, SightingStream};
use crate::session::{IosSighting, ReadOutcome, SessionTable};
use crate::settings::{AdvertiseParams, AdvertiseSettings, ScanMode, ScanSettings};
use crate::traits::{BleRadio, RecordSink};

/// Options for the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Scan duty cycle.
    pub scan_mode: ScanMode,
    /// Advertising settings.
    pub advertise: AdvertiseSettings,
    /// Timeout of each GATT step when reading an iOS peer.
    pub gatt_timeout: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            scan_mode: ScanMode::default(),
            advertise: AdvertiseSettings::default(),
            gatt_timeout: DEFAULT_GATT_TIMEOUT,
        }
    }
}

impl RepositoryOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan mode.
    pub fn scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    /// Set the advertising settings.
    pub fn advertise(mut self, settings: AdvertiseSettings) -> Self {
        self.advertise = settings;
        self
    }

    /// Set the GATT step timeout.
    pub fn gatt_timeout(mut self, timeout: Duration) -> Self {
        self.gatt_timeout = timeout;
        self
    }
}

/// Result of closing a scan window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSummary {
    /// Records handed to the sink successfully.
    pub persisted: usize,
    /// Records the sink rejected.
    pub failed: usize,
    /// iOS peers dropped because their BUID was never read.
    pub unresolved: usize,
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scanning and advertising on top of a [`BleRadio`].
pub struct BluetoothRepository {
    radio: Arc<dyn BleRadio>,
    sink: Arc<dyn RecordSink>,
    options: RepositoryOptions,
    sessions: Mutex<SessionTable>,
    scanning: AtomicBool,
    advertising: AtomicBool,
    last_result: watch::Sender<Option<Instant>>,
    scan_task: StdMutex<Option<ScanTask>>,
    gatt_tasks: TaskTracker,
}

impl std::fmt::Debug for BluetoothRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluetoothRepository")
            .field("options", &self.options)
            .field("scanning", &self.is_scanning())
            .field("advertising", &self.is_advertising())
            .field("gatt_reads", &self.gatt_tasks.len())
            .finish()
    }
}

impl BluetoothRepository {
    /// Create a repository.
    pub fn new(
        radio: Arc<dyn BleRadio>,
        sink: Arc<dyn RecordSink>,
        options: RepositoryOptions,
    ) -> Arc<Self> {
        let (last_result, _) = watch::channel(None);
        Arc::new(Self {
            radio,
            sink,
            options,
            sessions: Mutex::new(SessionTable::new()),
            scanning: AtomicBool::new(false),
            advertising: AtomicBool::new(false),
            last_result,
            scan_task: StdMutex::new(None),
            gatt_tasks: TaskTracker::new(),
        })
    }

    /// Options in use.
    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    fn scan_task(&self) -> MutexGuard<'_, Option<ScanTask>> {
        self.scan_task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Observers ---

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Whether the radio is broadcasting.
    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    /// When the last scan result arrived, of any peer.
    pub fn last_scan_result_at(&self) -> Option<Instant> {
        *self.last_result.borrow()
    }

    /// Follow the time of the last scan result.
    pub fn subscribe_scan_results(&self) -> watch::Receiver<Option<Instant>> {
        self.last_result.subscribe()
    }

    /// Whether the platform can advertise.
    pub fn supports_advertising(&self) -> bool {
        self.radio.supports_advertising()
    }

    /// Whether the radio is powered on.
    pub async fn is_bluetooth_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    /// Number of peers identified in the current window.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    // --- Scanning ---

    /// Start a scan window.
    ///
    /// A running scan is stopped (and its window persisted) first. With
    /// `use_filter` the scan only reports peers advertising the eRouska
    /// service; without it the scan is unfiltered, because some stacks treat
    /// an empty filter as no filter at all. Does nothing when the radio is
    /// off.
    pub async fn start_scanning(self: &Arc<Self>, use_filter: bool) -> Result<()> {
        if self.is_scanning() {
            self.stop_scanning().await;
        }

        info!(
            "Starting BLE scanning {} filter",
            if use_filter { "with" } else { "without" }
        );

        if !self.radio.is_enabled().await {
            info!("Bluetooth disabled, can't start scanning");
            return Ok(());
        }

        let mut settings = ScanSettings::new().mode(self.options.scan_mode);
        if use_filter {
            settings = settings.filter_service(SERVICE_UUID);
        }
        debug!("Scan mode: {}", settings.mode);

        let stream = self.radio.start_scan(&settings).await?;
        self.scanning.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).consume(stream, cancel.clone()));
        if let Some(previous) = self.scan_task().replace(ScanTask { cancel, handle }) {
            previous.cancel.cancel();
        }
        Ok(())
    }

    async fn consume(self: Arc<Self>, mut stream: SightingStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(sighting)) => self.on_scan_result(sighting).await,
                    Some(Err(e)) => {
                        warn!("BLE scan failed: {}", e);
                        self.scanning.store(false, Ordering::SeqCst);
                        break;
                    }
                    None => {
                        debug!("BLE scan stream ended");
                        self.scanning.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
    }

    /// Process one sighting.
    pub async fn on_scan_result(self: &Arc<Self>, sighting: Sighting) {
        self.last_result.send_replace(Some(Instant::now()));

        if !sighting.advertises(&SERVICE_UUID) {
            return;
        }

        let Sighting {
            address,
            rssi,
            received_at,
            ..
        } = &sighting;

        match extract_buid(&sighting.payload) {
            Some(buid) => {
                let new = self
                    .sessions
                    .lock()
                    .await
                    .record_android(buid, address, *rssi, *received_at);
                if new {
                    debug!("Found new Android: {}", buid);
                }
                debug!("Device {} RSSI {}", buid, rssi);
            }
            None if sighting.is_apple() => {
                let (outcome, window) = {
                    let mut sessions = self.sessions.lock().await;
                    let outcome = sessions.record_ios(address, *rssi, *received_at);
                    (outcome, sessions.window())
                };
                match outcome {
                    IosSighting::New => {
                        debug!("Found new iOS device {}", address);
                        self.spawn_gatt_read(address.clone(), window);
                    }
                    IosSighting::Resolved(buid) => debug!("Device {} RSSI {}", buid, rssi),
                    IosSighting::Pending | IosSighting::Skipped => {}
                }
            }
            None => debug!("Ignoring {} without BUID", address),
        }
    }

    fn spawn_gatt_read(self: &Arc<Self>, address: String, window: u64) {
        let repo = Arc::clone(self);
        self.gatt_tasks.spawn(async move {
            let read =
                read_remote_buid(repo.radio.as_ref(), &address, repo.options.gatt_timeout).await;
            if let Err(e) = &read {
                warn!("Reading BUID of {} failed: {}", address, e);
            }

            let outcome = repo
                .sessions
                .lock()
                .await
                .finish_read(&address, window, read.ok());
            match outcome {
                ReadOutcome::Resolved(buid) => {
                    debug!("BUID {} found in characteristic of {}", buid, address)
                }
                ReadOutcome::Failed => {}
                ReadOutcome::Stale => {
                    debug!("Discarding BUID read of {} after its window closed", address)
                }
                ReadOutcome::Restart { window } => {
                    debug!("Reading BUID of {} again for the current window", address);
                    repo.spawn_gatt_read(address, window);
                }
            }
        });
    }

    /// Wait for GATT reads in flight to finish.
    pub async fn wait_for_gatt_reads(&self) {
        self.gatt_tasks.close();
        self.gatt_tasks.wait().await;
        self.gatt_tasks.reopen();
    }

    /// Close the scan window.
    ///
    /// Stops the scan, finalizes every identified session, hands each record
    /// to the sink and clears the window. A record the sink rejects is
    /// logged; the others are still persisted.
    pub async fn stop_scanning(&self) -> WindowSummary {
        self.scanning.store(false, Ordering::SeqCst);
        info!("Stopping BLE scanning");

        let task = self.scan_task().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Scan task ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }

        self.save_scans().await
    }

    async fn save_scans(&self) -> WindowSummary {
        debug!("Saving data to database");
        let drained = self.sessions.lock().await.drain();

        let mut summary = WindowSummary {
            unresolved: drained.unresolved,
            ..WindowSummary::default()
        };
        for record in &drained.records {
            debug!("Saving: {}", record);
            match self.sink.persist(record).await {
                Ok(()) => summary.persisted += 1,
                Err(e) => {
                    warn!("Failed to save record of {}: {}", record.buid, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.unresolved > 0 {
            debug!("{} iOS devices were not identified", summary.unresolved);
        }
        info!("{} records saved", summary.persisted);
        summary
    }

    // --- Advertising ---

    /// Broadcast the eRouska service with `buid` as its service data.
    ///
    /// A running advertisement is restarted. Does nothing when the radio is
    /// off.
    pub async fn start_advertising(&self, buid: Buid) -> Result<()> {
        if self.is_advertising() {
            self.stop_advertising().await;
        }

        if !self.radio.is_enabled().await {
            info!("Bluetooth disabled, can't start advertising");
            return Ok(());
        }

        let settings = self.options.advertise;
        info!(
            "Starting BLE advertising with power {:?} ({} dBm)",
            settings.tx_power,
            settings.tx_power.dbm()
        );

        let params = AdvertiseParams::new(SERVICE_UUID, buid.as_bytes().to_vec(), settings)?;
        match self.radio.start_advertising(&params).await {
            Ok(()) => {
                self.advertising.store(true, Ordering::SeqCst);
                debug!("BLE advertising started");
                Ok(())
            }
            Err(e) => {
                self.advertising.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop broadcasting.
    pub async fn stop_advertising(&self) {
        info!("Stopping BLE advertising");
        self.advertising.store(false, Ordering::SeqCst);
        if let Err(e) = self.radio.stop_advertising().await {
            warn!("Failed to stop BLE advertising: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{GattScript, MemorySink, MockRadio, android_sighting, ios_sighting};
    use crate::scan::Sighting;
    use std::collections::HashMap;

    fn setup() -> (Arc<MockRadio>, Arc<MemorySink>, Arc<BluetoothRepository>) {
        let radio = Arc::new(MockRadio::new());
        let sink = Arc::new(MemorySink::new());
        let repo = BluetoothRepository::new(radio.clone(), sink.clone(), RepositoryOptions::new());
        (radio, sink, repo)
    }

    fn buid(n: u8) -> Buid {
        Buid::new([n; 10])
    }

    /// Let the scan task drain the stream.
    async fn flush() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_filter_flag_selects_scan_filter() {
        let (radio, _, repo) = setup();

        repo.start_scanning(true).await.unwrap();
        repo.start_scanning(false).await.unwrap();

        let scans = radio.scans();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].service_filter, Some(SERVICE_UUID));
        assert_eq!(scans[1].service_filter, None);
        assert_eq!(scans[0].mode, ScanMode::Balanced);
        // restart stopped the first scan
        assert_eq!(radio.scan_stop_count(), 1);
        assert!(repo.is_scanning());
    }

    #[tokio::test]
    async fn test_disabled_radio_does_not_scan() {
        let (radio, _, repo) = setup();
        radio.set_enabled(false);

        repo.start_scanning(true).await.unwrap();
        assert!(!repo.is_scanning());
        assert!(radio.scans().is_empty());
    }

    #[tokio::test]
    async fn test_stream_sightings_are_aggregated() {
        let (radio, sink, repo) = setup();
        repo.start_scanning(true).await.unwrap();

        for rssi in [-70, -65, -80] {
            assert!(radio.emit(android_sighting("AA", buid(1), rssi)));
        }
        flush().await;
        assert_eq!(repo.session_count().await, 1);
        assert!(repo.last_scan_result_at().is_some());

        let summary = repo.stop_scanning().await;
        assert_eq!(summary.persisted, 1);
        assert!(!repo.is_scanning());
        assert!(!radio.is_scanning());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].buid, buid(1));
        assert_eq!(records[0].max_rssi, -65);
        assert_eq!(records[0].med_rssi, -70);
        assert_eq!(records[0].rssi_count, 3);
    }

    #[tokio::test]
    async fn test_window_is_cleared_after_stop() {
        let (_, sink, repo) = setup();
        repo.start_scanning(true).await.unwrap();
        repo.on_scan_result(android_sighting("AA", buid(1), -70)).await;
        repo.stop_scanning().await;

        repo.start_scanning(true).await.unwrap();
        repo.on_scan_result(android_sighting("AA", buid(1), -60)).await;
        repo.stop_scanning().await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].rssi_count, 1);
        assert_eq!(records[1].max_rssi, -60);
    }

    #[tokio::test]
    async fn test_foreign_advertisements_are_ignored() {
        let (_, sink, repo) = setup();
        let other = Sighting::from_advertisement(
            "XX",
            -40,
            vec![uuid::Uuid::from_u128(42)],
            &HashMap::new(),
            HashMap::new(),
        );
        repo.on_scan_result(other).await;
        // still counts as a scan result
        assert!(repo.last_scan_result_at().is_some());
        assert_eq!(repo.session_count().await, 0);

        repo.stop_scanning().await;
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_zero_buid_is_never_persisted() {
        let (_, sink, repo) = setup();
        repo.on_scan_result(android_sighting("AA", Buid::ZERO, -70)).await;
        assert_eq!(repo.session_count().await, 0);
        repo.stop_scanning().await;
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_ios_peer_resolved_over_gatt() {
        let (radio, sink, repo) = setup();
        radio.script_peer("IOS", GattScript::Value(buid(9).as_bytes().to_vec()));

        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        repo.on_scan_result(ios_sighting("IOS", -72)).await;
        repo.wait_for_gatt_reads().await;
        repo.on_scan_result(ios_sighting("IOS", -70)).await;

        // one connection per peer per window
        assert_eq!(radio.connects(), vec!["IOS"]);
        assert_eq!(radio.open_connections(), 0);

        repo.stop_scanning().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].buid, buid(9));
        assert_eq!(records[0].rssi_count, 3);
    }

    #[tokio::test]
    async fn test_failed_gatt_read_skips_peer() {
        let (radio, sink, repo) = setup();
        radio.script_peer("IOS", GattScript::MissingCharacteristic);

        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        repo.wait_for_gatt_reads().await;
        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        repo.wait_for_gatt_reads().await;

        assert_eq!(radio.connects().len(), 1);
        assert_eq!(radio.disconnects().len(), 1);

        let summary = repo.stop_scanning().await;
        assert_eq!(summary, WindowSummary::default());
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_ios_session_is_dropped() {
        let (radio, sink, repo) = setup();
        radio.script_peer("IOS", GattScript::Value(buid(9).as_bytes().to_vec()));
        radio.set_gatt_latency(Duration::from_secs(60));

        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        let summary = repo.stop_scanning().await;
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.persisted, 0);
        assert!(sink.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failed_read_does_not_skip_peer_next_window() {
        let (radio, sink, repo) = setup();
        radio.script_peer("IOS", GattScript::ConnectFails);
        radio.set_gatt_latency(Duration::from_secs(5));

        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        let summary = repo.stop_scanning().await;
        assert_eq!(summary.unresolved, 1);

        // next window, the first read still connecting
        repo.on_scan_result(ios_sighting("IOS", -70)).await;
        assert_eq!(radio.connects(), vec!["IOS"]);

        // the first read fails at 5 s and a new one starts, answering at 10 s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(radio.connects(), vec!["IOS", "IOS"]);
        radio.script_peer("IOS", GattScript::Value(buid(9).as_bytes().to_vec()));

        repo.wait_for_gatt_reads().await;
        repo.on_scan_result(ios_sighting("IOS", -68)).await;
        assert_eq!(radio.open_connections(), 0);

        repo.stop_scanning().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].buid, buid(9));
        assert_eq!(records[0].rssi_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_read_is_discarded() {
        let (radio, sink, repo) = setup();
        radio.script_peer("IOS", GattScript::Value(buid(9).as_bytes().to_vec()));
        radio.set_gatt_latency(Duration::from_secs(5));

        repo.on_scan_result(ios_sighting("IOS", -75)).await;
        repo.stop_scanning().await;
        repo.wait_for_gatt_reads().await;

        assert_eq!(repo.session_count().await, 0);
        repo.stop_scanning().await;
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_block_others() {
        let (_, sink, repo) = setup();
        sink.reject(buid(2));

        for n in 1..=3 {
            repo.on_scan_result(android_sighting("AA", buid(n), -70)).await;
        }
        let summary = repo.stop_scanning().await;

        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.failed, 1);
        let saved: Vec<_> = sink.records().into_iter().map(|r| r.buid).collect();
        assert!(saved.contains(&buid(1)));
        assert!(saved.contains(&buid(3)));
    }

    #[tokio::test]
    async fn test_scan_stream_error_marks_stopped() {
        let (radio, _, repo) = setup();
        repo.start_scanning(true).await.unwrap();
        assert!(repo.is_scanning());

        radio.fail_stream("adapter reset");
        flush().await;
        assert!(!repo.is_scanning());
    }

    #[tokio::test]
    async fn test_advertising() {
        let (radio, _, repo) = setup();
        assert!(repo.supports_advertising());

        repo.start_advertising(buid(4)).await.unwrap();
        assert!(repo.is_advertising());
        let params = radio.advertising().unwrap();
        assert_eq!(params.service_uuid, SERVICE_UUID);
        assert_eq!(params.service_data, buid(4).as_bytes().to_vec());
        assert!(params.settings.connectable);

        // restart replaces the advertisement
        repo.start_advertising(buid(5)).await.unwrap();
        assert_eq!(radio.advertise_start_count(), 2);
        assert_eq!(radio.advertising().unwrap().service_data, vec![5; 10]);

        repo.stop_advertising().await;
        assert!(!repo.is_advertising());
        assert_eq!(radio.advertising(), None);
    }

    #[tokio::test]
    async fn test_advertising_with_radio_off_or_failing() {
        let (radio, _, repo) = setup();
        radio.set_enabled(false);
        repo.start_advertising(buid(4)).await.unwrap();
        assert!(!repo.is_advertising());

        radio.set_enabled(true);
        radio.set_fail_advertise(true);
        assert!(repo.start_advertising(buid(4)).await.is_err());
        assert!(!repo.is_advertising());
    }
}
