//! The foreground proximity service.
//!
//! [`CovidService`] runs two loops while its "mask" is on:
//!
//! - **Advertise loop**: broadcast this device's BUID, restarting the
//!   advertisement every `advertise_restart`, for as long as Bluetooth is on.
//! - **Scan loop**: open a scan window for `collection`, close it (persisting
//!   one record per peer), idle for `waiting`, repeat, for as long as
//!   Bluetooth and location are available.
//!
//! Commands arrive on a channel (see [`ServiceCommand`]). Errors never stop
//! the service; they are logged and the loops keep cycling.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use erouska_core::{BluetoothRepository, Buid, ScreenOffWatchdog, WatchdogOptions};

use crate::config::Config;
use crate::sink::StoreSink;
use crate::state::{ServiceStatus, SystemMonitor, SystemState};

/// Screen power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    /// Screen turned on.
    On,
    /// Screen turned off.
    Off,
}

/// Commands understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Turn the mask on.
    Start,
    /// Close the scan window, turn the mask off and exit.
    Stop,
    /// Re-evaluate Bluetooth, location and battery saver.
    Update,
    /// The screen turned on or off.
    ScreenStateChange(ScreenState),
}

/// Loop timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Length of a scan window.
    pub collection: Duration,
    /// Idle time between scan windows.
    pub waiting: Duration,
    /// Advertising restart period.
    pub advertise_restart: Duration,
    /// Initial value of the scan filter latch.
    pub use_scan_filter: bool,
    /// Screen-off watchdog timings.
    pub watchdog: WatchdogOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServiceOptions {
    /// Timings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.scanning.collection(),
            waiting: config.scanning.waiting(),
            advertise_restart: config.advertising.restart(),
            use_scan_filter: config.scanning.use_scan_filter,
            watchdog: config.watchdog_options(),
        }
    }
}

struct Mask {
    cancel: CancellationToken,
    advertise: JoinHandle<()>,
    scan: JoinHandle<()>,
}

/// Advertises this device and scans for peers in cycles.
pub struct CovidService {
    repo: Arc<BluetoothRepository>,
    monitor: Arc<dyn SystemMonitor>,
    options: ServiceOptions,
    buid: Buid,
    watchdog: ScreenOffWatchdog,
    use_scan_filter: AtomicBool,
    mask: Mutex<Option<Mask>>,
    retention: Option<StoreSink>,
    status: watch::Sender<ServiceStatus>,
}

impl std::fmt::Debug for CovidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CovidService")
            .field("buid", &self.buid)
            .field("options", &self.options)
            .field("mask_on", &self.is_mask_on())
            .field("use_scan_filter", &self.use_scan_filter())
            .finish()
    }
}

impl CovidService {
    /// Create a service advertising `buid`.
    pub fn new(
        repo: Arc<BluetoothRepository>,
        monitor: Arc<dyn SystemMonitor>,
        buid: Buid,
        options: ServiceOptions,
    ) -> Self {
        let (status, _) = watch::channel(ServiceStatus {
            use_scan_filter: options.use_scan_filter,
            ..ServiceStatus::default()
        });
        Self {
            repo,
            monitor,
            buid,
            watchdog: ScreenOffWatchdog::new(options.watchdog),
            use_scan_filter: AtomicBool::new(options.use_scan_filter),
            options,
            mask: Mutex::new(None),
            retention: None,
            status,
        }
    }

    /// Prune old records through `sink` at start and after each window.
    pub fn with_retention(mut self, sink: StoreSink) -> Self {
        self.retention = Some(sink);
        self
    }

    fn mask(&self) -> MutexGuard<'_, Option<Mask>> {
        self.mask.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// BUID this device advertises.
    pub fn buid(&self) -> Buid {
        self.buid
    }

    /// The Bluetooth repository.
    pub fn repository(&self) -> &Arc<BluetoothRepository> {
        &self.repo
    }

    /// The screen-off watchdog.
    pub fn watchdog(&self) -> &ScreenOffWatchdog {
        &self.watchdog
    }

    /// Whether the loops are turned on.
    pub fn is_mask_on(&self) -> bool {
        self.mask().is_some()
    }

    /// Whether scans use the service filter.
    pub fn use_scan_filter(&self) -> bool {
        self.use_scan_filter.load(Ordering::SeqCst)
    }

    /// Latest published status.
    pub fn status(&self) -> ServiceStatus {
        *self.status.borrow()
    }

    /// Follow status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    /// Process commands until `Stop` or until every sender is gone.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<ServiceCommand>) {
        while let Some(command) = commands.recv().await {
            if self.handle(command).await.is_break() {
                return;
            }
        }
        info!("Command channel closed");
        let _ = self.handle(ServiceCommand::Stop).await;
    }

    /// Process one command. Breaks after `Stop`.
    pub async fn handle(self: &Arc<Self>, command: ServiceCommand) -> ControlFlow<()> {
        debug!("Command: {:?}", command);
        match command {
            ServiceCommand::Start => {
                info!("Starting eRouska service, BUID {}", self.buid);
                self.prune().await;
                self.turn_mask_on().await;
            }
            ServiceCommand::Stop => {
                info!("Stopping eRouska service");
                self.watchdog.cancel();
                self.turn_mask_off().await;
                self.publish_status().await;
                return ControlFlow::Break(());
            }
            ServiceCommand::Update => {
                let state = self.system_state().await;
                if state.can_run() {
                    self.turn_mask_on().await;
                } else {
                    info!(
                        "Bluetooth {}, location {}: turning mask off",
                        on_off(state.bluetooth_enabled),
                        on_off(state.location_available())
                    );
                    self.turn_mask_off().await;
                }
            }
            ServiceCommand::ScreenStateChange(ScreenState::Off) => {
                debug!("Screen state change: off");
                self.start_screen_off_check();
            }
            ServiceCommand::ScreenStateChange(ScreenState::On) => {
                debug!("Screen state change: on");
                self.watchdog.cancel();
            }
        }
        self.publish_status().await;
        ControlFlow::Continue(())
    }

    async fn system_state(&self) -> SystemState {
        let bluetooth = self.repo.is_bluetooth_enabled().await;
        SystemState::read(bluetooth, self.monitor.as_ref()).await
    }

    async fn publish_status(&self) {
        let state = self.system_state().await;
        let status = ServiceStatus {
            bluetooth_enabled: state.bluetooth_enabled,
            location_enabled: state.location_enabled,
            battery_saver_restricts_location: state.battery_saver_restricts_location,
            mask_on: self.is_mask_on(),
            scanning: self.repo.is_scanning(),
            advertising: self.repo.is_advertising(),
            use_scan_filter: self.use_scan_filter(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn prune(&self) {
        if let Some(sink) = &self.retention
            && let Err(e) = sink.prune().await
        {
            warn!("Failed to delete old scan results: {}", e);
        }
    }

    // --- Mask ---

    async fn turn_mask_on(self: &Arc<Self>) {
        if self.stop_loops().await {
            debug!("Restarting service loops");
        }

        let cancel = CancellationToken::new();
        let advertise = tokio::spawn(Arc::clone(self).advertise_loop(cancel.child_token()));
        let scan = tokio::spawn(Arc::clone(self).scan_loop(cancel.child_token()));
        *self.mask() = Some(Mask {
            cancel,
            advertise,
            scan,
        });
    }

    async fn turn_mask_off(&self) {
        self.stop_loops().await;
        self.repo.stop_scanning().await;
        self.repo.stop_advertising().await;
    }

    /// Cancel the loops and wait for them. Returns whether any were running.
    async fn stop_loops(&self) -> bool {
        let Some(mask) = self.mask().take() else {
            return false;
        };
        mask.cancel.cancel();
        for handle in [mask.advertise, mask.scan] {
            if let Err(e) = handle.await {
                error!("Service loop ended abnormally: {}", e);
            }
        }
        true
    }

    // --- Loops ---

    async fn advertise_loop(self: Arc<Self>, cancel: CancellationToken) {
        if !self.repo.supports_advertising() {
            info!("Advertising not supported on this platform, scanning only");
            return;
        }

        let mut consecutive_failures = 0u32;
        while !cancel.is_cancelled() {
            if !self.repo.is_bluetooth_enabled().await {
                info!("Bluetooth disabled, advertise loop ended");
                break;
            }

            match self.repo.start_advertising(self.buid).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) if e.is_radio_unavailable() => {
                    info!("{}, advertise loop ended", e);
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log_failure("start advertising", &e, consecutive_failures);
                }
            }
            self.publish_status().await;

            if !sleep_unless_cancelled(&cancel, self.options.advertise_restart).await {
                break;
            }
            self.repo.stop_advertising().await;
            debug!("Restarting BLE advertising");
        }
    }

    async fn scan_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut consecutive_failures = 0u32;
        while !cancel.is_cancelled() {
            let state = self.system_state().await;
            if !state.bluetooth_enabled || !state.location_available() {
                info!("Bluetooth or location unavailable, scan loop ended");
                break;
            }

            match self.repo.start_scanning(self.use_scan_filter()).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) if e.is_radio_unavailable() => {
                    info!("{}, scan loop ended", e);
                    self.publish_status().await;
                    break;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    log_failure("start scanning", &e, consecutive_failures);
                }
            }
            self.publish_status().await;

            if !sleep_unless_cancelled(&cancel, self.options.collection).await {
                break;
            }
            let summary = self.repo.stop_scanning().await;
            self.watchdog.cancel();
            if summary.failed > 0 {
                warn!("{} scan results could not be saved", summary.failed);
            }
            self.prune().await;
            self.publish_status().await;

            if !sleep_unless_cancelled(&cancel, self.options.waiting).await {
                break;
            }
            debug!("Restarting BLE scanning");
        }
    }

    // --- Screen-off watchdog ---

    fn start_screen_off_check(self: &Arc<Self>) {
        let service = Arc::downgrade(self);
        self.watchdog
            .arm(self.repo.subscribe_scan_results(), async move {
                let Some(service) = service.upgrade() else {
                    return;
                };
                service.use_scan_filter.store(true, Ordering::SeqCst);
                if service.is_mask_on() {
                    if let Err(e) = service.repo.start_scanning(true).await {
                        warn!("Failed to restart scanning with filter: {}", e);
                    }
                } else {
                    debug!("Mask is off, filter applies from the next start");
                }
                service.publish_status().await;
            });
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

fn log_failure(operation: &str, error: &erouska_core::Error, consecutive_failures: u32) {
    if consecutive_failures <= 3 {
        warn!(
            "Failed to {}: {} (attempt {})",
            operation, error, consecutive_failures
        );
    } else if consecutive_failures == 4 {
        error!(
            "Failed to {} after {} attempts, will continue trying silently",
            operation, consecutive_failures
        );
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
