//! Turning system events into service commands.
//!
//! | Source | Command |
//! |--------|---------|
//! | Bluetooth power, location, battery saver changes (polled) | `Update` |
//! | `screen-off` / `screen-on` on standard input | `ScreenStateChange` |
//! | `start`, `stop`, `update` on standard input | the same command |
//! | Ctrl-C | `Stop` |

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use erouska_core::BluetoothRepository;

use crate::service::{ScreenState, ServiceCommand};
use crate::state::{SystemMonitor, SystemState};

/// Linux platform power profile.
pub const PLATFORM_PROFILE_PATH: &str = "/sys/firmware/acpi/platform_profile";

/// Whether the power profile at `path` is the low-power one.
pub async fn read_power_save(path: &Path) -> std::io::Result<bool> {
    let profile = tokio::fs::read_to_string(path).await?;
    Ok(profile.trim() == "low-power")
}

/// Parse one line of the control channel.
pub fn parse_control_line(line: &str) -> Option<ServiceCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "start" => Some(ServiceCommand::Start),
        "stop" => Some(ServiceCommand::Stop),
        "update" => Some(ServiceCommand::Update),
        "screen-off" | "screen_off" | "off" => {
            Some(ServiceCommand::ScreenStateChange(ScreenState::Off))
        }
        "screen-on" | "screen_on" | "on" => Some(ServiceCommand::ScreenStateChange(ScreenState::On)),
        _ => None,
    }
}

/// Poll Bluetooth, location and battery saver, sending `Update` on every
/// change.
pub fn spawn_state_poller(
    repo: Arc<BluetoothRepository>,
    monitor: Arc<dyn SystemMonitor>,
    poll: Duration,
    commands: mpsc::Sender<ServiceCommand>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = read_state(&repo, monitor.as_ref()).await;
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let state = read_state(&repo, monitor.as_ref()).await;
            if state == last {
                continue;
            }
            info!(
                "System state changed: bluetooth {}, location {}, power save {}",
                state.bluetooth_enabled, state.location_enabled, state.power_save
            );
            last = state;
            if commands.send(ServiceCommand::Update).await.is_err() {
                break;
            }
        }
        debug!("State poller stopped");
    })
}

async fn read_state(repo: &BluetoothRepository, monitor: &dyn SystemMonitor) -> SystemState {
    SystemState::read(repo.is_bluetooth_enabled().await, monitor).await
}

/// Read commands from standard input, one per line.
///
/// Runs on its own thread: a blocking read of standard input cannot be
/// cancelled and must not hold up runtime shutdown.
pub fn spawn_stdin_control(commands: mpsc::Sender<ServiceCommand>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read standard input: {}", e);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_control_line(&line) {
                Some(command) => {
                    if commands.blocking_send(command).is_err() {
                        return;
                    }
                }
                None => warn!("Unknown control command: {}", line.trim()),
            }
        }
        debug!("Standard input closed");
    })
}

/// Send `Stop` on Ctrl-C.
pub fn spawn_ctrl_c(
    commands: mpsc::Sender<ServiceCommand>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupted, stopping");
                    let _ = commands.send(ServiceCommand::Stop).await;
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            },
        }
    })
}
