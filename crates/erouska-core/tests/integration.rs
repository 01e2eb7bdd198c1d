//! Integration tests for erouska-core
//!
//! These run the repository and the screen-off watchdog against the mock
//! radio, with tokio's clock paused so scan windows take no real time.

use std::sync::Arc;
use std::time::Duration;

use erouska_core::mock::{GattScript, MemorySink, MockRadio, android_sighting, ios_sighting};
use erouska_core::uuids::SERVICE_UUID;
use erouska_core::{
    BluetoothRepository, Buid, RepositoryOptions, ScreenOffWatchdog, WatchdogOptions,
};
use tokio::time::sleep;

fn setup() -> (Arc<MockRadio>, Arc<MemorySink>, Arc<BluetoothRepository>) {
    let radio = Arc::new(MockRadio::new());
    let sink = Arc::new(MemorySink::new());
    let repo = BluetoothRepository::new(radio.clone(), sink.clone(), RepositoryOptions::default());
    (radio, sink, repo)
}

fn escalation(repo: &Arc<BluetoothRepository>) -> impl std::future::Future<Output = ()> + Send + 'static {
    let repo = Arc::clone(repo);
    async move {
        let _ = repo.start_scanning(true).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_peers_in_one_window() {
    let (radio, sink, repo) = setup();
    radio.script_peer("IOS-1", GattScript::Value(vec![0x11; 10]));
    radio.script_peer("IOS-2", GattScript::ReadFails);

    repo.start_scanning(true).await.unwrap();
    let android = Buid::new([0x22; 10]);

    for second in 0..10u64 {
        radio.emit(android_sighting("AA:00", android, -60 - second as i16));
        radio.emit(ios_sighting("IOS-1", -70));
        radio.emit(ios_sighting("IOS-2", -80));
        sleep(Duration::from_secs(1)).await;
    }
    repo.wait_for_gatt_reads().await;

    let summary = repo.stop_scanning().await;
    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.failed, 0);

    let records = sink.records();
    let android_record = records.iter().find(|r| r.buid == android).unwrap();
    assert_eq!(android_record.rssi_count, 10);
    assert_eq!(android_record.max_rssi, -60);

    let ios_record = records.iter().find(|r| r.buid == Buid::new([0x11; 10])).unwrap();
    assert_eq!(ios_record.rssi_count, 10);

    // every GATT connection was closed, one per iOS peer
    assert_eq!(radio.connects().len(), 2);
    assert_eq!(radio.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_screen_off_without_results_restarts_filtered_once() {
    let (radio, _, repo) = setup();
    let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());

    repo.start_scanning(false).await.unwrap();
    assert_eq!(radio.scans()[0].service_filter, None);

    watchdog.arm(repo.subscribe_scan_results(), escalation(&repo));
    sleep(Duration::from_secs(45)).await;

    let scans = radio.scans();
    assert_eq!(scans.len(), 2);
    assert_eq!(scans[1].service_filter, Some(SERVICE_UUID));
    assert_eq!(watchdog.escalations(), 1);
    assert!(repo.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_screen_off_with_results_keeps_unfiltered_scan() {
    let (radio, _, repo) = setup();
    let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());

    repo.start_scanning(false).await.unwrap();
    watchdog.arm(repo.subscribe_scan_results(), escalation(&repo));

    sleep(Duration::from_secs(3)).await;
    radio.emit(android_sighting("AA:00", Buid::new([1; 10]), -70));
    sleep(Duration::from_secs(60)).await;

    assert_eq!(radio.scans().len(), 1);
    assert_eq!(watchdog.escalations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_persists_partial_window() {
    let (radio, sink, repo) = setup();
    let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());

    repo.start_scanning(false).await.unwrap();
    repo.on_scan_result(android_sighting("AA:00", Buid::new([1; 10]), -70))
        .await;
    watchdog.arm(repo.subscribe_scan_results(), escalation(&repo));

    // the sighting predates the switch-off, so the check still escalates
    sleep(Duration::from_secs(31)).await;
    assert_eq!(watchdog.escalations(), 1);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(radio.scans().len(), 2);
}
