//! Screen-off scan watchdog.
//!
//! Some platforms silently stop delivering results of an unfiltered scan
//! once the screen turns off. When the screen goes off the watchdog polls
//! the time of the last scan result. A result arriving after the switch-off
//! (plus a small tolerance) proves scanning still works. If none arrives
//! before the check expires, the escalation runs once: the caller latches
//! the scan filter on and restarts scanning.
//!
//! ```text
//! screen off ──► poll every 10 s ──► result newer than off + 1 s? ──► done
//!                     │
//!                     └── 30 s without one ──► escalate (once)
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timing of a screen-off check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogOptions {
    /// How long to wait for a scan result before escalating.
    pub duration: Duration,
    /// How often to look at the time of the last scan result.
    pub interval: Duration,
    /// Results this close to the switch-off instant do not count.
    pub tolerance: Duration,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            tolerance: Duration::from_secs(1),
        }
    }
}

impl WatchdogOptions {
    /// Create options with default timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the check duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the poll interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the tolerance after switch-off.
    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// How a screen-off check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// A scan result arrived after switch-off.
    ScanningWorks,
    /// No result arrived; the escalation ran.
    Escalated,
    /// The check was cancelled.
    Cancelled,
}

struct PendingCheck {
    cancel: CancellationToken,
    handle: JoinHandle<WatchdogOutcome>,
}

/// Watches scanning after the screen turns off.
pub struct ScreenOffWatchdog {
    options: WatchdogOptions,
    pending: Mutex<Option<PendingCheck>>,
    escalations: Arc<AtomicU32>,
}

impl std::fmt::Debug for ScreenOffWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenOffWatchdog")
            .field("options", &self.options)
            .field("armed", &self.is_armed())
            .field("escalations", &self.escalations())
            .finish()
    }
}

impl ScreenOffWatchdog {
    /// Create a watchdog.
    pub fn new(options: WatchdogOptions) -> Self {
        Self {
            options,
            pending: Mutex::new(None),
            escalations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Timings in use.
    pub fn options(&self) -> &WatchdogOptions {
        &self.options
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingCheck>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a check for a screen-off event happening now.
    ///
    /// `last_result` carries the time of the last scan result. `escalate`
    /// runs at most once, when the check expires without a newer result.
    /// A check already pending is replaced.
    pub fn arm<F>(&self, last_result: watch::Receiver<Option<Instant>>, escalate: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let switched_off = Instant::now();
        let cancel = CancellationToken::new();
        let options = self.options;
        let escalations = Arc::clone(&self.escalations);

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome =
                run_check(options, switched_off, last_result, token, escalate).await;
            if outcome == WatchdogOutcome::Escalated {
                escalations.fetch_add(1, Ordering::SeqCst);
            }
            outcome
        });

        let previous = self.pending().replace(PendingCheck { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        debug!("Screen-off check armed");
    }

    /// Cancel a pending check.
    pub fn cancel(&self) {
        if let Some(pending) = self.pending().take()
            && !pending.handle.is_finished()
        {
            pending.cancel.cancel();
            debug!("Screen-off check cancelled");
        }
    }

    /// Whether a check is running.
    pub fn is_armed(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished() && !p.cancel.is_cancelled())
    }

    /// Number of checks that escalated.
    pub fn escalations(&self) -> u32 {
        self.escalations.load(Ordering::SeqCst)
    }
}

impl Drop for ScreenOffWatchdog {
    fn drop(&mut self) {
        if let Some(pending) = self.pending().take() {
            pending.cancel.cancel();
        }
    }
}

async fn run_check<F>(
    options: WatchdogOptions,
    switched_off: Instant,
    last_result: watch::Receiver<Option<Instant>>,
    cancel: CancellationToken,
    escalate: F,
) -> WatchdogOutcome
where
    F: Future<Output = ()> + Send,
{
    let threshold = switched_off + options.tolerance;
    let deadline = switched_off + options.duration;
    let scanning_works = || last_result.borrow().is_some_and(|at| at > threshold);

    loop {
        if scanning_works() {
            debug!("Scan results keep arriving with the screen off");
            return WatchdogOutcome::ScanningWorks;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wait = options.interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return WatchdogOutcome::Cancelled,
            _ = sleep(wait) => {}
        }
    }

    info!(
        "No scan results for {:?} after screen off, restarting scan with filter",
        options.duration
    );
    escalate.await;
    WatchdogOutcome::Escalated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn escalation_flag() -> (Arc<AtomicBool>, impl Future<Output = ()> + Send + 'static) {
        let flag = Arc::new(AtomicBool::new(false));
        let set = Arc::clone(&flag);
        (flag, async move {
            set.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_once_without_results() {
        let (_tx, rx) = watch::channel(None);
        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (flag, escalate) = escalation_flag();

        watchdog.arm(rx, escalate);
        assert!(watchdog.is_armed());

        sleep(Duration::from_secs(29)).await;
        assert!(!flag.load(Ordering::SeqCst));

        sleep(Duration::from_secs(2)).await;
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(watchdog.escalations(), 1);
        assert!(!watchdog.is_armed());

        sleep(Duration::from_secs(120)).await;
        assert_eq!(watchdog.escalations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_switch_off_ends_check() {
        let (tx, rx) = watch::channel(None);
        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (flag, escalate) = escalation_flag();

        watchdog.arm(rx, escalate);
        sleep(Duration::from_secs(5)).await;
        tx.send_replace(Some(Instant::now()));

        sleep(Duration::from_secs(60)).await;
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(watchdog.escalations(), 0);
        assert!(!watchdog.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_within_tolerance_does_not_count() {
        let (tx, rx) = watch::channel(None);
        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (flag, escalate) = escalation_flag();

        watchdog.arm(rx, escalate);
        tx.send_replace(Some(Instant::now() + Duration::from_millis(500)));

        sleep(Duration::from_secs(31)).await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_result_before_switch_off() {
        let (tx, rx) = watch::channel(None);
        tx.send_replace(Some(Instant::now()));
        sleep(Duration::from_secs(10)).await;

        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (flag, escalate) = escalation_flag();
        watchdog.arm(rx, escalate);

        sleep(Duration::from_secs(31)).await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_escalation() {
        let (_tx, rx) = watch::channel(None);
        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (flag, escalate) = escalation_flag();

        watchdog.arm(rx, escalate);
        sleep(Duration::from_secs(15)).await;
        watchdog.cancel();
        assert!(!watchdog.is_armed());

        sleep(Duration::from_secs(60)).await;
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(watchdog.escalations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_check() {
        let (_tx, rx) = watch::channel(None);
        let watchdog = ScreenOffWatchdog::new(WatchdogOptions::default());
        let (first, escalate_first) = escalation_flag();
        let (second, escalate_second) = escalation_flag();

        watchdog.arm(rx.clone(), escalate_first);
        sleep(Duration::from_secs(20)).await;
        watchdog.arm(rx, escalate_second);

        sleep(Duration::from_secs(20)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));

        sleep(Duration::from_secs(11)).await;
        assert!(second.load(Ordering::SeqCst));
        assert_eq!(watchdog.escalations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timings() {
        let (_tx, rx) = watch::channel(None);
        let options = WatchdogOptions::new()
            .duration(Duration::from_secs(4))
            .interval(Duration::from_secs(1))
            .tolerance(Duration::from_millis(100));
        let watchdog = ScreenOffWatchdog::new(options);
        let (flag, escalate) = escalation_flag();

        watchdog.arm(rx, escalate);
        sleep(Duration::from_secs(5)).await;
        assert!(flag.load(Ordering::SeqCst));
    }
}
