//! Sync scheduler - turns local edits and a periodic timer into sync requests
//!
//! The [`SyncScheduler`] sits between the reminder service and the
//! [`SyncEngine`](super::engine::SyncEngine). Every local mutation sends a
//! wake over a channel; the scheduler waits for the burst of edits to go
//! quiet, then raises a shared flag that tells the sync runner to start a
//! cycle. A periodic timer raises the same flag so pulls happen even when
//! the device is idle.
//!
//! ## Flow
//!
//! ```text
//! ReminderService ──→ mpsc::Receiver<()> ──→ SyncScheduler ──→ sync_requested flag
//!                                                 │
//!                                          debounce window
//! ```
//!
//! The scheduler also supports user-initiated sync requests that bypass
//! the debounce window entirely, useful for "sync now" commands.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ============================================================================
// SyncScheduler struct
// ============================================================================

/// Schedules sync cycles from local edit wakes and a periodic interval
///
/// Consumes wake signals from a channel, debounces them, and sets a
/// shared atomic flag when a sync cycle should start. The runner polls
/// the flag, clears it, and calls the engine.
///
/// ## Priority / User-Initiated Sync
///
/// Calling [`request_sync()`](SyncScheduler::request_sync) sets the
/// `sync_requested` flag immediately, bypassing the debounce window.
/// This allows a "sync now" command to trigger an immediate cycle.
pub struct SyncScheduler {
    /// Receiver for edit wakes from the reminder service
    edit_rx: mpsc::Receiver<()>,
    /// How long the edit channel must be quiet before requesting a sync
    debounce: Duration,
    /// Interval between periodic sync requests while idle
    interval: Duration,
    /// Shared flag indicating that a sync cycle should start
    sync_requested: Arc<AtomicBool>,
    /// Shutdown signal shared with the daemon
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// Creates a new `SyncScheduler`
    ///
    /// # Arguments
    /// * `edit_rx` - Channel receiver for edit wakes from the service
    /// * `debounce` - How long edits must be quiet before triggering sync
    /// * `interval` - Period of the idle sync timer
    /// * `cancel` - Token that stops the scheduler loop
    ///
    /// # Returns
    /// A tuple of `(SyncScheduler, Arc<AtomicBool>)`. The `AtomicBool` is
    /// set to `true` whenever the sync engine should run a cycle.
    pub fn new(
        edit_rx: mpsc::Receiver<()>,
        debounce: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, Arc<AtomicBool>) {
        let sync_requested = Arc::new(AtomicBool::new(false));
        let flag = sync_requested.clone();

        info!(
            debounce_ms = debounce.as_millis() as u64,
            interval_secs = interval.as_secs(),
            "Creating sync scheduler"
        );

        let scheduler = Self {
            edit_rx,
            debounce,
            interval,
            sync_requested,
            cancel,
        };

        (scheduler, flag)
    }

    /// Requests an immediate sync, bypassing the debounce window
    ///
    /// This is used for user-initiated "sync now" requests. Sets the
    /// `sync_requested` flag directly.
    pub fn request_sync(&self) {
        info!("User-initiated sync requested (bypassing debounce)");
        self.sync_requested.store(true, Ordering::Release);
    }

    /// Returns whether a sync has been requested
    ///
    /// This checks the atomic flag without resetting it. Use
    /// [`clear_sync_request`](SyncScheduler::clear_sync_request) to reset.
    pub fn is_sync_requested(&self) -> bool {
        self.sync_requested.load(Ordering::Acquire)
    }

    /// Clears the sync requested flag
    ///
    /// Should be called after the sync engine has started a cycle.
    pub fn clear_sync_request(&self) {
        self.sync_requested.store(false, Ordering::Release);
    }

    // ========================================================================
    // SyncScheduler::run()
    // ========================================================================

    /// Main event loop for the sync scheduler
    ///
    /// Runs until cancelled, multiplexing three sources via `tokio::select!`:
    ///
    /// 1. **Edit wakes**: A wake opens a debounce window; every further
    ///    wake pushes the deadline out, and the flag is raised once the
    ///    channel has been quiet for the configured delay.
    /// 2. **Periodic timer**: Raises the flag every `interval` so remote
    ///    changes are pulled even without local activity. The first tick
    ///    fires immediately, which gives the daemon its startup sync.
    /// 3. **Cancellation**: Stops the loop.
    ///
    /// The loop also terminates when the edit channel is closed (service
    /// dropped); a final sync is requested so the last edits are not lost.
    pub async fn run(&mut self) {
        info!("Sync scheduler starting");

        let mut tick = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("Sync scheduler cancelled");
                    break;
                }

                wake = self.edit_rx.recv() => {
                    match wake {
                        Some(()) => {
                            debug!("Edit wake received, opening debounce window");
                            if !self.debounce_window().await {
                                break;
                            }
                        }
                        None => {
                            info!("Edit channel closed, scheduler shutting down");
                            self.sync_requested.store(true, Ordering::Release);
                            break;
                        }
                    }
                }

                _ = tick.tick() => {
                    debug!("Periodic sync interval elapsed");
                    self.sync_requested.store(true, Ordering::Release);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Waits for the edit burst to settle, then raises the flag
    ///
    /// Returns `false` when the scheduler should shut down. The flag is
    /// raised on every exit path so the edits that opened the window are
    /// never dropped.
    async fn debounce_window(&mut self) -> bool {
        let deadline = tokio::time::sleep(self.debounce);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.sync_requested.store(true, Ordering::Release);
                    return false;
                }

                () = &mut deadline => {
                    debug!("Debounce window settled, requesting sync");
                    self.sync_requested.store(true, Ordering::Release);
                    return true;
                }

                wake = self.edit_rx.recv() => {
                    match wake {
                        Some(()) => {
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.debounce);
                        }
                        None => {
                            self.sync_requested.store(true, Ordering::Release);
                            return false;
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn test_new_creates_scheduler_with_flag() {
        let (_tx, rx) = mpsc::channel(16);
        let (scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        assert!(!flag.load(Ordering::Acquire));
        assert!(!scheduler.is_sync_requested());
    }

    #[test]
    fn test_request_sync_sets_flag() {
        let (_tx, rx) = mpsc::channel(16);
        let (scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        scheduler.request_sync();
        assert!(flag.load(Ordering::Acquire));
        assert!(scheduler.is_sync_requested());
    }

    #[test]
    fn test_clear_sync_request() {
        let (_tx, rx) = mpsc::channel(16);
        let (scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        scheduler.request_sync();
        assert!(flag.load(Ordering::Acquire));

        scheduler.clear_sync_request();
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_run_exits_on_channel_close() {
        let (tx, rx) = mpsc::channel(16);
        let (mut scheduler, _flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        // Drop sender immediately
        drop(tx);

        // Should return without blocking forever
        timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("Scheduler should exit when channel closes");
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let (_tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (mut scheduler, _flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_secs(300),
            cancel.clone(),
        );

        cancel.cancel();

        timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("Scheduler should exit when cancelled");
    }

    #[tokio::test]
    async fn test_run_sets_flag_after_edit_settles() {
        let (tx, rx) = mpsc::channel(16);
        let (mut scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(0), // zero debounce so edits settle immediately
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        tx.send(()).await.unwrap();
        drop(tx);

        scheduler.run().await;

        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_run_coalesces_edit_burst() {
        let (tx, rx) = mpsc::channel(16);
        let (mut scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(0), // zero debounce
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        // A burst of edits for the same reminder
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();

        drop(tx);

        scheduler.run().await;

        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_cancel_inside_debounce_window_flushes() {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (mut scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_secs(10), // window long enough to cancel into
            Duration::from_secs(300),
            cancel.clone(),
        );

        tx.send(()).await.unwrap();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        timeout(Duration::from_secs(2), task)
            .await
            .expect("Scheduler should exit when cancelled")
            .unwrap();

        // The edit that opened the window still gets its sync.
        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_periodic_tick_requests_sync() {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (mut scheduler, flag) = SyncScheduler::new(
            rx,
            Duration::from_millis(100),
            Duration::from_millis(10), // fast interval for the test
            cancel.clone(),
        );

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(flag.load(Ordering::Acquire));

        cancel.cancel();
        timeout(Duration::from_secs(2), task)
            .await
            .expect("Scheduler should exit when cancelled")
            .unwrap();

        drop(tx);
    }
}
