//! Multi-device synchronization engine
//!
//! Drives the pull/push cycle between the local store and the remote
//! reminder store.
//!
//! ## Sync Flow
//!
//! 1. **Pull**: read the change feed from the persisted cursor, merge
//!    each entry against the local copy, apply the survivors and the new
//!    cursor in one transaction.
//! 2. **Push**: reset pushes interrupted by a crash or an earlier network
//!    failure, then upload every locally modified reminder with bounded
//!    concurrency. The remote accepts a push iff the submitted revision
//!    is >= its stored revision; a rejection is merged with
//!    last-writer-wins and the losing copy is surfaced to observers.
//! 3. **Bookkeeping**: consecutive cycle failures past a threshold emit a
//!    degraded signal; the first success afterwards emits a recovery.
//!
//! ## Failure Handling
//!
//! A failing change feed query fails the whole cycle. Per-reminder push
//! failures are collected into the report and leave the row in Syncing;
//! the next cycle resets and retries it, and the idempotent revision
//! check on the remote makes the repeat push harmless. Local reads and
//! writes are never held across a network call: rows are snapshotted,
//! pushed, then reconciled against the store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use waymark_core::config::SyncConfig;
use waymark_core::domain::cursor::{EntityKind, SyncCursor};
use waymark_core::domain::newtypes::DeviceId;
use waymark_core::domain::{Geofence, Reminder, SyncState};
use waymark_core::ports::{
    ChangeBatch, IReminderStore, IRemoteStore, ObserverRegistry, PushOutcome, ReminderEvent,
    ReminderFilter, RemoteChange,
};

use crate::merge::{self, MergeOutcome};

// ============================================================================
// SyncReport
// ============================================================================

/// Outcome of one sync cycle
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Reminders the remote accepted this cycle
    pub pushed: u32,
    /// Change feed entries applied locally
    pub pulled: u32,
    /// Conflicts settled by the last-writer-wins merge, on either path
    pub conflicts_resolved: u32,
    /// Per-reminder failures that did not fail the cycle
    pub errors: Vec<String>,
    /// Wall-clock duration of the cycle
    pub duration_ms: u64,
}

// ============================================================================
// Error classification
// ============================================================================

/// Determines whether an error reads as a connectivity failure
///
/// Connectivity failures are expected while offline: the runner backs
/// off and retries instead of treating the cycle as broken.
pub fn is_network_error(err: &anyhow::Error) -> bool {
    let err_str = format!("{err:#}").to_lowercase();

    // Connectivity failures
    if err_str.contains("network")
        || err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("timed out")
        || err_str.contains("dns")
        || err_str.contains("unreachable")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
    {
        return true;
    }

    // Transient server responses
    if err_str.contains("429")
        || err_str.contains("502")
        || err_str.contains("503")
        || err_str.contains("504")
    {
        return true;
    }

    false
}

/// Determines whether an error means the change feed cursor is no longer
/// valid and a full re-pull is required
pub fn is_cursor_expired(err: &anyhow::Error) -> bool {
    let err_str = format!("{err:#}").to_lowercase();
    err_str.contains("cursor expired") || err_str.contains("410") || err_str.contains("gone")
}

// ============================================================================
// PushAction - result of pushing a single reminder
// ============================================================================

/// Result of pushing one locally modified reminder
enum PushAction {
    /// The remote stored our copy
    Accepted,
    /// The push was rejected and the conflict was merged
    Merged {
        winner: Reminder,
        loser: Reminder,
        remote_won: bool,
    },
    /// The row changed under us; a later cycle owns it
    Skipped,
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Synchronizes the local reminder store with the remote store
///
/// One engine per account session. `sync` is called serially by the
/// runner; interior bookkeeping is atomic so the engine can be shared
/// behind an `Arc`.
pub struct SyncEngine {
    store: Arc<dyn IReminderStore>,
    remote: Arc<dyn IRemoteStore>,
    observers: ObserverRegistry,
    device: DeviceId,
    push_permits: usize,
    degraded_after: u32,
    consecutive_failures: AtomicU32,
}

impl SyncEngine {
    /// Creates a sync engine over the given store and remote
    pub fn new(
        store: Arc<dyn IReminderStore>,
        remote: Arc<dyn IRemoteStore>,
        observers: ObserverRegistry,
        device: DeviceId,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            observers,
            device,
            push_permits: config.push_concurrency.max(1) as usize,
            degraded_after: config.degraded_after,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Runs one full sync cycle: pull, then push
    ///
    /// # Errors
    ///
    /// Fails when the change feed cannot be read or the local store
    /// rejects a write. Per-reminder push failures do not fail the
    /// cycle; they are reported in [`SyncReport::errors`].
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncReport> {
        match self.sync_cycle().await {
            Ok(report) => {
                self.record_cycle_success().await;
                Ok(report)
            }
            Err(err) => {
                if is_network_error(&err) {
                    warn!(error = %err, "Sync cycle failed, network unavailable");
                } else {
                    error!(error = %err, "Sync cycle failed");
                }
                self.record_cycle_failure().await;
                Err(err)
            }
        }
    }

    async fn sync_cycle(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        info!(device = %self.device, "Starting sync cycle");

        self.pull(&mut report).await?;
        self.push(&mut report).await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts_resolved = report.conflicts_resolved,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Sync cycle completed"
        );
        Ok(report)
    }

    // ========================================================================
    // Pull
    // ========================================================================

    async fn pull(&self, report: &mut SyncReport) -> Result<()> {
        let since = self
            .store
            .get_cursor(EntityKind::Reminders)
            .await
            .context("Reading sync cursor failed")?
            .map(|cursor| cursor.token().clone());

        let batch = match self.remote.changes(since.as_ref()).await {
            Ok(batch) => batch,
            Err(err) if since.is_some() && is_cursor_expired(&err) => {
                warn!("Change feed cursor expired, falling back to a full re-pull");
                self.remote
                    .changes(None)
                    .await
                    .context("Full re-pull failed")?
            }
            Err(err) => return Err(err.context("Change feed query failed")),
        };

        debug!(count = batch.changes.len(), "Received remote changes");
        self.apply_batch(batch, report).await
    }

    /// Merges a change feed page against local state and applies the
    /// surviving entries together with the new cursor in one transaction
    async fn apply_batch(&self, batch: ChangeBatch, report: &mut SyncReport) -> Result<()> {
        let mut entries: Vec<(Reminder, Option<Geofence>)> = Vec::new();
        let mut events: Vec<ReminderEvent> = Vec::new();

        for change in batch.changes {
            let incoming = change.reminder;
            let id = *incoming.id();

            let Some(local) = self.store.get_reminder(&id).await? else {
                if !incoming.is_deleted() {
                    events.push(ReminderEvent::Updated {
                        reminder: incoming.clone(),
                    });
                }
                // Unknown tombstones are stored too, so a stale feed page
                // cannot resurrect the reminder later.
                entries.push((incoming, change.geofence));
                continue;
            };

            // Re-applying a write we already hold is a no-op.
            if merge::same_write(&local, &incoming) {
                continue;
            }

            match merge::resolve(&local, &incoming) {
                MergeOutcome::RemoteWins => {
                    if local.sync_state() == SyncState::Clean {
                        events.push(remote_apply_event(&incoming));
                    } else {
                        // A pending local write loses to a newer remote
                        // one; the overwritten copy is surfaced, never
                        // silently dropped.
                        report.conflicts_resolved += 1;
                        events.push(ReminderEvent::ConflictResolved {
                            winner: incoming.clone(),
                            loser: local,
                            remote_won: true,
                        });
                    }
                    entries.push((incoming, change.geofence));
                }
                MergeOutcome::LocalWins => {
                    if incoming.modified_by() == self.device {
                        // Our own earlier write echoed back by the feed.
                        continue;
                    }
                    if local.sync_state() == SyncState::Clean {
                        debug!(reminder_id = %id, "Ignoring stale change feed entry");
                        continue;
                    }
                    report.conflicts_resolved += 1;
                    let mut winner = local;
                    if winner.revision() <= incoming.revision() {
                        // The pending push must clear the revision check
                        // and land in every other device's change feed.
                        winner.adopt_revision(incoming.revision().next());
                        self.store.save_reminder(&winner).await?;
                    }
                    events.push(ReminderEvent::ConflictResolved {
                        winner,
                        loser: incoming,
                        remote_won: false,
                    });
                }
            }
        }

        report.pulled += entries.len() as u32;
        let cursor = SyncCursor::new(EntityKind::Reminders, batch.cursor);
        self.store
            .apply_remote_batch(&entries, &cursor)
            .await
            .context("Applying remote changes failed")?;

        // Observers hear about a change only after it is durable.
        for event in &events {
            self.observers.notify(event).await;
        }
        Ok(())
    }

    // ========================================================================
    // Push
    // ========================================================================

    async fn push(&self, report: &mut SyncReport) -> Result<()> {
        self.reset_interrupted().await?;

        let pending = self
            .store
            .query_reminders(&ReminderFilter::new().with_sync_state(SyncState::LocallyModified))
            .await
            .context("Querying pending reminders failed")?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "Pushing locally modified reminders");

        let semaphore = Arc::new(Semaphore::new(self.push_permits));
        let mut handles = Vec::with_capacity(pending.len());
        for reminder in pending {
            let store = Arc::clone(&self.store);
            let remote = Arc::clone(&self.remote);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let id = *reminder.id();
                let _permit = semaphore
                    .acquire()
                    .await
                    .context("Push semaphore closed")?;
                Self::push_one(store, remote, reminder)
                    .await
                    .with_context(|| format!("Push of reminder {id} failed"))
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(PushAction::Accepted)) => report.pushed += 1,
                Ok(Ok(PushAction::Merged {
                    winner,
                    loser,
                    remote_won,
                })) => {
                    report.conflicts_resolved += 1;
                    self.observers
                        .notify(&ReminderEvent::ConflictResolved {
                            winner,
                            loser,
                            remote_won,
                        })
                        .await;
                }
                Ok(Ok(PushAction::Skipped)) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "Push failed");
                    report.errors.push(format!("{err:#}"));
                }
                Err(err) => {
                    error!(error = %err, "Push task panicked");
                    report.errors.push(format!("Push task panicked: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Pushes a single reminder through the optimistic revision check
    ///
    /// The row is claimed (snapshot still current), marked Syncing,
    /// pushed, then reconciled. An edit racing the network call wins the
    /// row; the stale push is skipped and the edit owes its own push. A
    /// network failure leaves the row in Syncing for the next cycle's
    /// reset to pick up.
    async fn push_one(
        store: Arc<dyn IReminderStore>,
        remote: Arc<dyn IRemoteStore>,
        snapshot: Reminder,
    ) -> Result<PushAction> {
        let id = *snapshot.id();

        let Some(current) = store.get_reminder(&id).await? else {
            return Ok(PushAction::Skipped);
        };
        if current.sync_state() != SyncState::LocallyModified
            || current.revision() != snapshot.revision()
        {
            debug!(reminder_id = %id, "Skipping push, row changed since snapshot");
            return Ok(PushAction::Skipped);
        }

        let mut in_flight = current;
        in_flight.begin_sync()?;
        store.save_reminder(&in_flight).await?;

        let geofence = store.get_geofence(&id).await?;
        let outcome = remote.push(&in_flight, geofence.as_ref()).await?;

        match outcome {
            PushOutcome::Accepted => {
                // Reconcile unless an edit raced the network call, in
                // which case the bumped row keeps its pending state.
                if let Some(mut row) = store.get_reminder(&id).await? {
                    if row.sync_state() == SyncState::Syncing
                        && row.revision() == in_flight.revision()
                    {
                        row.complete_sync()?;
                        store.save_reminder(&row).await?;
                    }
                }
                debug!(reminder_id = %id, revision = %in_flight.revision(), "Push accepted");
                Ok(PushAction::Accepted)
            }
            PushOutcome::Rejected { current: server } => {
                debug!(
                    reminder_id = %id,
                    local_revision = %in_flight.revision(),
                    remote_revision = %server.reminder.revision(),
                    "Push rejected, merging"
                );
                Self::merge_rejected(&store, in_flight, server).await
            }
        }
    }

    /// Settles a rejected push with the last-writer-wins merge
    async fn merge_rejected(
        store: &Arc<dyn IReminderStore>,
        mut in_flight: Reminder,
        server: RemoteChange,
    ) -> Result<PushAction> {
        let id = *in_flight.id();

        // Claim again: an edit during the network call owns the row now
        // and will run its own merge when it pushes.
        let Some(row) = store.get_reminder(&id).await? else {
            return Ok(PushAction::Skipped);
        };
        if row.sync_state() != SyncState::Syncing || row.revision() != in_flight.revision() {
            debug!(reminder_id = %id, "Skipping merge, row changed during push");
            return Ok(PushAction::Skipped);
        }

        in_flight.mark_conflicted()?;

        match merge::resolve(&in_flight, &server.reminder) {
            MergeOutcome::RemoteWins => {
                store
                    .save_with_geofence(&server.reminder, server.geofence.as_ref())
                    .await?;
                debug!(reminder_id = %id, "Merge settled on the remote copy");
                Ok(PushAction::Merged {
                    winner: server.reminder,
                    loser: in_flight,
                    remote_won: true,
                })
            }
            MergeOutcome::LocalWins => {
                in_flight.retry_after_conflict()?;
                if in_flight.revision() <= server.reminder.revision() {
                    in_flight.adopt_revision(server.reminder.revision().next());
                }
                store.save_reminder(&in_flight).await?;
                debug!(reminder_id = %id, "Merge kept the local copy, push queued");
                Ok(PushAction::Merged {
                    winner: in_flight,
                    loser: server.reminder,
                    remote_won: false,
                })
            }
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Resets reminders stuck in Syncing back to LocallyModified
    ///
    /// Runs at the start of every push phase and at daemon startup.
    /// Rows left Syncing by a crash or a network failure are re-pushed;
    /// the remote's revision check makes a repeated push harmless.
    pub async fn reset_interrupted(&self) -> Result<u32> {
        let stuck = self
            .store
            .query_reminders(&ReminderFilter::new().with_sync_state(SyncState::Syncing))
            .await
            .context("Querying interrupted pushes failed")?;
        let count = stuck.len() as u32;
        for mut reminder in stuck {
            reminder.reset_in_flight()?;
            self.store.save_reminder(&reminder).await?;
        }
        if count > 0 {
            info!(count, "Reset interrupted pushes for retry");
        }
        Ok(count)
    }

    /// Discards all local state and rebuilds it from the remote store
    ///
    /// Recovery path for local storage corruption. Unpushed local edits
    /// are lost; everything the remote holds is pulled fresh.
    pub async fn rebuild_from_remote(&self) -> Result<SyncReport> {
        warn!("Rebuilding local state from the remote store");
        self.store
            .purge_all()
            .await
            .context("Purging local state failed")?;
        self.sync().await
    }

    // ========================================================================
    // Degraded-state bookkeeping
    // ========================================================================

    async fn record_cycle_success(&self) {
        let failures = self.consecutive_failures.swap(0, Ordering::SeqCst);
        if self.degraded_after > 0 && failures >= self.degraded_after {
            info!(failures, "Sync recovered after repeated failures");
            self.observers.notify(&ReminderEvent::SyncRecovered).await;
        }
    }

    async fn record_cycle_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.degraded_after > 0 && failures == self.degraded_after {
            warn!(consecutive_failures = failures, "Sync is degraded");
            self.observers
                .notify(&ReminderEvent::SyncDegraded {
                    consecutive_failures: failures,
                })
                .await;
        }
    }
}

/// Event for a change feed entry applied over a clean local copy
fn remote_apply_event(incoming: &Reminder) -> ReminderEvent {
    if incoming.is_deleted() {
        ReminderEvent::Deleted {
            id: *incoming.id(),
        }
    } else {
        ReminderEvent::Updated {
            reminder: incoming.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
