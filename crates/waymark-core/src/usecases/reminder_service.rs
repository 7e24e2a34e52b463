//! Reminder service use case
//!
//! The facade the rest of the application talks to: reminder CRUD, the
//! fix-evaluation pipeline stage, trigger acknowledgment, and observer
//! subscription. Orchestrates the store and queue ports; business rules
//! stay on the domain entities.
//!
//! One instance is session-scoped: constructed when the account session
//! opens and dropped when it closes. All state outside the ports is the
//! in-memory evaluator hysteresis, which intentionally resets with the
//! process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::EvaluatorConfig;
use crate::domain::newtypes::{DeviceId, ReminderId, TriggerId};
use crate::domain::{
    evaluate, EvaluatorState, Geofence, PositionFix, Reminder, TriggerEvent, TriggerOn,
};
use crate::ports::{
    IReminderStore, ITriggerQueue, ObserverRegistry, ReminderEvent, ReminderFilter,
};

// ============================================================================
// Request types
// ============================================================================

/// Geofence parameters as submitted by the caller (unvalidated)
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceSpec {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    pub trigger_on: TriggerOn,
    pub one_shot: bool,
}

/// Parameters for creating a reminder
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub title: String,
    pub note: Option<String>,
    pub image_ref: Option<String>,
    /// `None` creates a manual reminder with no location trigger
    pub geofence: Option<GeofenceSpec>,
}

impl NewReminder {
    /// Creates a request with just a title
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            note: None,
            image_ref: None,
            geofence: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn with_geofence(mut self, spec: GeofenceSpec) -> Self {
        self.geofence = Some(spec);
        self
    }
}

/// Partial edit of an existing reminder
///
/// `None` fields are left untouched; the nested options distinguish
/// "unchanged" from "cleared".
#[derive(Debug, Clone, Default)]
pub struct UpdateReminder {
    pub title: Option<String>,
    pub note: Option<Option<String>>,
    pub image_ref: Option<Option<String>>,
    /// `Some(None)` removes the geofence; `Some(Some(spec))` replaces it
    /// (replacement always re-arms)
    pub geofence: Option<Option<GeofenceSpec>>,
}

impl UpdateReminder {
    /// Creates an edit that changes nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(Some(note.into()));
        self
    }

    pub fn clear_note(mut self) -> Self {
        self.note = Some(None);
        self
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(Some(image_ref.into()));
        self
    }

    pub fn clear_image_ref(mut self) -> Self {
        self.image_ref = Some(None);
        self
    }

    pub fn with_geofence(mut self, spec: GeofenceSpec) -> Self {
        self.geofence = Some(Some(spec));
        self
    }

    pub fn remove_geofence(mut self) -> Self {
        self.geofence = Some(None);
        self
    }

    /// True when the edit changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.note.is_none()
            && self.image_ref.is_none()
            && self.geofence.is_none()
    }
}

// ============================================================================
// ReminderService
// ============================================================================

/// Facade over the reminder engine
///
/// All mutations validate on the domain entities before anything is
/// persisted (a malformed geofence never reaches the store), write
/// reminder and geofence in one transaction, wake the sync scheduler,
/// and publish an event to observers.
pub struct ReminderService {
    store: Arc<dyn IReminderStore>,
    queue: Arc<dyn ITriggerQueue>,
    observers: ObserverRegistry,
    device_id: DeviceId,
    evaluator_state: Mutex<EvaluatorState>,
    debounce_fixes: u8,
    sync_wake: Option<mpsc::Sender<()>>,
}

impl ReminderService {
    /// Creates a new service over the given ports
    ///
    /// # Arguments
    ///
    /// * `store` - Persistent reminder/geofence storage
    /// * `queue` - Durable trigger delivery queue
    /// * `observers` - Shared observer registry (cloned by the sync engine)
    /// * `device_id` - Stable identity of this device, stamped on edits
    /// * `evaluator` - Evaluation settings (debounce window)
    /// * `sync_wake` - Channel that nudges the sync scheduler after local
    ///   edits; `None` disables the nudge (tests)
    pub fn new(
        store: Arc<dyn IReminderStore>,
        queue: Arc<dyn ITriggerQueue>,
        observers: ObserverRegistry,
        device_id: DeviceId,
        evaluator: &EvaluatorConfig,
        sync_wake: Option<mpsc::Sender<()>>,
    ) -> Self {
        Self {
            store,
            queue,
            observers,
            device_id,
            evaluator_state: Mutex::new(EvaluatorState::new()),
            debounce_fixes: evaluator.debounce_fixes,
            sync_wake,
        }
    }

    /// The observer registry this service publishes to
    #[must_use]
    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Device identity stamped on local edits
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Subscribes an observer to engine events
    pub async fn subscribe(&self, observer: Arc<dyn crate::ports::IReminderObserver>) {
        self.observers.subscribe(observer).await;
    }

    /// Removes a subscribed observer
    pub async fn unsubscribe(&self, observer: &Arc<dyn crate::ports::IReminderObserver>) {
        self.observers.unsubscribe(observer).await;
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Creates a reminder, optionally with a geofence
    ///
    /// Validation happens before any write: a rejected title or geofence
    /// leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty title, a malformed geofence, or a
    /// storage failure.
    pub async fn create(&self, new: NewReminder) -> Result<Reminder> {
        let reminder = Reminder::new(new.title, new.note, new.image_ref, self.device_id)?;
        let geofence = match new.geofence {
            Some(spec) => Some(build_geofence(*reminder.id(), &spec)?),
            None => None,
        };

        self.store
            .save_with_geofence(&reminder, geofence.as_ref())
            .await
            .context("Failed to persist new reminder")?;

        info!(reminder_id = %reminder.id(), has_geofence = geofence.is_some(), "Reminder created");
        self.wake_sync();
        self.observers
            .notify(&ReminderEvent::Created {
                reminder: reminder.clone(),
            })
            .await;

        Ok(reminder)
    }

    /// Applies a partial edit to a reminder
    ///
    /// Editing the geofence replaces it with a freshly armed one; a fired
    /// one-shot fence comes back to life when its region changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder does not exist, a submitted field
    /// fails validation, or storage fails.
    pub async fn update(&self, id: &ReminderId, edit: UpdateReminder) -> Result<Reminder> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await
            .context("Failed to load reminder for update")?
            .with_context(|| format!("Reminder {id} not found"))?;

        // Validate the replacement fence before touching the entity
        let mut geofence = self
            .store
            .get_geofence(id)
            .await
            .context("Failed to load geofence for update")?;
        match &edit.geofence {
            None => {}
            Some(None) => geofence = None,
            Some(Some(spec)) => geofence = Some(build_geofence(*id, spec)?),
        }

        if let Some(title) = edit.title {
            reminder.set_title(title)?;
        }
        if let Some(note) = edit.note {
            reminder.set_note(note);
        }
        if let Some(image_ref) = edit.image_ref {
            reminder.set_image_ref(image_ref);
        }

        reminder.mark_modified(self.device_id);
        self.store
            .save_with_geofence(&reminder, geofence.as_ref())
            .await
            .context("Failed to persist reminder update")?;

        debug!(reminder_id = %id, "Reminder updated");
        self.wake_sync();
        self.observers
            .notify(&ReminderEvent::Updated {
                reminder: reminder.clone(),
            })
            .await;

        Ok(reminder)
    }

    /// Marks a reminder completed
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder does not exist, the transition is
    /// not allowed from its current state, or storage fails.
    pub async fn complete(&self, id: &ReminderId) -> Result<Reminder> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await
            .context("Failed to load reminder for completion")?
            .with_context(|| format!("Reminder {id} not found"))?;

        reminder.complete(self.device_id)?;
        self.store
            .save_reminder(&reminder)
            .await
            .context("Failed to persist completion")?;

        info!(reminder_id = %id, "Reminder completed");
        self.wake_sync();
        self.observers
            .notify(&ReminderEvent::Completed {
                reminder: reminder.clone(),
            })
            .await;

        Ok(reminder)
    }

    /// Reopens a completed reminder
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder does not exist or is not
    /// completed.
    pub async fn reopen(&self, id: &ReminderId) -> Result<Reminder> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await
            .context("Failed to load reminder for reopen")?
            .with_context(|| format!("Reminder {id} not found"))?;

        reminder.reopen(self.device_id)?;
        self.store
            .save_reminder(&reminder)
            .await
            .context("Failed to persist reopen")?;

        self.wake_sync();
        self.observers
            .notify(&ReminderEvent::Updated {
                reminder: reminder.clone(),
            })
            .await;

        Ok(reminder)
    }

    /// Tombstones a reminder
    ///
    /// The row stays behind in the Deleted state so the deletion can
    /// propagate to other devices; the geofence is removed and any
    /// hysteresis for it is forgotten.
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder does not exist or storage fails.
    pub async fn delete(&self, id: &ReminderId) -> Result<()> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await
            .context("Failed to load reminder for deletion")?
            .with_context(|| format!("Reminder {id} not found"))?;

        reminder.mark_deleted(self.device_id)?;
        self.store
            .save_with_geofence(&reminder, None)
            .await
            .context("Failed to persist deletion")?;

        self.evaluator_state.lock().await.remove(id);

        info!(reminder_id = %id, "Reminder deleted");
        self.wake_sync();
        self.observers.notify(&ReminderEvent::Deleted { id: *id }).await;

        Ok(())
    }

    /// Retrieves a reminder by id
    pub async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>> {
        self.store.get_reminder(id).await
    }

    /// Retrieves a reminder together with its geofence
    pub async fn get_with_geofence(
        &self,
        id: &ReminderId,
    ) -> Result<Option<(Reminder, Option<Geofence>)>> {
        let Some(reminder) = self.store.get_reminder(id).await? else {
            return Ok(None);
        };
        let geofence = self.store.get_geofence(id).await?;
        Ok(Some((reminder, geofence)))
    }

    /// Queries reminders matching a filter
    pub async fn list(&self, filter: &ReminderFilter) -> Result<Vec<Reminder>> {
        self.store.query_reminders(filter).await
    }

    /// Re-arms a fired geofence so it can trigger again
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder does not exist or has no geofence.
    pub async fn rearm(&self, id: &ReminderId) -> Result<()> {
        let mut reminder = self
            .store
            .get_reminder(id)
            .await
            .context("Failed to load reminder for rearm")?
            .with_context(|| format!("Reminder {id} not found"))?;
        let mut geofence = self
            .store
            .get_geofence(id)
            .await
            .context("Failed to load geofence for rearm")?
            .with_context(|| format!("Reminder {id} has no geofence"))?;

        geofence.rearm();
        reminder.mark_modified(self.device_id);
        self.store
            .save_with_geofence(&reminder, Some(&geofence))
            .await
            .context("Failed to persist rearm")?;

        self.wake_sync();
        self.observers
            .notify(&ReminderEvent::Updated { reminder })
            .await;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Fix pipeline
    // ------------------------------------------------------------------

    /// Evaluates one accepted position fix against nearby geofences
    ///
    /// This is the pipeline stage between the sampler and the trigger
    /// queue:
    /// 1. collect candidate fences from the grid index, plus any fence
    ///    the hysteresis state still tracks;
    /// 2. run the pure evaluation;
    /// 3. disarm one-shot fences that fired (persisted as a local edit so
    ///    the disarm syncs to other devices);
    /// 4. enqueue a trigger per fired transition, coalescing with any
    ///    Pending event for the same (reminder, transition).
    ///
    /// Returns the trigger events that were enqueued. Delivery to
    /// observers happens from the queue, not from here.
    ///
    /// # Errors
    ///
    /// Returns an error if storage or the queue fails; the hysteresis
    /// state is only replaced after the fences were read successfully.
    pub async fn handle_fix(&self, fix: PositionFix) -> Result<Vec<TriggerEvent>> {
        let mut state = self.evaluator_state.lock().await;

        // Candidates near the fix, plus tracked fences the grid lookup
        // no longer covers (the user may be leaving one).
        let mut fences = self
            .store
            .candidate_geofences(fix.latitude, fix.longitude)
            .await
            .context("Failed to load candidate geofences")?;
        let missing: Vec<ReminderId> = state
            .tracked_ids()
            .into_iter()
            .filter(|id| !fences.iter().any(|f| f.reminder_id() == id))
            .collect();
        if !missing.is_empty() {
            let tracked = self
                .store
                .get_geofences(&missing)
                .await
                .context("Failed to load tracked geofences")?;
            fences.extend(tracked);
        }

        let evaluation = evaluate(&fix, &state, &fences, self.debounce_fixes);
        *state = evaluation.state.clone();
        drop(state);

        let mut enqueued = Vec::with_capacity(evaluation.transitions.len());
        for fired in evaluation.transitions {
            let Some(mut reminder) = self
                .store
                .get_reminder(&fired.reminder_id)
                .await
                .context("Failed to load reminder for fired transition")?
            else {
                warn!(reminder_id = %fired.reminder_id, "Fence fired for a missing reminder");
                continue;
            };
            if !reminder.is_active() {
                continue;
            }

            if fired.disarm {
                if let Some(mut geofence) = self
                    .store
                    .get_geofence(&fired.reminder_id)
                    .await
                    .context("Failed to load geofence for disarm")?
                {
                    geofence.disarm();
                    reminder.mark_modified(self.device_id);
                    self.store
                        .save_with_geofence(&reminder, Some(&geofence))
                        .await
                        .context("Failed to persist one-shot disarm")?;
                    self.wake_sync();
                }
            }

            let trigger = TriggerEvent::new(fired.reminder_id, fired.transition, fix);
            let outcome = self
                .queue
                .enqueue(&trigger)
                .await
                .context("Failed to enqueue trigger")?;
            info!(
                reminder_id = %fired.reminder_id,
                transition = %fired.transition,
                ?outcome,
                "Geofence transition enqueued"
            );
            enqueued.push(trigger);
        }

        Ok(enqueued)
    }

    // ------------------------------------------------------------------
    // Trigger delivery
    // ------------------------------------------------------------------

    /// Acknowledges a delivered trigger
    ///
    /// Acknowledging a trigger fired by a one-shot fence completes the
    /// reminder: the errand is done, and the completion propagates on the
    /// next push cycle. Repeating fences leave the reminder active.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown trigger id or a storage failure.
    pub async fn acknowledge_trigger(&self, id: &TriggerId) -> Result<()> {
        let event = self
            .queue
            .acknowledge(id)
            .await
            .context("Failed to acknowledge trigger")?;

        let Some(mut reminder) = self
            .store
            .get_reminder(event.reminder_id())
            .await
            .context("Failed to load reminder for acknowledged trigger")?
        else {
            return Ok(());
        };

        let one_shot = self
            .store
            .get_geofence(event.reminder_id())
            .await
            .context("Failed to load geofence for acknowledged trigger")?
            .is_some_and(|fence| fence.is_one_shot());

        if one_shot && reminder.is_active() {
            reminder.complete(self.device_id)?;
            self.store
                .save_reminder(&reminder)
                .await
                .context("Failed to persist one-shot completion")?;
            info!(reminder_id = %reminder.id(), "One-shot reminder completed on acknowledgment");
            self.wake_sync();
            self.observers
                .notify(&ReminderEvent::Completed { reminder })
                .await;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Nudges the sync scheduler after a local edit
    ///
    /// A full channel means a nudge is already waiting, which is enough.
    fn wake_sync(&self) {
        if let Some(tx) = &self.sync_wake {
            let _ = tx.try_send(());
        }
    }
}

impl std::fmt::Debug for ReminderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderService")
            .field("device_id", &self.device_id)
            .field("debounce_fixes", &self.debounce_fixes)
            .finish_non_exhaustive()
    }
}

/// Validates a submitted geofence spec into a domain geofence
fn build_geofence(reminder_id: ReminderId, spec: &GeofenceSpec) -> Result<Geofence> {
    let fence = Geofence::new(
        reminder_id,
        spec.latitude,
        spec.longitude,
        spec.radius_m,
        spec.trigger_on,
        spec.one_shot,
    )?;
    Ok(fence)
}
