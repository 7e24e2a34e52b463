//! Reminder entity with lifecycle and sync state machines
//!
//! Lifecycle states:
//!
//! ```text
//!            complete
//!   Active ------------> Completed
//!     |  ^                   |
//!     |  +----- reopen ------+
//!     |                      |
//!     +-------- delete ------+---> Deleted (tombstone, terminal)
//! ```
//!
//! Sync states (per entity, driving the push/pull protocol):
//!
//! ```text
//!   Clean --edit--> LocallyModified --push--> Syncing --accept--> Clean
//!                        ^                      |
//!                        |  edit in flight /    | reject
//!                        |  crash reset         v
//!                        +------------- ConflictPending --merge--> Clean
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{DeviceId, ReminderId, Revision};

// ============================================================================
// Lifecycle state
// ============================================================================

/// Lifecycle state of a reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    /// Live; evaluated if it has a geofence
    Active,
    /// Done; kept for history until deleted
    Completed,
    /// Tombstone; propagated to other devices, then pruned
    Deleted,
}

impl ReminderState {
    /// Returns the canonical name for persistence and logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ReminderState::Active => "active",
            ReminderState::Completed => "completed",
            ReminderState::Deleted => "deleted",
        }
    }

    /// Whether a transition to `target` is legal
    ///
    /// Deleted is terminal: tombstones never resurrect.
    #[must_use]
    pub fn can_transition_to(&self, target: &ReminderState) -> bool {
        matches!(
            (self, target),
            (ReminderState::Active, ReminderState::Completed)
                | (ReminderState::Active, ReminderState::Deleted)
                | (ReminderState::Completed, ReminderState::Active)
                | (ReminderState::Completed, ReminderState::Deleted)
        )
    }
}

impl fmt::Display for ReminderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ReminderState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReminderState::Active),
            "completed" => Ok(ReminderState::Completed),
            "deleted" => Ok(ReminderState::Deleted),
            other => Err(DomainError::InvalidId(format!(
                "unknown reminder state: {other}"
            ))),
        }
    }
}

// ============================================================================
// Sync state
// ============================================================================

/// Per-entity synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// In step with the remote store
    Clean,
    /// Edited locally; a push is owed
    LocallyModified,
    /// A push is in flight
    Syncing,
    /// Push rejected; awaiting merge resolution
    ConflictPending,
}

impl SyncState {
    /// Returns the canonical name for persistence and logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Clean => "clean",
            SyncState::LocallyModified => "locally_modified",
            SyncState::Syncing => "syncing",
            SyncState::ConflictPending => "conflict_pending",
        }
    }

    /// Whether a transition to `target` is legal
    #[must_use]
    pub fn can_transition_to(&self, target: &SyncState) -> bool {
        matches!(
            (self, target),
            (SyncState::Clean, SyncState::LocallyModified)
                | (SyncState::LocallyModified, SyncState::Syncing)
                | (SyncState::Syncing, SyncState::Clean)
                | (SyncState::Syncing, SyncState::ConflictPending)
                // Edit while a push is in flight, or crash-recovery reset
                | (SyncState::Syncing, SyncState::LocallyModified)
                | (SyncState::ConflictPending, SyncState::Clean)
                // Local side won the merge and owes a fresh push
                | (SyncState::ConflictPending, SyncState::LocallyModified)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SyncState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(SyncState::Clean),
            "locally_modified" => Ok(SyncState::LocallyModified),
            "syncing" => Ok(SyncState::Syncing),
            "conflict_pending" => Ok(SyncState::ConflictPending),
            other => Err(DomainError::InvalidId(format!(
                "unknown sync state: {other}"
            ))),
        }
    }
}

// ============================================================================
// Reminder entity
// ============================================================================

/// A reminder owned by the account, mutated locally and by applied remote
/// changes
///
/// Every mutation goes through `mark_modified`, which bumps the revision,
/// stamps the editing device and flags the entity for the next push cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    id: ReminderId,
    title: String,
    note: Option<String>,
    /// Opaque reference into the external media collaborator (URL or id)
    image_ref: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    state: ReminderState,
    revision: Revision,
    modified_by: DeviceId,
    sync_state: SyncState,
}

impl Reminder {
    /// Creates a new local reminder
    ///
    /// Starts Active and LocallyModified: a freshly created reminder owes
    /// its first push.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EmptyTitle` if the title is empty or
    /// whitespace-only.
    pub fn new(
        title: impl Into<String>,
        note: Option<String>,
        image_ref: Option<String>,
        device: DeviceId,
    ) -> Result<Self, DomainError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::EmptyTitle);
        }
        let now = Utc::now();
        Ok(Self {
            id: ReminderId::new(),
            title,
            note,
            image_ref,
            created_at: now,
            modified_at: now,
            state: ReminderState::Active,
            revision: Revision::initial(),
            modified_by: device,
            sync_state: SyncState::LocallyModified,
        })
    }

    /// Reconstructs a reminder from persisted or remote parts
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        id: ReminderId,
        title: String,
        note: Option<String>,
        image_ref: Option<String>,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
        state: ReminderState,
        revision: Revision,
        modified_by: DeviceId,
        sync_state: SyncState,
    ) -> Self {
        Self {
            id,
            title,
            note,
            image_ref,
            created_at,
            modified_at,
            state,
            revision,
            modified_by,
            sync_state,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Reminder id
    #[must_use]
    pub fn id(&self) -> &ReminderId {
        &self.id
    }

    /// Title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Optional note
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Optional media reference
    #[must_use]
    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref.as_deref()
    }

    /// Creation timestamp
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last modification timestamp
    #[must_use]
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> ReminderState {
        self.state
    }

    /// Revision counter
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Device that performed the last mutation
    #[must_use]
    pub fn modified_by(&self) -> DeviceId {
        self.modified_by
    }

    /// Sync state
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Whether the reminder is live
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ReminderState::Active
    }

    /// Whether the reminder is a tombstone
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == ReminderState::Deleted
    }

    /// Whether the entity owes a push
    #[must_use]
    pub fn needs_push(&self) -> bool {
        self.sync_state == SyncState::LocallyModified
    }

    // ========================================================================
    // Content edits
    // ========================================================================

    /// Replaces the title
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EmptyTitle` for an empty title.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), DomainError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::EmptyTitle);
        }
        self.title = title;
        Ok(())
    }

    /// Replaces the note
    pub fn set_note(&mut self, note: Option<String>) {
        self.note = note;
    }

    /// Replaces the media reference
    pub fn set_image_ref(&mut self, image_ref: Option<String>) {
        self.image_ref = image_ref;
    }

    // ========================================================================
    // Lifecycle transitions
    // ========================================================================

    /// Marks the reminder done
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` unless Active.
    pub fn complete(&mut self, device: DeviceId) -> Result<(), DomainError> {
        self.transition_state(ReminderState::Completed)?;
        self.mark_modified(device);
        Ok(())
    }

    /// Reopens a completed reminder
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` unless Completed.
    pub fn reopen(&mut self, device: DeviceId) -> Result<(), DomainError> {
        self.transition_state(ReminderState::Active)?;
        self.mark_modified(device);
        Ok(())
    }

    /// Turns the reminder into a tombstone
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` if already Deleted.
    pub fn mark_deleted(&mut self, device: DeviceId) -> Result<(), DomainError> {
        self.transition_state(ReminderState::Deleted)?;
        self.mark_modified(device);
        Ok(())
    }

    fn transition_state(&mut self, target: ReminderState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(&target) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    // ========================================================================
    // Sync bookkeeping
    // ========================================================================

    /// Records a local mutation: bumps revision and modified timestamp,
    /// stamps the device and flags the entity for pushing
    ///
    /// Legal from any sync state; an edit during an in-flight push simply
    /// queues another one.
    pub fn mark_modified(&mut self, device: DeviceId) {
        self.revision = self.revision.next();
        self.modified_at = Utc::now();
        self.modified_by = device;
        self.sync_state = SyncState::LocallyModified;
    }

    /// Moves LocallyModified → Syncing when a push starts
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn begin_sync(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::Syncing)
    }

    /// Moves Syncing → Clean when the remote accepted the push
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn complete_sync(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::Clean)
    }

    /// Moves Syncing → ConflictPending when the remote rejected the push
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn mark_conflicted(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::ConflictPending)
    }

    /// Moves ConflictPending → Clean after the merge settled on the remote
    /// copy
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn resolve_conflict(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::Clean)
    }

    /// Moves ConflictPending → LocallyModified after the merge settled on
    /// the local copy, which now owes a fresh push
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn retry_after_conflict(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::LocallyModified)
    }

    /// Resets an interrupted push (Syncing → LocallyModified), used at
    /// startup after a crash
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSyncTransition` from any other state.
    pub fn reset_in_flight(&mut self) -> Result<(), DomainError> {
        self.transition_sync(SyncState::LocallyModified)
    }

    /// Overwrites revision and bookkeeping from an accepted or merged remote
    /// revision
    pub fn adopt_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    fn transition_sync(&mut self, target: SyncState) -> Result<(), DomainError> {
        if !self.sync_state.can_transition_to(&target) {
            return Err(DomainError::InvalidSyncTransition {
                from: self.sync_state.to_string(),
                to: target.to_string(),
            });
        }
        self.sync_state = target;
        Ok(())
    }
}
