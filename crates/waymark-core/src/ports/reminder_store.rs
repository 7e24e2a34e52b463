//! Reminder store port (driven/secondary port)
//!
//! This module defines the interface for persisting reminders, their
//! geofences, and the sync cursor watermarks.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite today) and don't need domain-level classification.
//! - The `ReminderFilter` struct provides a composable query mechanism
//!   without exposing storage implementation details.
//! - A reminder and its geofence change together or not at all:
//!   `save_with_geofence` and `apply_remote_batch` are transactional in
//!   any conforming implementation.
//! - All write operations take references to domain entities, allowing
//!   the caller to retain ownership.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{
    cursor::{EntityKind, SyncCursor},
    newtypes::{Latitude, Longitude, ReminderId},
    reminder::{ReminderState, SyncState},
    Geofence, Reminder,
};

// ============================================================================
// ReminderFilter struct
// ============================================================================

/// Filter criteria for querying reminders
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. Multiple filters are combined with AND logic.
///
/// # Example
///
/// ```
/// use waymark_core::ports::ReminderFilter;
/// use waymark_core::domain::SyncState;
///
/// // Everything that still owes the remote store a push
/// let filter = ReminderFilter::new().with_sync_state(SyncState::LocallyModified);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReminderFilter {
    /// Filter by lifecycle state
    pub state: Option<ReminderState>,
    /// Filter by sync state
    pub sync_state: Option<SyncState>,
    /// Filter by modification time (reminders modified after this timestamp)
    pub modified_since: Option<DateTime<Utc>>,
    /// Maximum number of rows to return
    pub limit: Option<u32>,
}

impl ReminderFilter {
    /// Creates a new empty filter (matches all reminders)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lifecycle state filter
    #[must_use]
    pub fn with_state(mut self, state: ReminderState) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the sync state filter
    #[must_use]
    pub fn with_sync_state(mut self, sync_state: SyncState) -> Self {
        self.sync_state = Some(sync_state);
        self
    }

    /// Sets the modified since filter
    #[must_use]
    pub fn with_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.modified_since = Some(since);
        self
    }

    /// Sets the row limit
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if no filters are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.sync_state.is_none()
            && self.modified_since.is_none()
            && self.limit.is_none()
    }
}

// ============================================================================
// IReminderStore trait
// ============================================================================

/// Port trait for persistent reminder storage
///
/// This is the primary interface for all persistence operations: reminder
/// CRUD, geofence lookup (including the spatial candidate query backed by
/// the grid index), remote batch application, and cursor bookkeeping.
///
/// ## Implementation Notes
///
/// - `save_with_geofence` must apply both writes in one transaction;
///   passing `None` removes any stored geofence for the reminder.
/// - `apply_remote_batch` must persist the whole batch and advance the
///   cursor atomically: after a crash the store either has all of the page
///   and the new cursor, or none of it and the old cursor.
/// - `candidate_geofences` may over-approximate (return fences that turn
///   out not to contain the position) but must never miss a fence whose
///   circle could contain it.
#[async_trait::async_trait]
pub trait IReminderStore: Send + Sync {
    // --- Reminder operations ---

    /// Saves a reminder (insert or update)
    async fn save_reminder(&self, reminder: &Reminder) -> anyhow::Result<()>;

    /// Retrieves a reminder by id
    async fn get_reminder(&self, id: &ReminderId) -> anyhow::Result<Option<Reminder>>;

    /// Queries reminders matching the given filter criteria
    ///
    /// Results are ordered by modification time (newest first).
    async fn query_reminders(&self, filter: &ReminderFilter) -> anyhow::Result<Vec<Reminder>>;

    /// Counts reminders grouped by lifecycle state
    ///
    /// Returns a map where keys are state names (e.g., "active",
    /// "completed") and values are counts. Tombstones are included.
    async fn count_by_state(&self) -> anyhow::Result<HashMap<String, u64>>;

    // --- Geofence operations ---

    /// Saves a reminder together with its geofence in one transaction
    ///
    /// `None` removes any existing geofence (the reminder becomes
    /// time-only/manual).
    async fn save_with_geofence(
        &self,
        reminder: &Reminder,
        geofence: Option<&Geofence>,
    ) -> anyhow::Result<()>;

    /// Retrieves the geofence attached to a reminder, if any
    async fn get_geofence(&self, id: &ReminderId) -> anyhow::Result<Option<Geofence>>;

    /// Retrieves geofences for the given reminder ids (missing ids are
    /// silently skipped)
    async fn get_geofences(&self, ids: &[ReminderId]) -> anyhow::Result<Vec<Geofence>>;

    /// Retrieves all armed geofences
    async fn armed_geofences(&self) -> anyhow::Result<Vec<Geofence>>;

    /// Retrieves the geofences whose grid cells neighbour the given
    /// position (spatial candidate lookup; includes disarmed fences)
    async fn candidate_geofences(
        &self,
        latitude: Latitude,
        longitude: Longitude,
    ) -> anyhow::Result<Vec<Geofence>>;

    // --- Remote application ---

    /// Applies a pulled change page and advances the cursor atomically
    ///
    /// Each entry upserts the reminder and replaces its geofence (or
    /// removes it when `None`). The cursor write belongs to the same
    /// transaction.
    async fn apply_remote_batch(
        &self,
        batch: &[(Reminder, Option<Geofence>)],
        cursor: &SyncCursor,
    ) -> anyhow::Result<()>;

    // --- Cursor operations ---

    /// Retrieves the persisted cursor for an entity kind
    async fn get_cursor(&self, entity: EntityKind) -> anyhow::Result<Option<SyncCursor>>;

    /// Saves a cursor (insert or update)
    async fn save_cursor(&self, cursor: &SyncCursor) -> anyhow::Result<()>;

    // --- Maintenance ---

    /// Removes every reminder, geofence, trigger, and cursor
    ///
    /// Used by the rebuild-from-remote recovery path after storage
    /// corruption; the next pull starts from scratch.
    async fn purge_all(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = ReminderFilter::new();
        assert!(filter.is_empty());
        assert!(filter.state.is_none());
        assert!(filter.sync_state.is_none());
    }

    #[test]
    fn test_filter_builder_chains() {
        let since = Utc::now();
        let filter = ReminderFilter::new()
            .with_state(ReminderState::Active)
            .with_sync_state(SyncState::LocallyModified)
            .with_modified_since(since)
            .with_limit(10);

        assert!(!filter.is_empty());
        assert_eq!(filter.state, Some(ReminderState::Active));
        assert_eq!(filter.sync_state, Some(SyncState::LocallyModified));
        assert_eq!(filter.modified_since, Some(since));
        assert_eq!(filter.limit, Some(10));
    }
}
