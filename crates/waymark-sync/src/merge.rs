//! Last-writer-wins merge resolution
//!
//! When two devices edit the same reminder, each copy carries a
//! (revision, modified timestamp, device id) key. Comparing keys
//! lexicographically gives a total order over writes, so every device
//! that sees both copies settles on the same winner regardless of the
//! order it learned about them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use waymark_core::domain::newtypes::{DeviceId, Revision};
use waymark_core::domain::Reminder;

// ============================================================================
// MergeOutcome enum
// ============================================================================

/// Which side of a two-copy merge keeps its write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The local copy stands; the remote change is not applied
    LocalWins,
    /// The remote copy replaces the local one
    RemoteWins,
}

impl MergeOutcome {
    /// Returns true for [`MergeOutcome::RemoteWins`]
    pub fn is_remote_win(&self) -> bool {
        matches!(self, MergeOutcome::RemoteWins)
    }
}

// ============================================================================
// Write ordering
// ============================================================================

/// The total-order key of a write
type WriteKey = (Revision, DateTime<Utc>, DeviceId);

fn write_key(reminder: &Reminder) -> WriteKey {
    (
        reminder.revision(),
        reminder.modified_at(),
        reminder.modified_by(),
    )
}

/// Compares two copies of the same reminder in write order
///
/// Revision dominates; the modification timestamp breaks revision ties
/// and the device id breaks full ties, so the comparison is total.
pub fn compare(local: &Reminder, remote: &Reminder) -> Ordering {
    write_key(local).cmp(&write_key(remote))
}

/// Resolves a two-copy merge with last-writer-wins
///
/// The remote copy wins only when its key is strictly greater. An equal
/// key means both sides already hold the same write, so keeping the
/// local copy makes re-application a no-op.
pub fn resolve(local: &Reminder, remote: &Reminder) -> MergeOutcome {
    match compare(local, remote) {
        Ordering::Less => MergeOutcome::RemoteWins,
        Ordering::Equal | Ordering::Greater => MergeOutcome::LocalWins,
    }
}

/// Returns true when both copies are the same write
///
/// A write is identified by its revision and the device that made it;
/// re-applying it is always a no-op.
pub fn same_write(local: &Reminder, remote: &Reminder) -> bool {
    local.revision() == remote.revision() && local.modified_by() == remote.modified_by()
}

// ============================================================================
// Tests
// ============================================================================
