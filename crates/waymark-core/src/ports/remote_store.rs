//! Remote store port (driven/secondary port)
//!
//! This module defines the interface for the account's remote reminder
//! store. The primary implementation speaks the Waymark HTTP API, but the
//! trait only assumes a revision-checked document store with a "changes
//! since cursor" read.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` at the boundary; the sync engine classifies
//!   failures (network, expired cursor) from the error chain rather than
//!   depending on the adapter crate.
//! - Push is optimistic: the remote accepts a write iff the submitted
//!   revision is >= its stored revision, otherwise it rejects and returns
//!   its current copy for the caller to merge.
//! - `changes` follows server-side pagination internally and returns the
//!   complete batch with the cursor for the next call.

use crate::domain::newtypes::CursorToken;
use crate::domain::{Geofence, Reminder};

// ============================================================================
// Change feed DTOs
// ============================================================================

/// One entry of the remote change feed
///
/// Tombstones arrive as reminders in the Deleted state with no geofence.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    /// The remote copy of the reminder (sync state Clean)
    pub reminder: Reminder,
    /// The remote copy of its geofence, if the reminder has one
    pub geofence: Option<Geofence>,
}

/// A fully-followed read of the change feed
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Changes since the submitted cursor, in feed order
    pub changes: Vec<RemoteChange>,
    /// Watermark to submit on the next call
    pub cursor: CursorToken,
}

// ============================================================================
// PushOutcome enum
// ============================================================================

/// Result of an optimistic revision-checked push
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// The remote stored the submitted copy
    Accepted,
    /// The remote kept its copy; the caller merges against `current`
    Rejected {
        /// The remote's current document
        current: RemoteChange,
    },
}

impl PushOutcome {
    /// Returns true for [`PushOutcome::Accepted`]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Accepted)
    }
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the remote reminder store
///
/// ## Implementation Notes
///
/// - An expired or unknown cursor must surface an error whose message
///   contains "cursor expired" so the engine can fall back to a full
///   re-pull; transient network failures should read as network errors
///   for backoff classification.
/// - `push` communicates revision rejection through [`PushOutcome`], not
///   through the error channel: rejection is an expected outcome.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Reads all changes since the given cursor
    ///
    /// `None` performs the initial full read. Server pages are followed
    /// internally; the returned batch is complete.
    async fn changes(&self, since: Option<&CursorToken>) -> anyhow::Result<ChangeBatch>;

    /// Pushes a local copy with its revision for the optimistic check
    async fn push(
        &self,
        reminder: &Reminder,
        geofence: Option<&Geofence>,
    ) -> anyhow::Result<PushOutcome>;

    /// Retrieves the remote's current copy of one reminder
    ///
    /// Returns `None` if the remote has never seen the id.
    async fn fetch(&self, id: &crate::domain::newtypes::ReminderId)
        -> anyhow::Result<Option<RemoteChange>>;

    /// Cheap connectivity probe
    async fn ping(&self) -> anyhow::Result<()>;
}
