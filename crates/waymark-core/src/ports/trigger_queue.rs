//! Trigger queue port (driven/secondary port)
//!
//! This module defines the interface for the durable trigger delivery
//! queue. Fired geofence transitions are enqueued here and survive process
//! restarts until a consumer acknowledges them.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because queue errors are adapter-specific.
//! - Delivery is at-least-once: `dequeue_next` marks an event Delivered,
//!   and `requeue_expired` returns unacknowledged deliveries to Pending
//!   after the retry timeout.
//! - At most one Pending event exists per (reminder, transition); a second
//!   enqueue for the same key coalesces into the existing event.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::TriggerId;
use crate::domain::TriggerEvent;

// ============================================================================
// EnqueueOutcome enum
// ============================================================================

/// What happened to an enqueued trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new queue entry was created
    Inserted,
    /// A Pending entry for the same (reminder, transition) already
    /// existed; its fix and timestamp were replaced, its id kept
    Coalesced,
}

// ============================================================================
// ITriggerQueue trait
// ============================================================================

/// Port trait for the durable trigger queue
///
/// ## Implementation Notes
///
/// - `dequeue_next` must atomically select the oldest Pending event (by
///   occurrence time) and mark it Delivered, so two concurrent consumers
///   never receive the same event.
/// - `acknowledge` is idempotent for already-acknowledged ids and fails
///   for unknown ids.
/// - Acknowledged events are kept for bookkeeping until
///   `purge_acknowledged` removes them.
#[async_trait::async_trait]
pub trait ITriggerQueue: Send + Sync {
    /// Enqueues a trigger event, coalescing with an existing Pending
    /// event for the same (reminder, transition)
    async fn enqueue(&self, event: &TriggerEvent) -> anyhow::Result<EnqueueOutcome>;

    /// Takes the oldest Pending event and marks it Delivered
    ///
    /// Returns `None` when nothing is pending. The returned event carries
    /// the updated delivery state and attempt count.
    async fn dequeue_next(&self) -> anyhow::Result<Option<TriggerEvent>>;

    /// Acknowledges a delivered event
    ///
    /// Returns the acknowledged event so the caller can act on its
    /// reminder (one-shot completion). Acknowledging an already
    /// acknowledged event is a no-op; an unknown id is an error.
    async fn acknowledge(&self, id: &TriggerId) -> anyhow::Result<TriggerEvent>;

    /// Returns Delivered events older than the retry timeout to Pending
    ///
    /// Returns the number of events requeued.
    async fn requeue_expired(&self, retry_timeout: chrono::Duration) -> anyhow::Result<u32>;

    /// Number of Pending events in the queue
    async fn pending_count(&self) -> anyhow::Result<u64>;

    /// Retrieves a trigger event by id
    async fn get_trigger(&self, id: &TriggerId) -> anyhow::Result<Option<TriggerEvent>>;

    /// Deletes Acknowledged events that occurred before the given time
    ///
    /// Returns the number of events removed.
    async fn purge_acknowledged(&self, before: DateTime<Utc>) -> anyhow::Result<u32>;
}
