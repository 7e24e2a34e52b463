//! Reminder observer port (driving/primary port)
//!
//! This module defines the event interface consumed by the presentation
//! collaborators that live outside this engine: notification banners, list
//! views, sync status indicators. The engine publishes; it never waits for
//! user interaction.
//!
//! ## Design Notes
//!
//! - Observer callbacks return nothing: a failing or slow observer must
//!   not fail the pipeline that produced the event. Implementations do
//!   their own error handling.
//! - Conflict resolutions carry both copies. The losing write is never
//!   silently dropped; whether to replay it as a new edit is the
//!   subscriber's decision.
//! - [`ObserverRegistry`] is the shared fan-out used by the service and
//!   the sync engine; subscription is identity-based (`Arc::ptr_eq`).

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::newtypes::ReminderId;
use crate::domain::{Reminder, TriggerEvent};

// ============================================================================
// ReminderEvent enum
// ============================================================================

/// An event published to reminder observers
#[derive(Debug, Clone)]
pub enum ReminderEvent {
    /// A reminder was created locally
    Created { reminder: Reminder },
    /// A reminder was edited locally or updated from the remote store
    Updated { reminder: Reminder },
    /// A reminder reached the Completed state
    Completed { reminder: Reminder },
    /// A reminder was tombstoned
    Deleted { id: ReminderId },
    /// A geofence transition fired and was enqueued for delivery
    Triggered {
        reminder: Reminder,
        trigger: TriggerEvent,
    },
    /// A sync conflict was resolved; the losing copy is surfaced here
    ConflictResolved {
        /// The copy both sides now store
        winner: Reminder,
        /// The overwritten copy
        loser: Reminder,
        /// True when the remote side won the merge
        remote_won: bool,
    },
    /// Consecutive sync failures passed the configured threshold
    SyncDegraded { consecutive_failures: u32 },
    /// A sync cycle succeeded after the engine was degraded
    SyncRecovered,
    /// The location provider reported an outage; evaluation is paused
    ProviderDegraded { reason: String },
    /// The location provider recovered; evaluation resumes
    ProviderRestored,
}

impl ReminderEvent {
    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ReminderEvent::Created { .. } => "created",
            ReminderEvent::Updated { .. } => "updated",
            ReminderEvent::Completed { .. } => "completed",
            ReminderEvent::Deleted { .. } => "deleted",
            ReminderEvent::Triggered { .. } => "triggered",
            ReminderEvent::ConflictResolved { .. } => "conflict_resolved",
            ReminderEvent::SyncDegraded { .. } => "sync_degraded",
            ReminderEvent::SyncRecovered => "sync_recovered",
            ReminderEvent::ProviderDegraded { .. } => "provider_degraded",
            ReminderEvent::ProviderRestored => "provider_restored",
        }
    }
}

// ============================================================================
// IReminderObserver trait
// ============================================================================

/// Observer for reminder engine events
///
/// ## Threading
///
/// Callbacks are invoked from the engine's async tasks, so implementations
/// must be thread-safe and should return promptly; anything slow belongs
/// on the observer's own task.
#[async_trait::async_trait]
pub trait IReminderObserver: Send + Sync {
    /// Called for every published event
    async fn on_event(&self, event: &ReminderEvent);
}

// ============================================================================
// ObserverRegistry struct
// ============================================================================

/// Shared observer fan-out
///
/// Cloning the registry shares the subscriber list; the service and the
/// sync engine publish through clones of the same registry.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<Vec<Arc<dyn IReminderObserver>>>>,
}

impl ObserverRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer
    pub async fn subscribe(&self, observer: Arc<dyn IReminderObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Removes an observer by identity
    pub async fn unsubscribe(&self, observer: &Arc<dyn IReminderObserver>) {
        self.observers
            .write()
            .await
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Number of subscribed observers
    pub async fn count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Publishes an event to every subscriber in subscription order
    pub async fn notify(&self, event: &ReminderEvent) {
        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_event(event).await;
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl IReminderObserver for CountingObserver {
        async fn on_event(&self, _event: &ReminderEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_all_subscribers() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(CountingObserver {
            seen: AtomicUsize::new(0),
        });
        let b = Arc::new(CountingObserver {
            seen: AtomicUsize::new(0),
        });

        registry.subscribe(a.clone()).await;
        registry.subscribe(b.clone()).await;
        registry.notify(&ReminderEvent::SyncRecovered).await;

        assert_eq!(a.seen.load(Ordering::SeqCst), 1);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(CountingObserver {
            seen: AtomicUsize::new(0),
        });
        let as_dyn: Arc<dyn IReminderObserver> = observer.clone();

        registry.subscribe(as_dyn.clone()).await;
        assert_eq!(registry.count().await, 1);

        registry.unsubscribe(&as_dyn).await;
        assert_eq!(registry.count().await, 0);

        registry.notify(&ReminderEvent::SyncRecovered).await;
        assert_eq!(observer.seen.load(Ordering::SeqCst), 0);
    }
}
