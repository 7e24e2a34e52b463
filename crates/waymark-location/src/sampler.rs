//! Fix sampling and filtering
//!
//! Providers push [`ProviderEvent`]s into a bounded channel; the
//! [`LocationSampler`] consumes them, discards fixes that are out of order
//! or stale, keeps a small window of recent fixes, and forwards accepted
//! fixes to the evaluation pipeline.
//!
//! ## Architecture
//!
//! ```text
//! GeoClue2 signals / replay script
//!       │
//!       ▼
//!  provider task  ──→  mpsc::channel  ──→  LocationSampler  ──→  evaluation pipeline
//! ```
//!
//! While the provider is degraded the sampler stops forwarding and
//! `latest()` returns nothing, so the pipeline pauses instead of
//! evaluating positions it can no longer trust.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use waymark_core::config::LocationConfig;
use waymark_core::domain::PositionFix;
use waymark_core::ports::location_provider::ProviderEvent;
use waymark_core::ports::observer::{ObserverRegistry, ReminderEvent};

// ============================================================================
// AcceptOutcome enum
// ============================================================================

/// Outcome of offering a fix to the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The fix was recorded and should be forwarded
    Accepted,
    /// The provider is degraded; the fix was ignored
    Degraded,
    /// The sequence number did not advance (reordered or duplicated fix)
    OutOfOrder,
    /// The fix was already older than the staleness window on arrival
    Stale,
}

// ============================================================================
// SamplerState struct
// ============================================================================

/// Bounded window of recent fixes with ingest filtering
///
/// Pure bookkeeping, no channels or clocks of its own; callers pass `now`
/// so tests control time. The window drops its oldest entry on overflow
/// because only recent positions matter for geofence evaluation.
pub struct SamplerState {
    /// Recent accepted fixes, oldest first
    window: VecDeque<PositionFix>,
    /// Maximum number of retained fixes
    capacity: usize,
    /// Age beyond which a fix is no longer trusted
    staleness: Duration,
    /// Sequence number of the last accepted fix
    last_seq: Option<u64>,
    /// Set while the provider reports an outage
    degraded: bool,
}

impl SamplerState {
    /// Creates an empty sampler window
    pub fn new(capacity: usize, staleness_secs: u64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            staleness: Duration::seconds(staleness_secs as i64),
            last_seq: None,
            degraded: false,
        }
    }

    /// Offers a fix for recording
    ///
    /// Accepted fixes land in the window (dropping the oldest entry when
    /// full) and advance the sequence watermark. Rejected fixes leave the
    /// state untouched.
    pub fn offer(&mut self, fix: PositionFix, now: DateTime<Utc>) -> AcceptOutcome {
        if self.degraded {
            return AcceptOutcome::Degraded;
        }

        if let Some(last) = self.last_seq {
            if fix.seq <= last {
                return AcceptOutcome::OutOfOrder;
            }
        }

        // Providers can hand out a cached position right after starting;
        // evaluating it could fire triggers for somewhere the user left
        // minutes ago.
        if fix.age(now) > self.staleness {
            return AcceptOutcome::Stale;
        }

        self.last_seq = Some(fix.seq);
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(fix);
        AcceptOutcome::Accepted
    }

    /// Most recent fix, if it is still fresh and the provider is healthy
    #[must_use]
    pub fn latest(&self, now: DateTime<Utc>) -> Option<PositionFix> {
        if self.degraded {
            return None;
        }
        self.window
            .back()
            .filter(|fix| fix.age(now) <= self.staleness)
            .copied()
    }

    /// Recent fixes, oldest first
    pub fn window(&self) -> impl Iterator<Item = &PositionFix> {
        self.window.iter()
    }

    /// Marks the provider as unavailable; fixes stop being served
    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    /// Clears the degraded flag after the provider recovers
    pub fn mark_restored(&mut self) {
        self.degraded = false;
    }

    /// True while the provider reports an outage
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Number of retained fixes
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no fixes are retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

// ============================================================================
// LocationSampler struct
// ============================================================================

/// Consumes a provider event stream and feeds the evaluation pipeline
///
/// Availability transitions are published to observers exactly once per
/// transition, however often the provider repeats itself.
pub struct LocationSampler {
    state: Arc<Mutex<SamplerState>>,
    observers: ObserverRegistry,
}

impl LocationSampler {
    /// Creates a sampler sized from the location configuration
    pub fn new(config: &LocationConfig, observers: ObserverRegistry) -> Self {
        Self {
            state: Arc::new(Mutex::new(SamplerState::new(
                config.buffer_capacity,
                config.staleness_secs,
            ))),
            observers,
        }
    }

    /// Most recent trustworthy fix
    pub async fn latest(&self) -> Option<PositionFix> {
        self.state.lock().await.latest(Utc::now())
    }

    /// True while the provider reports an outage
    pub async fn is_degraded(&self) -> bool {
        self.state.lock().await.is_degraded()
    }

    /// Consumes provider events until the stream ends
    ///
    /// Returns when the provider closes its channel (stop or script
    /// exhaustion) or when the pipeline receiver is dropped.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ProviderEvent>,
        pipeline: mpsc::Sender<PositionFix>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ProviderEvent::Fix(fix) => {
                    let outcome = self.state.lock().await.offer(fix, Utc::now());
                    match outcome {
                        AcceptOutcome::Accepted => {
                            debug!(
                                seq = fix.seq,
                                latitude = fix.latitude.degrees(),
                                longitude = fix.longitude.degrees(),
                                accuracy_m = fix.accuracy.meters(),
                                "Accepted position fix"
                            );
                            if pipeline.send(fix).await.is_err() {
                                info!("Evaluation pipeline closed, stopping sampler");
                                return;
                            }
                        }
                        AcceptOutcome::Degraded => {
                            debug!(seq = fix.seq, "Ignoring fix while provider is degraded");
                        }
                        AcceptOutcome::OutOfOrder => {
                            debug!(seq = fix.seq, "Discarding out-of-order fix");
                        }
                        AcceptOutcome::Stale => {
                            debug!(seq = fix.seq, "Discarding stale fix");
                        }
                    }
                }
                ProviderEvent::Unavailable { reason } => {
                    let already_degraded = {
                        let mut state = self.state.lock().await;
                        let was = state.is_degraded();
                        state.mark_degraded();
                        was
                    };
                    if already_degraded {
                        debug!(reason = %reason, "Location provider still unavailable");
                    } else {
                        warn!(reason = %reason, "Location provider unavailable, pausing evaluation");
                        self.observers
                            .notify(&ReminderEvent::ProviderDegraded { reason })
                            .await;
                    }
                }
                ProviderEvent::Restored => {
                    let was_degraded = {
                        let mut state = self.state.lock().await;
                        let was = state.is_degraded();
                        state.mark_restored();
                        was
                    };
                    if was_degraded {
                        info!("Location provider restored, resuming evaluation");
                        self.observers.notify(&ReminderEvent::ProviderRestored).await;
                    } else {
                        debug!("Provider reported restored while healthy");
                    }
                }
            }
        }
        info!("Provider event stream ended");
    }
}

// ============================================================================
// Tests
// ============================================================================
