//! Trigger events and their delivery lifecycle
//!
//! A trigger event records a geofence boundary crossing. Events are durable
//! until acknowledged and follow at-least-once delivery:
//!
//! ```text
//!            dequeue_next            acknowledge
//!  Pending ---------------> Delivered ------------> Acknowledged
//!     ^                         |
//!     |    retry timeout        |
//!     +-------------------------+
//! ```
//!
//! Consumers must therefore be idempotent on (reminder id, transition),
//! which the queue's dedup rule makes safe.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::fix::PositionFix;
use super::newtypes::{ReminderId, TriggerId};

/// Direction of a geofence boundary crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// The user entered the region
    Enter,
    /// The user left the region
    Exit,
}

impl Transition {
    /// Returns the canonical name for persistence and logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Enter => "enter",
            Transition::Exit => "exit",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Transition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(Transition::Enter),
            "exit" => Ok(Transition::Exit),
            other => Err(DomainError::InvalidId(format!(
                "unknown transition: {other}"
            ))),
        }
    }
}

/// Delivery state of a trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Queued, not yet handed to a consumer
    Pending,
    /// Handed to a consumer, awaiting acknowledgment
    Delivered,
    /// Acknowledged by the consumer; terminal
    Acknowledged,
}

impl DeliveryState {
    /// Returns the canonical name for persistence and logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Acknowledged => "acknowledged",
        }
    }

    /// Whether a transition to `target` is legal
    #[must_use]
    pub fn can_transition_to(&self, target: &DeliveryState) -> bool {
        matches!(
            (self, target),
            (DeliveryState::Pending, DeliveryState::Delivered)
                // Redelivery after the retry timeout
                | (DeliveryState::Delivered, DeliveryState::Pending)
                | (DeliveryState::Delivered, DeliveryState::Acknowledged)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DeliveryState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "delivered" => Ok(DeliveryState::Delivered),
            "acknowledged" => Ok(DeliveryState::Acknowledged),
            other => Err(DomainError::InvalidId(format!(
                "unknown delivery state: {other}"
            ))),
        }
    }
}

/// A durable record of a geofence boundary crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    id: TriggerId,
    reminder_id: ReminderId,
    transition: Transition,
    fix: PositionFix,
    occurred_at: DateTime<Utc>,
    delivery: DeliveryState,
    attempts: u32,
    delivered_at: Option<DateTime<Utc>>,
}

impl TriggerEvent {
    /// Creates a new Pending trigger event for a boundary crossing
    #[must_use]
    pub fn new(reminder_id: ReminderId, transition: Transition, fix: PositionFix) -> Self {
        Self {
            id: TriggerId::new(),
            reminder_id,
            transition,
            fix,
            occurred_at: Utc::now(),
            delivery: DeliveryState::Pending,
            attempts: 0,
            delivered_at: None,
        }
    }

    /// Reconstructs an event from persisted parts
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        id: TriggerId,
        reminder_id: ReminderId,
        transition: Transition,
        fix: PositionFix,
        occurred_at: DateTime<Utc>,
        delivery: DeliveryState,
        attempts: u32,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            reminder_id,
            transition,
            fix,
            occurred_at,
            delivery,
            attempts,
            delivered_at,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Event id
    #[must_use]
    pub fn id(&self) -> &TriggerId {
        &self.id
    }

    /// Owning reminder's id
    #[must_use]
    pub fn reminder_id(&self) -> &ReminderId {
        &self.reminder_id
    }

    /// Crossing direction
    #[must_use]
    pub fn transition(&self) -> Transition {
        self.transition
    }

    /// The fix that caused the crossing
    #[must_use]
    pub fn fix(&self) -> &PositionFix {
        &self.fix
    }

    /// When the crossing was detected
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Current delivery state
    #[must_use]
    pub fn delivery(&self) -> DeliveryState {
        self.delivery
    }

    /// Number of delivery attempts so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the last delivery attempt was made
    #[must_use]
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    // ========================================================================
    // Delivery lifecycle
    // ========================================================================

    /// Replaces the payload of a still-Pending event with a newer crossing
    ///
    /// This is the queue's dedup rule: the newer fix and timestamp replace
    /// the pending payload but the event identity is preserved, so consumers
    /// never see two Pending events for the same (reminder, transition).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` if the event is no
    /// longer Pending.
    pub fn coalesce(&mut self, fix: PositionFix, occurred_at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.delivery != DeliveryState::Pending {
            return Err(DomainError::InvalidStateTransition {
                from: self.delivery.to_string(),
                to: "pending (coalesce)".to_string(),
            });
        }
        self.fix = fix;
        self.occurred_at = occurred_at;
        Ok(())
    }

    /// Marks the event handed to a consumer
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` unless the event is
    /// Pending.
    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(DeliveryState::Delivered)?;
        self.attempts += 1;
        self.delivered_at = Some(now);
        Ok(())
    }

    /// Acknowledges the event; terminal
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` unless the event is
    /// Delivered.
    pub fn acknowledge(&mut self) -> Result<(), DomainError> {
        self.transition_to(DeliveryState::Acknowledged)
    }

    /// Returns a Delivered event to Pending for redelivery
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidStateTransition` unless the event is
    /// Delivered.
    pub fn requeue(&mut self) -> Result<(), DomainError> {
        self.transition_to(DeliveryState::Pending)?;
        self.delivered_at = None;
        Ok(())
    }

    /// Whether a Delivered event has waited past the retry timeout
    #[must_use]
    pub fn is_redelivery_due(&self, retry_timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.delivery == DeliveryState::Delivered
            && self
                .delivered_at
                .is_some_and(|at| now - at >= retry_timeout)
    }

    fn transition_to(&mut self, target: DeliveryState) -> Result<(), DomainError> {
        if !self.delivery.can_transition_to(&target) {
            return Err(DomainError::InvalidStateTransition {
                from: self.delivery.to_string(),
                to: target.to_string(),
            });
        }
        self.delivery = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(seq: u64) -> PositionFix {
        PositionFix::new(52.52, 13.405, 10.0, Utc::now(), seq).unwrap()
    }

    fn event() -> TriggerEvent {
        TriggerEvent::new(ReminderId::new(), Transition::Enter, fix(1))
    }

    mod delivery_state_tests {
        use super::*;

        #[test]
        fn test_legal_transitions() {
            assert!(DeliveryState::Pending.can_transition_to(&DeliveryState::Delivered));
            assert!(DeliveryState::Delivered.can_transition_to(&DeliveryState::Acknowledged));
            assert!(DeliveryState::Delivered.can_transition_to(&DeliveryState::Pending));
        }

        #[test]
        fn test_illegal_transitions() {
            assert!(!DeliveryState::Pending.can_transition_to(&DeliveryState::Acknowledged));
            assert!(!DeliveryState::Acknowledged.can_transition_to(&DeliveryState::Pending));
            assert!(!DeliveryState::Acknowledged.can_transition_to(&DeliveryState::Delivered));
        }

        #[test]
        fn test_name_parse_roundtrip() {
            for state in [
                DeliveryState::Pending,
                DeliveryState::Delivered,
                DeliveryState::Acknowledged,
            ] {
                let parsed: DeliveryState = state.name().parse().unwrap();
                assert_eq!(parsed, state);
            }
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_new_event_is_pending() {
            let event = event();
            assert_eq!(event.delivery(), DeliveryState::Pending);
            assert_eq!(event.attempts(), 0);
            assert!(event.delivered_at().is_none());
        }

        #[test]
        fn test_full_delivery_cycle() {
            let mut event = event();
            let now = Utc::now();

            event.mark_delivered(now).unwrap();
            assert_eq!(event.delivery(), DeliveryState::Delivered);
            assert_eq!(event.attempts(), 1);
            assert_eq!(event.delivered_at(), Some(now));

            event.acknowledge().unwrap();
            assert_eq!(event.delivery(), DeliveryState::Acknowledged);
        }

        #[test]
        fn test_requeue_counts_attempts() {
            let mut event = event();
            event.mark_delivered(Utc::now()).unwrap();
            event.requeue().unwrap();
            assert_eq!(event.delivery(), DeliveryState::Pending);
            assert!(event.delivered_at().is_none());

            event.mark_delivered(Utc::now()).unwrap();
            assert_eq!(event.attempts(), 2);
        }

        #[test]
        fn test_acknowledge_requires_delivered() {
            let mut event = event();
            let result = event.acknowledge();
            assert!(matches!(
                result,
                Err(DomainError::InvalidStateTransition { .. })
            ));
        }

        #[test]
        fn test_coalesce_replaces_payload_keeps_id() {
            let mut event = event();
            let id = *event.id();
            let newer = fix(9);
            let at = Utc::now() + chrono::Duration::seconds(5);

            event.coalesce(newer, at).unwrap();
            assert_eq!(event.id(), &id);
            assert_eq!(event.fix().seq, 9);
            assert_eq!(event.occurred_at(), at);
        }

        #[test]
        fn test_coalesce_rejected_after_delivery() {
            let mut event = event();
            event.mark_delivered(Utc::now()).unwrap();
            assert!(event.coalesce(fix(2), Utc::now()).is_err());
        }

        #[test]
        fn test_redelivery_due() {
            let mut event = event();
            let delivered = Utc::now() - chrono::Duration::seconds(300);
            event.mark_delivered(delivered).unwrap();

            let timeout = chrono::Duration::seconds(120);
            assert!(event.is_redelivery_due(timeout, Utc::now()));
            assert!(!event.is_redelivery_due(timeout, delivered + chrono::Duration::seconds(10)));
        }
    }
}
