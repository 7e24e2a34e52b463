//! Domain entities and business logic
//!
//! This module contains the core domain types for Waymark:
//! - Newtypes for type-safe identifiers and validated coordinates
//! - Reminder entity with lifecycle and sync state machines
//! - Geofence definitions and the pure evaluation core
//! - Position fixes and trigger events
//! - Sync cursor watermarks
//! - Domain-specific error types

pub mod cursor;
pub mod errors;
pub mod evaluator;
pub mod fix;
pub mod geofence;
pub mod newtypes;
pub mod reminder;
pub mod trigger;

// Re-export commonly used types
pub use cursor::{EntityKind, SyncCursor};
pub use errors::DomainError;
pub use evaluator::{evaluate, haversine_m, Evaluation, EvaluatorState, FiredTransition};
pub use fix::PositionFix;
pub use geofence::{Geofence, TriggerOn};
pub use newtypes::*;
pub use reminder::{Reminder, ReminderState, SyncState};
pub use trigger::{DeliveryState, Transition, TriggerEvent};
