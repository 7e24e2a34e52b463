//! Use cases (interactors) for Waymark
//!
//! This module contains the application use cases that orchestrate
//! domain entities and port interfaces. Use cases are thin coordinators
//! that delegate business rules to domain methods and I/O to ports.
//!
//! ## Use Cases
//!
//! - [`ReminderService`] - Reminder CRUD, the fix-evaluation pipeline
//!   stage, trigger acknowledgment, and observer subscription

pub mod reminder_service;

pub use reminder_service::{
    GeofenceSpec, NewReminder, ReminderService, UpdateReminder,
};
