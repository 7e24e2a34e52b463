//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IReminderStore`] - Persistent storage for reminders, geofences, cursors
//! - [`ITriggerQueue`] - Durable at-least-once trigger delivery queue
//! - [`IRemoteStore`] - The account's remote reminder store (HTTP adapter)
//! - [`ILocationProvider`] - Position acquisition (GeoClue2, replay)
//! - [`IReminderObserver`] - Event publication to presentation collaborators

pub mod location_provider;
pub mod observer;
pub mod reminder_store;
pub mod remote_store;
pub mod trigger_queue;

pub use location_provider::{ILocationProvider, ProviderEvent};
pub use observer::{IReminderObserver, ObserverRegistry, ReminderEvent};
pub use reminder_store::{IReminderStore, ReminderFilter};
pub use remote_store::{ChangeBatch, IRemoteStore, PushOutcome, RemoteChange};
pub use trigger_queue::{EnqueueOutcome, ITriggerQueue};
