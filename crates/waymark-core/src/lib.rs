//! Waymark Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Reminder`, `Geofence`, `PositionFix`, `TriggerEvent`, `SyncCursor`
//! - **Geofence evaluation** - pure great-circle containment with debounce hysteresis
//! - **Use cases** - `ReminderService`, the facade orchestrating stores, queue and observers
//! - **Port definitions** - Traits for adapters: `IReminderStore`, `ITriggerQueue`,
//!   `IRemoteStore`, `ILocationProvider`, `IReminderObserver`
//! - **State machines** - reminder lifecycle and per-entity sync states
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement.
//! Use cases orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
