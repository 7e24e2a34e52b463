//! Waymark Location - position acquisition and fix sampling
//!
//! Provides:
//! - A GeoClue2 provider that turns D-Bus location updates into the
//!   engine's position fixes
//! - A replay provider that feeds scripted fixes for tests and demos
//! - A sampler that filters the provider stream and keeps a bounded
//!   window of recent fixes
//!
//! ## Modules
//!
//! - [`sampler`] - Fix filtering, recent-fix window, degraded-mode gate
//! - [`geoclue`] - GeoClue2 D-Bus provider
//! - [`replay`] - Scripted JSONL provider

pub mod geoclue;
pub mod replay;
pub mod sampler;

pub use geoclue::GeoClueProvider;
pub use replay::ReplayProvider;
pub use sampler::{AcceptOutcome, LocationSampler, SamplerState};
