//! Location provider port (driven/secondary port)
//!
//! This module defines the interface for position acquisition backends.
//! The primary implementation talks to GeoClue2 over D-Bus; a replay
//! implementation feeds scripted fixes for tests and demos.
//!
//! ## Design Notes
//!
//! - `start` hands back a bounded channel receiver instead of using a
//!   callback trait: fixes arrive from an event loop the adapter owns,
//!   and the consumer decides how to pace itself. When the channel is
//!   full the adapter drops the event rather than blocking its event
//!   loop; the sampler's window keeps the most recent accepted fixes.
//! - Availability changes travel in-band as [`ProviderEvent`] variants so
//!   the consumer observes them in order with the fixes.

use crate::domain::PositionFix;

// ============================================================================
// ProviderEvent enum
// ============================================================================

/// An event emitted by a location provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A new position fix
    Fix(PositionFix),
    /// The provider lost its position source (service gone, no
    /// permission, hardware off); fixes stop until restored
    Unavailable {
        /// Adapter-specific description of the outage
        reason: String,
    },
    /// The provider recovered and fixes will resume
    Restored,
}

// ============================================================================
// ILocationProvider trait
// ============================================================================

/// Port trait for position acquisition
///
/// ## Implementation Notes
///
/// - `start` may be called once per provider instance; the stream ends
///   (receiver yields `None`) after `stop` or on unrecoverable failure.
/// - Implementations assign the monotonically increasing `seq` on every
///   fix; consumers use it to discard reordered or duplicated fixes.
/// - Outages must be reported as `Unavailable` followed by `Restored`,
///   not by silently stopping the stream.
#[async_trait::async_trait]
pub trait ILocationProvider: Send + Sync {
    /// Starts the provider and returns its event stream
    async fn start(&self) -> anyhow::Result<tokio::sync::mpsc::Receiver<ProviderEvent>>;

    /// Stops the provider; the event stream ends
    async fn stop(&self) -> anyhow::Result<()>;
}
