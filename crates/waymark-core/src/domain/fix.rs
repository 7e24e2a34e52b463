//! Position fixes from the location provider
//!
//! Fixes are ephemeral: only the sampler's bounded window of recent fixes is
//! retained for evaluation hysteresis, and nothing is persisted beyond the
//! trigger events they cause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{AccuracyMeters, Latitude, Longitude};

/// A single position observation from the location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude of the fix
    pub latitude: Latitude,
    /// Longitude of the fix
    pub longitude: Longitude,
    /// Reported accuracy radius of the fix
    pub accuracy: AccuracyMeters,
    /// Provider timestamp of the observation
    pub recorded_at: DateTime<Utc>,
    /// Monotonic sequence number assigned by the provider adapter
    ///
    /// Strictly increases per provider session; the sampler drops fixes
    /// arriving out of order.
    pub seq: u64,
}

impl PositionFix {
    /// Creates a validated position fix from raw provider values
    ///
    /// # Errors
    ///
    /// Returns the corresponding `DomainError` if any coordinate or the
    /// accuracy fails validation.
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
        recorded_at: DateTime<Utc>,
        seq: u64,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            latitude: Latitude::new(latitude)?,
            longitude: Longitude::new(longitude)?,
            accuracy: AccuracyMeters::new(accuracy_m)?,
            recorded_at,
            seq,
        })
    }

    /// Age of the fix relative to `now`
    ///
    /// Clamps to zero if the provider clock runs ahead of ours.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.recorded_at).max(chrono::Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_coordinates() {
        let fix = PositionFix::new(52.52, 13.405, 10.0, Utc::now(), 1);
        assert!(fix.is_ok());

        let bad_lat = PositionFix::new(95.0, 13.405, 10.0, Utc::now(), 1);
        assert!(matches!(bad_lat, Err(DomainError::InvalidLatitude(_))));

        let bad_acc = PositionFix::new(52.52, 13.405, -1.0, Utc::now(), 1);
        assert!(matches!(bad_acc, Err(DomainError::InvalidAccuracy(_))));
    }

    #[test]
    fn test_age_clamps_future_fixes() {
        let now = Utc::now();
        let future = PositionFix::new(0.0, 0.0, 5.0, now + chrono::Duration::seconds(30), 1)
            .unwrap();
        assert_eq!(future.age(now), chrono::Duration::zero());

        let past = PositionFix::new(0.0, 0.0, 5.0, now - chrono::Duration::seconds(30), 2)
            .unwrap();
        assert_eq!(past.age(now), chrono::Duration::seconds(30));
    }

    #[test]
    fn test_serde_roundtrip() {
        let fix = PositionFix::new(48.8566, 2.3522, 15.0, Utc::now(), 42).unwrap();
        let json = serde_json::to_string(&fix).unwrap();
        let back: PositionFix = serde_json::from_str(&json).unwrap();
        assert_eq!(fix, back);
    }
}
