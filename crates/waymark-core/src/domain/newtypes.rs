//! Type-safe newtypes for domain identifiers and validated values
//!
//! Wraps primitive types in dedicated newtypes so that a latitude can never
//! be passed where a longitude is expected, and so that invalid values
//! (out-of-range coordinates, non-finite radii, empty cursor tokens) are
//! rejected at construction instead of propagating through the system.
//!
//! Validation lives in `new()`; serde round-trips go through the same
//! validation via `try_from` conversions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Identifier newtypes (UUID-backed)
// ============================================================================

/// Unique identifier for a reminder
///
/// Stable and globally unique; generated once at creation and shared by all
/// devices and the remote store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReminderId(Uuid);

impl ReminderId {
    /// Creates a new random reminder id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the nil id (all zeros)
    #[must_use]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for ReminderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReminderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReminderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("reminder id: {e}")))
    }
}

/// Unique identifier for a trigger event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// Creates a new random trigger id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TriggerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("trigger id: {e}")))
    }
}

/// Identifier of the device that performed an edit
///
/// The total order over device ids is the final tie-break in the
/// last-writer-wins ordering (revision, modified timestamp, device id),
/// which makes merge outcomes deterministic across devices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Creates a new random device id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("device id: {e}")))
    }
}

// ============================================================================
// Revision counter
// ============================================================================

/// Monotonically increasing per-entity revision counter
///
/// Strictly increases on every local or remote-applied mutation; used for
/// optimistic concurrency against the remote store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Revision of a freshly created entity
    #[must_use]
    pub fn initial() -> Self {
        Self(1)
    }

    /// Wraps a raw revision value
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next revision
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Validated coordinate and distance newtypes
// ============================================================================

/// Latitude in decimal degrees, validated to [-90, 90] and finite
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Latitude(f64);

impl Latitude {
    /// Creates a validated latitude
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidLatitude` if the value is not finite or
    /// lies outside [-90, 90].
    pub fn new(degrees: f64) -> Result<Self, DomainError> {
        if !degrees.is_finite() || !(-90.0..=90.0).contains(&degrees) {
            return Err(DomainError::InvalidLatitude(degrees));
        }
        Ok(Self(degrees))
    }

    /// Returns the value in decimal degrees
    #[must_use]
    pub fn degrees(&self) -> f64 {
        self.0
    }

    /// Returns the value in radians
    #[must_use]
    pub fn radians(&self) -> f64 {
        self.0.to_radians()
    }
}

impl TryFrom<f64> for Latitude {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Latitude> for f64 {
    fn from(lat: Latitude) -> Self {
        lat.0
    }
}

impl fmt::Display for Latitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longitude in decimal degrees, validated to [-180, 180] and finite
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Longitude(f64);

impl Longitude {
    /// Creates a validated longitude
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidLongitude` if the value is not finite or
    /// lies outside [-180, 180].
    pub fn new(degrees: f64) -> Result<Self, DomainError> {
        if !degrees.is_finite() || !(-180.0..=180.0).contains(&degrees) {
            return Err(DomainError::InvalidLongitude(degrees));
        }
        Ok(Self(degrees))
    }

    /// Returns the value in decimal degrees
    #[must_use]
    pub fn degrees(&self) -> f64 {
        self.0
    }

    /// Returns the value in radians
    #[must_use]
    pub fn radians(&self) -> f64 {
        self.0.to_radians()
    }
}

impl TryFrom<f64> for Longitude {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Longitude> for f64 {
    fn from(lon: Longitude) -> Self {
        lon.0
    }
}

impl fmt::Display for Longitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geofence radius in meters, validated to be positive and finite
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RadiusMeters(f64);

impl RadiusMeters {
    /// Creates a validated radius
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRadius` if the value is not finite or
    /// not strictly positive.
    pub fn new(meters: f64) -> Result<Self, DomainError> {
        if !meters.is_finite() || meters <= 0.0 {
            return Err(DomainError::InvalidRadius(meters));
        }
        Ok(Self(meters))
    }

    /// Returns the radius in meters
    #[must_use]
    pub fn meters(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for RadiusMeters {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RadiusMeters> for f64 {
    fn from(radius: RadiusMeters) -> Self {
        radius.0
    }
}

impl fmt::Display for RadiusMeters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Reported accuracy radius of a position fix in meters
///
/// Non-negative and finite. A fix with accuracy 0 is treated as exact.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct AccuracyMeters(f64);

impl AccuracyMeters {
    /// Creates a validated accuracy value
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidAccuracy` if the value is negative or
    /// not finite.
    pub fn new(meters: f64) -> Result<Self, DomainError> {
        if !meters.is_finite() || meters < 0.0 {
            return Err(DomainError::InvalidAccuracy(meters));
        }
        Ok(Self(meters))
    }

    /// Returns the accuracy radius in meters
    #[must_use]
    pub fn meters(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for AccuracyMeters {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccuracyMeters> for f64 {
    fn from(accuracy: AccuracyMeters) -> Self {
        accuracy.0
    }
}

impl fmt::Display for AccuracyMeters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "±{}m", self.0)
    }
}

// ============================================================================
// Sync cursor token
// ============================================================================

/// Opaque change-feed watermark issued by the remote store
///
/// Sent back on the next "changes since" query to resume incrementally.
/// Never interpreted locally beyond non-emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CursorToken(String);

impl CursorToken {
    /// Creates a validated cursor token
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCursor` if the token is empty or
    /// whitespace-only.
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.trim().is_empty() {
            return Err(DomainError::InvalidCursor(
                "token must not be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Returns the token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CursorToken {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CursorToken> for String {
    fn from(token: CursorToken) -> Self {
        token.0
    }
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
