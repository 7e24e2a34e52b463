//! Domain error types
//!
//! Errors produced by domain validation and state machine rules. These are
//! synchronous, caller-facing failures: malformed input is rejected before
//! anything is persisted.

use thiserror::Error;

/// Errors that can occur in domain logic
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Attempted an invalid reminder lifecycle transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Attempted an invalid sync state transition
    #[error("Invalid sync transition from {from} to {to}")]
    InvalidSyncTransition { from: String, to: String },

    /// Latitude outside [-90, 90] or not finite
    #[error("Invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180] or not finite
    #[error("Invalid longitude: {0}")]
    InvalidLongitude(f64),

    /// Geofence radius must be positive and finite
    #[error("Invalid radius: {0} (must be positive and finite)")]
    InvalidRadius(f64),

    /// Fix accuracy must be non-negative and finite
    #[error("Invalid accuracy: {0}")]
    InvalidAccuracy(f64),

    /// Geofence failed validation and was rejected before persistence
    #[error("Malformed geofence: {0}")]
    MalformedGeofence(String),

    /// Reminder title must not be empty
    #[error("Reminder title must not be empty")]
    EmptyTitle,

    /// Sync cursor token failed validation
    #[error("Invalid cursor token: {0}")]
    InvalidCursor(String),

    /// Identifier string failed to parse
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidStateTransition {
            from: "Completed".to_string(),
            to: "Active".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Completed to Active"
        );

        let err = DomainError::InvalidRadius(-5.0);
        assert_eq!(err.to_string(), "Invalid radius: -5 (must be positive and finite)");

        let err = DomainError::EmptyTitle;
        assert_eq!(err.to_string(), "Reminder title must not be empty");
    }

    #[test]
    fn test_error_equality() {
        let a = DomainError::InvalidLatitude(91.0);
        let b = DomainError::InvalidLatitude(91.0);
        let c = DomainError::InvalidLatitude(-91.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_error_clone() {
        let err = DomainError::MalformedGeofence("radius is zero".to_string());
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
