//! Geofence definitions
//!
//! A geofence is a circular region bound 1:1 to a reminder. Reminders
//! without a geofence are manual/time-only reminders and never enter the
//! evaluation pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{Latitude, Longitude, RadiusMeters, ReminderId};
use super::trigger::Transition;

/// Which boundary transitions a geofence fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOn {
    /// Fire when the user enters the region
    OnEnter,
    /// Fire when the user leaves the region
    OnExit,
    /// Fire on both transitions
    Both,
}

impl TriggerOn {
    /// Returns the canonical name for persistence and logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TriggerOn::OnEnter => "on_enter",
            TriggerOn::OnExit => "on_exit",
            TriggerOn::Both => "both",
        }
    }

    /// Whether this setting covers the given transition
    #[must_use]
    pub fn covers(&self, transition: Transition) -> bool {
        match self {
            TriggerOn::OnEnter => transition == Transition::Enter,
            TriggerOn::OnExit => transition == Transition::Exit,
            TriggerOn::Both => true,
        }
    }
}

impl fmt::Display for TriggerOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TriggerOn {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_enter" => Ok(TriggerOn::OnEnter),
            "on_exit" => Ok(TriggerOn::OnExit),
            "both" => Ok(TriggerOn::Both),
            other => Err(DomainError::InvalidId(format!(
                "unknown trigger setting: {other}"
            ))),
        }
    }
}

/// A circular region attached to exactly one reminder
///
/// The armed flag gates evaluation: a fired one-shot fence disarms itself
/// (via the service applying the evaluation outcome) and stays silent until
/// it is explicitly re-armed or its region is edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    reminder_id: ReminderId,
    latitude: Latitude,
    longitude: Longitude,
    radius: RadiusMeters,
    trigger_on: TriggerOn,
    armed: bool,
    one_shot: bool,
}

impl Geofence {
    /// Creates a validated, armed geofence
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedGeofence` if the center or radius is
    /// invalid. Malformed geofences are rejected here and never persisted.
    pub fn new(
        reminder_id: ReminderId,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        trigger_on: TriggerOn,
        one_shot: bool,
    ) -> Result<Self, DomainError> {
        let latitude =
            Latitude::new(latitude).map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;
        let longitude = Longitude::new(longitude)
            .map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;
        let radius = RadiusMeters::new(radius_m)
            .map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;

        Ok(Self {
            reminder_id,
            latitude,
            longitude,
            radius,
            trigger_on,
            armed: true,
            one_shot,
        })
    }

    /// Reconstructs a geofence from already-validated parts (persistence)
    #[must_use]
    pub fn from_parts(
        reminder_id: ReminderId,
        latitude: Latitude,
        longitude: Longitude,
        radius: RadiusMeters,
        trigger_on: TriggerOn,
        armed: bool,
        one_shot: bool,
    ) -> Self {
        Self {
            reminder_id,
            latitude,
            longitude,
            radius,
            trigger_on,
            armed,
            one_shot,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// The owning reminder's id
    #[must_use]
    pub fn reminder_id(&self) -> &ReminderId {
        &self.reminder_id
    }

    /// Center latitude
    #[must_use]
    pub fn latitude(&self) -> Latitude {
        self.latitude
    }

    /// Center longitude
    #[must_use]
    pub fn longitude(&self) -> Longitude {
        self.longitude
    }

    /// Region radius
    #[must_use]
    pub fn radius(&self) -> RadiusMeters {
        self.radius
    }

    /// Transition coverage setting
    #[must_use]
    pub fn trigger_on(&self) -> TriggerOn {
        self.trigger_on
    }

    /// Whether the fence is currently evaluated
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the fence disarms after its first trigger
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Disarms the fence (one-shot fired)
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Re-arms the fence for another trigger cycle
    pub fn rearm(&mut self) {
        self.armed = true;
    }

    /// Replaces the region and re-arms the fence
    ///
    /// Editing a fence is an explicit statement that the user wants it live
    /// again, regardless of earlier triggers.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedGeofence` for invalid values; the
    /// existing region is left untouched on error.
    pub fn update_region(
        &mut self,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> Result<(), DomainError> {
        let latitude =
            Latitude::new(latitude).map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;
        let longitude = Longitude::new(longitude)
            .map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;
        let radius = RadiusMeters::new(radius_m)
            .map_err(|e| DomainError::MalformedGeofence(e.to_string()))?;

        self.latitude = latitude;
        self.longitude = longitude;
        self.radius = radius;
        self.armed = true;
        Ok(())
    }

    /// Changes the transition coverage setting
    pub fn set_trigger_on(&mut self, trigger_on: TriggerOn) {
        self.trigger_on = trigger_on;
    }
}
