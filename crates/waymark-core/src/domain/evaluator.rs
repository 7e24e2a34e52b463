//! Pure geofence evaluation core
//!
//! Stateless with respect to the outside world: `evaluate` takes a fix, the
//! previous [`EvaluatorState`] and the candidate fences, and returns the next
//! state plus the transitions that fired. All hysteresis lives in the state
//! value, so the function is trivially testable and the caller decides where
//! the state lives (in-memory, per session).
//!
//! Rules:
//! - containment: great-circle distance ≤ radius + fix accuracy;
//! - uncertainty: a fence whose radius is ≤ the fix accuracy is
//!   indeterminate for that fix; no membership change, streaks reset;
//! - debounce: a membership flip must be observed on N consecutive fixes
//!   (config, default 2) before it commits and may emit a transition;
//! - one-shot fences report `disarm = true` on their first covered firing.
//!
//! Callers must pass every fence they want tracked: grid candidates near the
//! fix plus any fence currently held in the state (`tracked_ids`), so that
//! an exit far from the fence's cells is still observed.

use std::collections::{HashMap, HashSet};

use super::fix::PositionFix;
use super::geofence::Geofence;
use super::newtypes::{Latitude, Longitude, ReminderId};
use super::trigger::Transition;

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (haversine)
#[must_use]
pub fn haversine_m(lat1: Latitude, lon1: Longitude, lat2: Latitude, lon2: Longitude) -> f64 {
    let phi1 = lat1.radians();
    let phi2 = lat2.radians();
    let d_phi = (lat2.degrees() - lat1.degrees()).to_radians();
    let d_lambda = (lon2.degrees() - lon1.degrees()).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Containment of a fix relative to a fence, for one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Containment {
    Inside,
    Outside,
    /// Fix accuracy swallows the fence radius; nothing can be concluded
    Indeterminate,
}

fn containment(fence: &Geofence, fix: &PositionFix) -> Containment {
    if fence.radius().meters() <= fix.accuracy.meters() {
        return Containment::Indeterminate;
    }
    let distance = haversine_m(
        fix.latitude,
        fix.longitude,
        fence.latitude(),
        fence.longitude(),
    );
    if distance <= fence.radius().meters() + fix.accuracy.meters() {
        Containment::Inside
    } else {
        Containment::Outside
    }
}

/// A membership flip awaiting debounce confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFlip {
    toward_inside: bool,
    streak: u8,
}

/// Hysteresis state carried between evaluations
///
/// Holds the confirmed inside-set plus per-fence pending flips. Starts
/// empty: after a restart every fence is considered outside until observed,
/// so a user standing inside an armed fence will re-fire it once the
/// debounce is satisfied (at-least-once delivery, consumers are idempotent).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatorState {
    inside: HashSet<ReminderId>,
    pending: HashMap<ReminderId, PendingFlip>,
}

impl EvaluatorState {
    /// Creates an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the user is confirmed inside the given fence
    #[must_use]
    pub fn is_inside(&self, id: &ReminderId) -> bool {
        self.inside.contains(id)
    }

    /// Fence ids the state currently holds information about
    ///
    /// The caller unions these with the grid candidates so that fences the
    /// user is inside (or flipping) keep being evaluated even when the fix
    /// has moved away from their cells.
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<ReminderId> {
        let mut ids: HashSet<ReminderId> = self.inside.iter().copied().collect();
        ids.extend(self.pending.keys().copied());
        ids.into_iter().collect()
    }

    /// Drops all information about a fence (deleted reminder)
    pub fn remove(&mut self, id: &ReminderId) {
        self.inside.remove(id);
        self.pending.remove(id);
    }
}

/// A transition that fired during evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTransition {
    /// The fence's owning reminder
    pub reminder_id: ReminderId,
    /// Crossing direction
    pub transition: Transition,
    /// Whether the caller should disarm the fence (one-shot fired)
    pub disarm: bool,
}

/// Result of evaluating one fix
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// State to carry into the next evaluation
    pub state: EvaluatorState,
    /// Transitions that fired, in fence input order
    pub transitions: Vec<FiredTransition>,
}

/// Evaluates one fix against the candidate fences
///
/// Disarmed fences are skipped entirely; their state freezes until re-armed.
/// Membership changes that the fence's trigger setting does not cover still
/// update the inside-set but emit nothing.
#[must_use]
pub fn evaluate(
    fix: &PositionFix,
    state: &EvaluatorState,
    fences: &[Geofence],
    debounce_fixes: u8,
) -> Evaluation {
    let debounce = debounce_fixes.max(1);
    let mut next = state.clone();
    let mut transitions = Vec::new();

    for fence in fences {
        if !fence.is_armed() {
            continue;
        }
        let id = *fence.reminder_id();

        match containment(fence, fix) {
            Containment::Indeterminate => {
                // Nothing can be concluded from this fix; an interrupted
                // streak must be re-earned once readings are usable again.
                next.pending.remove(&id);
            }
            observed => {
                let observed_inside = observed == Containment::Inside;
                let confirmed_inside = next.inside.contains(&id);

                if observed_inside == confirmed_inside {
                    next.pending.remove(&id);
                    continue;
                }

                let streak = match next.pending.get(&id) {
                    Some(flip) if flip.toward_inside == observed_inside => flip.streak + 1,
                    _ => 1,
                };

                if streak >= debounce {
                    next.pending.remove(&id);
                    let transition = if observed_inside {
                        next.inside.insert(id);
                        Transition::Enter
                    } else {
                        next.inside.remove(&id);
                        Transition::Exit
                    };

                    if fence.trigger_on().covers(transition) {
                        transitions.push(FiredTransition {
                            reminder_id: id,
                            transition,
                            disarm: fence.is_one_shot(),
                        });
                    }
                } else {
                    next.pending.insert(
                        id,
                        PendingFlip {
                            toward_inside: observed_inside,
                            streak,
                        },
                    );
                }
            }
        }
    }

    Evaluation {
        state: next,
        transitions,
    }
}
