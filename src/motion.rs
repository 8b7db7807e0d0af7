//! Position convergence shared by the stepper and servo engines.

use crate::fixed_point::Q6;

/// A channel's commanded motion state: where it is, where it is headed, and
/// how far it may move per tick.
///
/// One call to [`advance`](Self::advance) moves `position` by at most `speed`
/// toward `destination` and never overshoots: when the remaining distance is
/// smaller than one increment, the position snaps exactly onto the
/// destination. A move of distance `d` therefore completes in
/// `ceil(d / speed)` ticks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MotionProfile {
    position: Q6,
    destination: Q6,
    speed: Q6,
}

impl MotionProfile {
    /// New profile at rest at `position`.
    #[must_use]
    pub const fn new(position: Q6, speed: Q6) -> Self {
        Self {
            position,
            destination: position,
            speed,
        }
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> Q6 {
        self.position
    }

    /// Target position.
    #[must_use]
    pub fn destination(&self) -> Q6 {
        self.destination
    }

    /// Per-tick increment.
    #[must_use]
    pub fn speed(&self) -> Q6 {
        self.speed
    }

    /// Whether the position has not yet reached the destination.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.position != self.destination
    }

    /// Retarget the profile; motion resumes on the next tick.
    pub fn set_destination(&mut self, destination: Q6) {
        self.destination = destination;
    }

    /// Teleport: declare the current position without causing motion.
    pub fn set_position(&mut self, position: Q6) {
        self.position = position;
        self.destination = position;
    }

    /// Change the per-tick increment.
    pub fn set_speed(&mut self, speed: Q6) {
        self.speed = speed;
    }

    /// One tick of convergence. Returns `true` once the destination has been
    /// reached (including when it already had been).
    pub fn advance(&mut self) -> bool {
        if self.position < self.destination {
            self.position = self.position.saturating_add(self.speed);
            if self.position > self.destination {
                self.position = self.destination;
            }
        } else if self.position > self.destination {
            self.position = self.position.saturating_sub(self.speed);
            if self.position < self.destination {
                self.position = self.destination;
            }
        }
        self.position == self.destination
    }
}
