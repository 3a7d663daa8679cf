//! The per-worker tracking state machine.
//!
//! One tracker instance is owned by each worker thread. The
//! algorithm-independent machinery (seed validation, random direction
//! helpers, track truncation for backtracking) is provided here; concrete
//! propagation algorithms implement the direction-finding parts.

use super::act::AnatomicalConstraint3;
use super::context::SharedTrackingContext;
use super::ftr;
use super::stats::TerminationReason;
use super::streamline::Streamline;
use crate::field::SpatialRegion3;
use crate::geometry::{Point3, Vec3};
use crate::random;
use rand::rngs::StdRng;

/// Result of advancing the tracker by one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// The step was accepted and the new position may be appended.
    Continue,
    /// Tracking must stop for the given reason.
    Stopped(TerminationReason),
}

/// Mutable per-worker tracking state.
///
/// `position` and `direction` use the NaN triple as the sentinel for
/// "invalid or terminated".
pub struct TrackerState<'a> {
    /// Shared run context.
    pub context: &'a SharedTrackingContext,
    /// Region the tracker must stay inside, if any.
    pub mask: Option<&'a dyn SpatialRegion3>,
    /// Region the tracker must never enter, if any.
    pub exclude: Option<&'a dyn SpatialRegion3>,
    /// Anatomical-constraint collaborator, if active.
    pub act: Option<&'a dyn AnatomicalConstraint3>,
    /// Current position of the tracker.
    pub position: Point3<ftr>,
    /// Current unit heading of the tracker.
    pub direction: Vec3<ftr>,
    /// Number of accepted steps since entering subcortical grey matter.
    pub sgm_depth: usize,
    /// This worker's random number generator.
    pub rng: StdRng,
}

impl<'a> TrackerState<'a> {
    /// Creates a new tracker state with invalid position and direction.
    pub fn new(context: &'a SharedTrackingContext, rng: StdRng) -> Self {
        Self {
            context,
            mask: None,
            exclude: None,
            act: None,
            position: Point3::nan(),
            direction: Vec3::nan(),
            sgm_depth: 0,
            rng,
        }
    }
}

/// Defines the properties of a streamline propagation algorithm.
pub trait TrackingMethod<'a> {
    /// Returns a reference to the tracker state.
    fn state(&self) -> &TrackerState<'a>;

    /// Returns a mutable reference to the tracker state.
    fn state_mut(&mut self) -> &mut TrackerState<'a>;

    /// Determines the initial heading at the (already validated) seed
    /// position, either from the supplied seed direction or by an
    /// algorithm-specific search.
    ///
    /// Returns `false` if no direction with sufficient amplitude exists.
    fn init_direction(&mut self, seed_direction: Option<&Vec3<ftr>>) -> bool;

    /// Advances the tracker by one step.
    fn next(&mut self) -> StepOutcome;

    /// Places the tracker on the given seed and determines its initial
    /// heading.
    ///
    /// Returns `false` (leaving the position invalid) if the seed fails
    /// validation or no initial direction can be found.
    fn init(&mut self, seed: &Point3<ftr>, seed_direction: Option<&Vec3<ftr>>) -> bool {
        let state = self.state_mut();
        state.position = seed.clone();
        state.direction = Vec3::nan();
        state.sgm_depth = 0;
        if !self.check_seed() {
            return false;
        }
        self.init_direction(seed_direction)
    }

    /// Validates the current position as a seed point.
    ///
    /// Returns `false` and resets the position to the invalid sentinel if
    /// the seed lies outside the tracking mask, inside the exclusion
    /// region, or fails the anatomical seed test.
    fn check_seed(&mut self) -> bool {
        let state = self.state_mut();
        let valid = state.position.all_finite()
            && state.mask.is_none_or(|mask| mask.contains(&state.position))
            && !state
                .exclude
                .is_some_and(|exclude| exclude.contains(&state.position))
            && state.act.is_none_or(|act| act.check_seed(&state.position));
        if !valid {
            state.position = Point3::nan();
        }
        valid
    }

    /// Draws a direction uniformly distributed on the unit sphere.
    fn random_direction(&mut self) -> Vec3<ftr> {
        random::uniform_sphere_direction(&mut self.state_mut().rng)
    }

    /// Draws a direction uniformly distributed within a cone of the given
    /// half-angle about the positive polar axis.
    fn random_direction_in_cone(&mut self, max_angle: ftr, sin_max_angle: ftr) -> Vec3<ftr> {
        random::uniform_cone_direction(&mut self.state_mut().rng, max_angle, sin_max_angle)
    }

    /// Shortens the given streamline for a backtracking retry and rewinds
    /// the live position and direction accordingly.
    ///
    /// If the truncation would remove the seed point the streamline is
    /// discarded entirely and the live position and direction are reset to
    /// the invalid sentinel. Otherwise the streamline is shortened to
    /// `length_to_revert_from - revert_step` points, the heading is
    /// recomputed from the remaining points (a simple two-point difference
    /// if at most two remain, a wider-baseline difference otherwise) and
    /// the position is reset to the new last point.
    fn truncate_track(
        &mut self,
        streamline: &mut Streamline,
        length_to_revert_from: usize,
        revert_step: usize,
    ) {
        if revert_step == 0 {
            return;
        }
        let state = self.state_mut();
        if streamline.seed_index() + revert_step >= length_to_revert_from {
            streamline.clear();
            state.position = Point3::nan();
            state.direction = Vec3::nan();
            state.sgm_depth = 0;
            return;
        }
        let new_size = length_to_revert_from - revert_step;
        {
            let points = streamline.points();
            state.direction = if new_size >= 3 {
                (&points[new_size - 1] - &points[new_size - 3]).normalized()
            } else {
                (&points[1] - &points[0]).normalized()
            };
        }
        streamline.truncate(new_size);
        state.position = streamline
            .last_point()
            .cloned()
            .unwrap_or_else(Point3::nan);
        state.sgm_depth = state.sgm_depth.saturating_sub(revert_step);
    }
}

/// Defines the properties of a tracker factory, producing one independent
/// propagator instance per worker.
pub trait TrackerFactory3<'a>: Sync {
    type Tracker: TrackingMethod<'a>;

    /// Whether the produced algorithm can retry a step along a different
    /// candidate direction, as bounded backtracking requires.
    fn supports_backtracking(&self) -> bool;

    /// Produces a new tracker owning the given random number generator.
    fn produce(&self, rng: StdRng) -> Self::Tracker;
}
