//! Probabilistic propagation by calibrated rejection sampling.

use super::calibration::Calibration;
use super::context::SharedTrackingContext;
use super::ftr;
use super::method::{StepOutcome, TrackerFactory3, TrackerState, TrackingMethod};
use super::stats::TerminationReason;
use crate::field::{FieldSampler3, OrientationField3};
use crate::geometry::Vec3;
use crate::random;
use rand::rngs::StdRng;
use rand::Rng;

/// Number of candidate directions drawn per step before giving up.
const MAX_TRIALS: usize = 100;

/// Number of random directions probed when no seed direction is supplied.
const SEED_TRIALS: usize = 50;

/// A propagator that samples its next direction from the directional
/// amplitude profile of the field.
///
/// Candidate directions are drawn uniformly within the angular limit around
/// the current heading and accepted with probability proportional to their
/// amplitude, using the precomputed calibration as the envelope of the
/// amplitude in the neighborhood of a peak.
pub struct ProbabilisticTracker<'a, S> {
    state: TrackerState<'a>,
    sampler: S,
    calibration: &'a Calibration,
}

impl<'a, S: FieldSampler3> ProbabilisticTracker<'a, S> {
    /// Creates a new probabilistic tracker for one worker.
    pub fn new(
        context: &'a SharedTrackingContext,
        sampler: S,
        calibration: &'a Calibration,
        rng: StdRng,
    ) -> Self {
        Self {
            state: TrackerState::new(context, rng),
            sampler,
            calibration,
        }
    }

    /// Estimates the amplitude envelope around the current heading by
    /// probing the calibrated candidate offsets.
    fn envelope(&self) -> ftr {
        let mut envelope: ftr = 0.0;
        for offset in self.calibration.directions() {
            let candidate = random::rotate_direction(&self.state.direction, offset);
            let amplitude = self.sampler.amplitude(&candidate);
            if amplitude.is_finite() && amplitude > envelope {
                envelope = amplitude;
            }
        }
        envelope * self.calibration.ratio()
    }
}

impl<'a, S: FieldSampler3> TrackingMethod<'a> for ProbabilisticTracker<'a, S> {
    fn state(&self) -> &TrackerState<'a> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TrackerState<'a> {
        &mut self.state
    }

    fn init_direction(&mut self, seed_direction: Option<&Vec3<ftr>>) -> bool {
        if !self.sampler.sample(&self.state.position) {
            return false;
        }
        let seed_cutoff = self.state.context.seed_cutoff();
        match seed_direction {
            Some(direction) => {
                let direction = direction.normalized();
                let amplitude = self.sampler.amplitude(&direction);
                if amplitude.is_finite() && amplitude >= seed_cutoff {
                    self.state.direction = direction;
                    true
                } else {
                    false
                }
            }
            None => {
                let mut best: Option<(Vec3<ftr>, ftr)> = None;
                for _ in 0..SEED_TRIALS {
                    let candidate = self.random_direction();
                    let amplitude = self.sampler.amplitude(&candidate);
                    if amplitude.is_finite()
                        && best
                            .as_ref()
                            .is_none_or(|&(_, best_amplitude)| amplitude > best_amplitude)
                    {
                        best = Some((candidate, amplitude));
                    }
                }
                match best {
                    Some((direction, amplitude)) if amplitude >= seed_cutoff => {
                        self.state.direction = direction;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn next(&mut self) -> StepOutcome {
        let context = self.state.context;
        if !self.sampler.sample(&self.state.position) {
            return StepOutcome::Stopped(TerminationReason::ExitImage);
        }
        if self.calibration.is_degenerate() {
            return StepOutcome::Stopped(TerminationReason::BadCalibration);
        }
        let envelope = self.envelope();
        if !envelope.is_finite() || envelope <= 0.0 {
            return StepOutcome::Stopped(TerminationReason::Model);
        }

        let max_angle = context.max_angle();
        let sin_max_angle = context.sin_max_angle();
        for _ in 0..MAX_TRIALS {
            let offset = self.random_direction_in_cone(max_angle, sin_max_angle);
            let candidate = random::rotate_direction(&self.state.direction, &offset);
            let amplitude = self.sampler.amplitude(&candidate);
            if !amplitude.is_finite() || amplitude < context.cutoff() {
                continue;
            }
            if amplitude > self.state.rng.gen::<ftr>() * envelope {
                self.state.direction = candidate;
                self.state.position =
                    &self.state.position + &(&self.state.direction * context.step_size());
                return StepOutcome::Continue;
            }
        }
        StepOutcome::Stopped(TerminationReason::Model)
    }
}

/// Factory producing one probabilistic tracker per worker, all sharing the
/// same read-only calibration.
pub struct ProbabilisticTrackerFactory<'a, G> {
    context: &'a SharedTrackingContext,
    field: &'a G,
    calibration: &'a Calibration,
}

impl<'a, G: OrientationField3> ProbabilisticTrackerFactory<'a, G> {
    /// Creates a new probabilistic tracker factory.
    pub fn new(
        context: &'a SharedTrackingContext,
        field: &'a G,
        calibration: &'a Calibration,
    ) -> Self {
        Self {
            context,
            field,
            calibration,
        }
    }
}

impl<'a, G: OrientationField3> TrackerFactory3<'a> for ProbabilisticTrackerFactory<'a, G> {
    type Tracker = ProbabilisticTracker<'a, G::Sampler<'a>>;

    fn supports_backtracking(&self) -> bool {
        true
    }

    fn produce(&self, rng: StdRng) -> Self::Tracker {
        ProbabilisticTracker::new(self.context, self.field.sampler(), self.calibration, rng)
    }
}
