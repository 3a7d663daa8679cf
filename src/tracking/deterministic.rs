//! Deterministic peak-following propagation.

use super::context::{IntegrationOrder, SharedTrackingContext};
use super::ftr;
use super::method::{StepOutcome, TrackerFactory3, TrackerState, TrackingMethod};
use super::stats::TerminationReason;
use crate::field::{FieldSampler3, OrientationField3};
use crate::geometry::{Point3, Vec3};
use rand::rngs::StdRng;

/// A propagator that always follows the locally preferred fiber direction.
///
/// Supports a plain first-order advance as well as a classical fourth-order
/// Runge-Kutta advance with four field evaluations per reported step.
pub struct DeterministicTracker<'a, S> {
    state: TrackerState<'a>,
    sampler: S,
}

impl<'a, S: FieldSampler3> DeterministicTracker<'a, S> {
    /// Creates a new deterministic tracker for one worker.
    pub fn new(context: &'a SharedTrackingContext, sampler: S, rng: StdRng) -> Self {
        Self {
            state: TrackerState::new(context, rng),
            sampler,
        }
    }

    fn next_first_order(&mut self) -> StepOutcome {
        let context = self.state.context;
        if !self.sampler.sample(&self.state.position) {
            return StepOutcome::Stopped(TerminationReason::ExitImage);
        }
        let (peak, amplitude) = self.sampler.find_peak(&self.state.direction);
        if !amplitude.is_finite() || amplitude < context.cutoff() {
            return StepOutcome::Stopped(TerminationReason::Model);
        }
        if peak.dot(&self.state.direction) < context.cos_max_angle_substep() {
            return StepOutcome::Stopped(TerminationReason::HighCurvature);
        }
        self.state.direction = peak;
        self.state.position =
            &self.state.position + &(&self.state.direction * context.step_size());
        StepOutcome::Continue
    }

    fn next_fourth_order(&mut self) -> StepOutcome {
        let context = self.state.context;
        let step_size = context.step_size();
        let start_position = self.state.position.clone();
        let start_direction = self.state.direction.clone();

        let k1 = match self.substep_direction(&start_position, &start_direction) {
            Ok(direction) => direction,
            Err(termination) => return StepOutcome::Stopped(termination),
        };
        let k2 = match self
            .substep_direction(&(&start_position + &(&k1 * (0.5 * step_size))), &k1)
        {
            Ok(direction) => direction,
            Err(termination) => return StepOutcome::Stopped(termination),
        };
        let k3 = match self
            .substep_direction(&(&start_position + &(&k2 * (0.5 * step_size))), &k2)
        {
            Ok(direction) => direction,
            Err(termination) => return StepOutcome::Stopped(termination),
        };
        let k4 = match self.substep_direction(&(&start_position + &(&k3 * step_size)), &k3) {
            Ok(direction) => direction,
            Err(termination) => return StepOutcome::Stopped(termination),
        };

        let mut composite: Vec3<ftr> =
            Vec3::with_each_component(|dim| k1[dim] + 2.0 * (k2[dim] + k3[dim]) + k4[dim]);
        if composite.is_zero() {
            return StepOutcome::Stopped(TerminationReason::HighCurvature);
        }
        composite.normalize();
        // The relaxed per-sub-step bound still requires the composite step
        // to honor the physical curvature limit.
        if composite.dot(&start_direction) < context.cos_max_angle_step() {
            return StepOutcome::Stopped(TerminationReason::HighCurvature);
        }

        self.state.direction = composite;
        self.state.position = &start_position + &(&self.state.direction * step_size);
        StepOutcome::Continue
    }

    fn substep_direction(
        &mut self,
        position: &Point3<ftr>,
        reference: &Vec3<ftr>,
    ) -> Result<Vec3<ftr>, TerminationReason> {
        let context = self.state.context;
        if !self.sampler.sample(position) {
            return Err(TerminationReason::ExitImage);
        }
        let (peak, amplitude) = self.sampler.find_peak(reference);
        if !amplitude.is_finite() || amplitude < context.cutoff() {
            return Err(TerminationReason::Model);
        }
        if peak.dot(reference) < context.cos_max_angle_substep() {
            return Err(TerminationReason::HighCurvature);
        }
        Ok(peak)
    }
}

impl<'a, S: FieldSampler3> TrackingMethod<'a> for DeterministicTracker<'a, S> {
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
        let start_direction = match seed_direction {
            Some(direction) => direction.normalized(),
            None => self.random_direction(),
        };
        let (peak, amplitude) = self.sampler.find_peak(&start_direction);
        if amplitude.is_finite() && amplitude >= self.state.context.seed_cutoff() {
            self.state.direction = peak;
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> StepOutcome {
        match self.state.context.config().integration_order {
            IntegrationOrder::First => self.next_first_order(),
            IntegrationOrder::FourthOrderRungeKutta => self.next_fourth_order(),
        }
    }
}

/// Factory producing one deterministic tracker per worker.
pub struct DeterministicTrackerFactory<'a, G> {
    context: &'a SharedTrackingContext,
    field: &'a G,
}

impl<'a, G: OrientationField3> DeterministicTrackerFactory<'a, G> {
    /// Creates a new deterministic tracker factory.
    pub fn new(context: &'a SharedTrackingContext, field: &'a G) -> Self {
        Self { context, field }
    }
}

impl<'a, G: OrientationField3> TrackerFactory3<'a> for DeterministicTrackerFactory<'a, G> {
    type Tracker = DeterministicTracker<'a, G::Sampler<'a>>;

    fn supports_backtracking(&self) -> bool {
        false
    }

    fn produce(&self, rng: StdRng) -> Self::Tracker {
        DeterministicTracker::new(self.context, self.field.sampler(), rng)
    }
}
