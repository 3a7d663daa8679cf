//! Shared per-run tracking configuration and statistics.

use super::ftr;
use super::stats::{RejectionReason, TerminationReason, TrackingStats};
use std::fmt;

/// Order of the numerical integration scheme advancing the tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntegrationOrder {
    /// One field evaluation per step.
    First,
    /// Classical fourth-order Runge-Kutta advance with four field
    /// evaluations per step.
    FourthOrderRungeKutta,
}

/// Configuration parameters for a tracking run.
#[derive(Clone, Debug)]
pub struct TrackingConfig {
    /// Step size expressed as a fraction of the voxel size.
    pub step_fraction: ftr,
    /// Maximum deviation angle per step in degrees, in (0, 90].
    pub max_angle: ftr,
    /// Integration order used to advance the tracker.
    pub integration_order: IntegrationOrder,
    /// Streamlines shorter than this physical length are rejected.
    pub min_length: ftr,
    /// Streamlines are terminated upon reaching this physical length.
    pub max_length: ftr,
    /// Accepted streamlines keep only every n-th point.
    pub downsample_factor: usize,
    /// Field amplitudes below this value are considered "no signal"
    /// during tracking.
    pub cutoff: ftr,
    /// Minimum field amplitude required to start tracking from a seed.
    /// Defaults to twice the tracking cutoff.
    pub seed_cutoff: Option<ftr>,
    /// Whether anatomical tissue constraints are active for this run.
    pub use_act: bool,
}

impl TrackingConfig {
    pub const DEFAULT_STEP_FRACTION: ftr = 0.5;
    pub const DEFAULT_MAX_ANGLE: ftr = 45.0;
    pub const DEFAULT_INTEGRATION_ORDER: IntegrationOrder = IntegrationOrder::First;
    pub const DEFAULT_MIN_LENGTH: ftr = 2.0;
    pub const DEFAULT_MAX_LENGTH: ftr = 100.0;
    pub const DEFAULT_DOWNSAMPLE_FACTOR: usize = 1;
    pub const DEFAULT_CUTOFF: ftr = 0.1;

    fn validate(&self) {
        assert!(
            self.step_fraction > 0.0,
            "Step fraction must be larger than zero."
        );
        assert!(
            self.max_angle > 0.0 && self.max_angle <= 90.0,
            "Maximum angle must be in the range (0, 90] degrees."
        );
        assert!(
            self.min_length > 0.0,
            "Minimum length must be larger than zero."
        );
        assert!(
            self.max_length >= self.min_length,
            "Maximum length must be larger than or equal to the minimum length."
        );
        assert!(
            self.downsample_factor >= 1,
            "Downsample factor must be at least one."
        );
        assert!(self.cutoff >= 0.0, "Cutoff must be non-negative.");
        if let Some(seed_cutoff) = self.seed_cutoff {
            assert!(seed_cutoff >= 0.0, "Seed cutoff must be non-negative.");
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            step_fraction: Self::DEFAULT_STEP_FRACTION,
            max_angle: Self::DEFAULT_MAX_ANGLE,
            integration_order: Self::DEFAULT_INTEGRATION_ORDER,
            min_length: Self::DEFAULT_MIN_LENGTH,
            max_length: Self::DEFAULT_MAX_LENGTH,
            downsample_factor: Self::DEFAULT_DOWNSAMPLE_FACTOR,
            cutoff: Self::DEFAULT_CUTOFF,
            seed_cutoff: None,
            use_act: false,
        }
    }
}

/// Immutable per-run tracking state shared by all workers.
///
/// All derived quantities are computed at construction and never mutated
/// afterwards; the only mutable state is the bank of atomic termination and
/// rejection counters, which any worker may increment at any time.
pub struct SharedTrackingContext {
    config: TrackingConfig,
    step_size: ftr,
    max_angle: ftr,
    sin_max_angle: ftr,
    cos_max_angle_substep: ftr,
    cos_max_angle_step: ftr,
    min_num_points: usize,
    max_num_points: usize,
    min_num_points_downsampled: usize,
    max_num_points_downsampled: usize,
    cutoff: ftr,
    seed_cutoff: ftr,
    stats: TrackingStats,
}

impl SharedTrackingContext {
    /// Amplitude thresholds are relaxed by this factor when anatomical
    /// constraints are active, since tissue information takes over part of
    /// the gatekeeping the cutoff otherwise performs.
    pub const ACT_CUTOFF_MULTIPLIER: ftr = 0.5;

    /// Seed-point amplitude requirement relative to the tracking cutoff,
    /// used when no explicit seed cutoff is configured.
    pub const SEED_CUTOFF_FACTOR: ftr = 2.0;

    /// Creates the shared context for a run.
    ///
    /// # Parameters
    ///
    /// - `config`: User configuration; validated here, before any worker
    ///   starts.
    /// - `voxel_size`: Smallest voxel extent of the orientation field in
    ///   scanner-space units.
    pub fn new(config: TrackingConfig, voxel_size: ftr) -> Self {
        config.validate();
        assert!(
            voxel_size > 0.0,
            "Voxel size must be larger than zero."
        );
        let mut context = Self {
            config: config.clone(),
            step_size: 0.0,
            max_angle: 0.0,
            sin_max_angle: 0.0,
            cos_max_angle_substep: 0.0,
            cos_max_angle_step: 0.0,
            min_num_points: 0,
            max_num_points: 0,
            min_num_points_downsampled: 0,
            max_num_points_downsampled: 0,
            cutoff: 0.0,
            seed_cutoff: 0.0,
            stats: TrackingStats::new(),
        };
        context.set_step_and_angle(
            config.step_fraction,
            config.max_angle,
            config.integration_order,
            voxel_size,
        );
        context.set_num_points(
            config.min_length,
            config.max_length,
            config.downsample_factor,
        );
        context.set_cutoff(config.cutoff);
        context
    }

    /// Derives the absolute step size and the angular thresholds from the
    /// given step fraction and maximum deviation angle.
    ///
    /// Higher-order integration splits each step into sub-steps, so the same
    /// physical curvature bound permits a larger turn per sub-step; the
    /// per-sub-step threshold is relaxed to 90 degrees while the full-step
    /// threshold keeps the configured bound.
    fn set_step_and_angle(
        &mut self,
        step_fraction: ftr,
        max_angle: ftr,
        integration_order: IntegrationOrder,
        voxel_size: ftr,
    ) {
        self.step_size = step_fraction * voxel_size;
        let max_angle_rad = max_angle.to_radians();
        self.cos_max_angle_step = max_angle_rad.cos();
        match integration_order {
            IntegrationOrder::First => {
                self.max_angle = max_angle_rad;
                self.cos_max_angle_substep = max_angle_rad.cos();
            }
            IntegrationOrder::FourthOrderRungeKutta => {
                self.max_angle = std::f64::consts::FRAC_PI_2;
                self.cos_max_angle_substep = 0.0;
            }
        }
        self.sin_max_angle = self.max_angle.sin();
    }

    /// Derives the minimum and maximum streamline point counts, before and
    /// after downsampling, from the configured physical length bounds.
    ///
    /// Both bounds are at least two, since a streamline needs two points to
    /// have a length.
    fn set_num_points(&mut self, min_length: ftr, max_length: ftr, downsample_factor: usize) {
        self.min_num_points = ((min_length / self.step_size).round() as usize).max(2);
        self.max_num_points = ((max_length / self.step_size).round() as usize)
            .max(self.min_num_points);
        self.min_num_points_downsampled =
            ((self.min_num_points - 1) / downsample_factor + 1).max(2);
        self.max_num_points_downsampled =
            ((self.max_num_points - 1) / downsample_factor + 1).max(2);
    }

    /// Sets the tracking and seed amplitude cutoffs, applying the ACT
    /// multiplier when anatomical constraints are active.
    fn set_cutoff(&mut self, amplitude: ftr) {
        let multiplier = if self.config.use_act {
            Self::ACT_CUTOFF_MULTIPLIER
        } else {
            1.0
        };
        self.cutoff = amplitude * multiplier;
        self.seed_cutoff = self
            .config
            .seed_cutoff
            .unwrap_or(Self::SEED_CUTOFF_FACTOR * amplitude)
            * multiplier;
    }

    /// Returns a reference to the user configuration.
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Returns the absolute step size in scanner-space units.
    pub fn step_size(&self) -> ftr {
        self.step_size
    }

    /// Returns the maximum deviation angle per (sub-)step in radians.
    pub fn max_angle(&self) -> ftr {
        self.max_angle
    }

    /// Returns the sine of the maximum deviation angle per (sub-)step.
    pub fn sin_max_angle(&self) -> ftr {
        self.sin_max_angle
    }

    /// Returns the cosine threshold applied to each individual advance.
    pub fn cos_max_angle_substep(&self) -> ftr {
        self.cos_max_angle_substep
    }

    /// Returns the cosine threshold applied to a full reported step.
    pub fn cos_max_angle_step(&self) -> ftr {
        self.cos_max_angle_step
    }

    /// Returns the minimum number of points before downsampling.
    pub fn min_num_points(&self) -> usize {
        self.min_num_points
    }

    /// Returns the maximum number of points before downsampling.
    pub fn max_num_points(&self) -> usize {
        self.max_num_points
    }

    /// Returns the minimum number of points after downsampling.
    pub fn min_num_points_downsampled(&self) -> usize {
        self.min_num_points_downsampled
    }

    /// Returns the maximum number of points after downsampling.
    pub fn max_num_points_downsampled(&self) -> usize {
        self.max_num_points_downsampled
    }

    /// Returns the tracking amplitude cutoff.
    pub fn cutoff(&self) -> ftr {
        self.cutoff
    }

    /// Returns the seed amplitude cutoff.
    pub fn seed_cutoff(&self) -> ftr {
        self.seed_cutoff
    }

    /// Records a termination. Safe to call from any number of workers.
    pub fn add_termination(&self, reason: TerminationReason) {
        self.stats.add_termination(reason);
    }

    /// Records a rejection. Safe to call from any number of workers.
    pub fn add_rejection(&self, reason: RejectionReason) {
        self.stats.add_rejection(reason);
    }

    /// Returns the number of recorded terminations for the given reason.
    pub fn termination_count(&self, reason: TerminationReason) -> usize {
        self.stats.termination_count(reason)
    }

    /// Returns the number of recorded rejections for the given reason.
    pub fn rejection_count(&self, reason: RejectionReason) -> usize {
        self.stats.rejection_count(reason)
    }

    /// Returns a reference to the statistics bank.
    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    /// Renders the human-readable reason/count table.
    pub fn report(&self) -> impl fmt::Display + '_ {
        &self.stats
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn step_size_is_a_fraction_of_the_voxel_size() {
        let context = SharedTrackingContext::new(
            TrackingConfig {
                step_fraction: 0.5,
                ..TrackingConfig::default()
            },
            2.0,
        );
        assert_abs_diff_eq!(context.step_size(), 1.0);
    }

    #[test]
    fn first_order_integration_bounds_every_step() {
        let context = SharedTrackingContext::new(
            TrackingConfig {
                max_angle: 60.0,
                ..TrackingConfig::default()
            },
            1.0,
        );
        assert_abs_diff_eq!(context.cos_max_angle_substep(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(context.cos_max_angle_step(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn higher_order_integration_relaxes_the_substep_bound() {
        let context = SharedTrackingContext::new(
            TrackingConfig {
                max_angle: 60.0,
                integration_order: IntegrationOrder::FourthOrderRungeKutta,
                ..TrackingConfig::default()
            },
            1.0,
        );
        assert_abs_diff_eq!(context.cos_max_angle_substep(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(context.cos_max_angle_step(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn point_counts_derive_from_lengths() {
        let context = SharedTrackingContext::new(
            TrackingConfig {
                step_fraction: 1.0,
                min_length: 4.0,
                max_length: 10.0,
                ..TrackingConfig::default()
            },
            1.0,
        );
        assert_eq!(context.min_num_points(), 4);
        assert_eq!(context.max_num_points(), 10);
    }

    #[test]
    fn point_counts_are_never_below_two() {
        let context = SharedTrackingContext::new(
            TrackingConfig {
                step_fraction: 1.0,
                min_length: 0.1,
                max_length: 0.2,
                downsample_factor: 4,
                ..TrackingConfig::default()
            },
            1.0,
        );
        assert!(context.min_num_points() >= 2);
        assert!(context.max_num_points() >= context.min_num_points());
        assert!(context.min_num_points_downsampled() >= 2);
        assert!(
            context.max_num_points_downsampled() >= context.min_num_points_downsampled()
        );
    }

    #[test]
    fn act_relaxes_the_cutoffs() {
        let without_act = SharedTrackingContext::new(
            TrackingConfig {
                cutoff: 0.1,
                ..TrackingConfig::default()
            },
            1.0,
        );
        let with_act = SharedTrackingContext::new(
            TrackingConfig {
                cutoff: 0.1,
                use_act: true,
                ..TrackingConfig::default()
            },
            1.0,
        );
        assert_abs_diff_eq!(without_act.cutoff(), 0.1);
        assert_abs_diff_eq!(without_act.seed_cutoff(), 0.2);
        assert_abs_diff_eq!(with_act.cutoff(), 0.05);
        assert_abs_diff_eq!(with_act.seed_cutoff(), 0.1);
    }

    #[test]
    #[should_panic(expected = "Maximum angle")]
    fn out_of_range_angle_is_a_configuration_error() {
        SharedTrackingContext::new(
            TrackingConfig {
                max_angle: 120.0,
                ..TrackingConfig::default()
            },
            1.0,
        );
    }
}
