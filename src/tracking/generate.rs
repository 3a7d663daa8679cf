//! Parallel generation of streamlines.
//!
//! A fixed pool of workers repeatedly draws a seed, runs the tracker to
//! completion in both directions and emits the finished streamline. The
//! workers share nothing but the read-only run state and the atomic
//! counters; every worker owns its tracker, its sampler and its random
//! number generator.

use super::act::{self, AnatomicalConstraint3};
use super::context::SharedTrackingContext;
use super::ftr;
use super::method::{StepOutcome, TrackerFactory3, TrackingMethod};
use super::stats::{RejectionReason, TerminationReason};
use super::streamline::{Streamline, TrackIndex};
use crate::field::SpatialRegion3;
use crate::geometry::{Point3, Vec3};
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

/// Whether or not to report progress while generating.
#[derive(Clone, Copy, Debug)]
pub enum Verbose {
    Yes,
    No,
}

impl Verbose {
    pub fn is_yes(&self) -> bool {
        match self {
            Verbose::Yes => true,
            Verbose::No => false,
        }
    }
}

/// Defines the properties of a seed point generator.
pub trait Seeder3: Sync {
    /// Draws a seed position, with an optional seed direction.
    fn draw(&self, rng: &mut StdRng) -> (Point3<ftr>, Option<Vec3<ftr>>);
}

// Let a fixed seed point with an optional direction work as a seeder.
impl Seeder3 for (Point3<ftr>, Option<Vec3<ftr>>) {
    fn draw(&self, _rng: &mut StdRng) -> (Point3<ftr>, Option<Vec3<ftr>>) {
        self.clone()
    }
}

// Let a vector of points work as a seeder.
impl Seeder3 for Vec<Point3<ftr>> {
    fn draw(&self, rng: &mut StdRng) -> (Point3<ftr>, Option<Vec3<ftr>>) {
        (self[rng.gen_range(0..self.len())].clone(), None)
    }
}

/// Seeds drawn uniformly from within a sphere.
#[derive(Clone, Debug)]
pub struct SphereSeeder3 {
    center: Point3<ftr>,
    radius: ftr,
}

impl SphereSeeder3 {
    /// Creates a new spherical seeder with the given center and radius.
    pub fn new(center: Point3<ftr>, radius: ftr) -> Self {
        assert!(radius > 0.0, "Seeding radius must be larger than zero.");
        Self { center, radius }
    }
}

impl Seeder3 for SphereSeeder3 {
    fn draw(&self, rng: &mut StdRng) -> (Point3<ftr>, Option<Vec3<ftr>>) {
        loop {
            let offset = Vec3::new(
                2.0 * rng.gen::<ftr>() - 1.0,
                2.0 * rng.gen::<ftr>() - 1.0,
                2.0 * rng.gen::<ftr>() - 1.0,
            );
            if offset.squared_length() <= 1.0 {
                return (&self.center + &(offset * self.radius), None);
            }
        }
    }
}

/// Spatial constraints and the optional anatomical collaborator of a run.
#[derive(Default)]
pub struct TrackingRegions<'a> {
    /// Region the tracker must stay inside, if any.
    pub mask: Option<&'a dyn SpatialRegion3>,
    /// Region that terminates and rejects any track entering it, if any.
    pub exclude: Option<&'a dyn SpatialRegion3>,
    /// Regions every accepted track must traverse.
    pub include: Vec<&'a dyn SpatialRegion3>,
    /// Anatomical-constraint collaborator, if active.
    pub act: Option<&'a dyn AnatomicalConstraint3>,
}

/// Configuration parameters for streamline generation.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Number of accepted streamlines to generate.
    pub target_count: usize,
    /// Maximum number of seed attempts before giving up.
    pub max_attempts: usize,
    /// Run-level random seed; worker generators derive from it.
    pub rng_seed: u64,
    /// Whether to show a progress bar.
    pub verbose: Verbose,
}

impl GenerationConfig {
    pub const DEFAULT_ATTEMPTS_PER_TARGET: usize = 1000;

    /// Creates a configuration for the given number of streamlines, with
    /// the default attempt budget.
    pub fn for_count(target_count: usize) -> Self {
        Self {
            target_count,
            max_attempts: target_count.saturating_mul(Self::DEFAULT_ATTEMPTS_PER_TARGET),
            rng_seed: 0,
            verbose: Verbose::No,
        }
    }

    fn validate(&self) {
        assert!(
            self.target_count > 0,
            "Target streamline count must be larger than zero."
        );
        assert!(
            self.max_attempts > 0,
            "Attempt budget must be larger than zero."
        );
    }
}

enum DirectionOutcome {
    Terminated(TerminationReason),
    Rejected(TerminationReason, RejectionReason),
}

/// Generates streamlines in parallel until the accepted-count target or the
/// attempt budget is reached.
///
/// # Parameters
///
/// - `factory`: Produces one independent tracker per worker.
/// - `seeder`: Draws seed positions (and optionally directions).
/// - `context`: Shared run context; records all terminations and rejections.
/// - `regions`: Spatial constraints and the optional anatomical collaborator.
/// - `config`: Generation bounds and reporting options.
///
/// # Returns
///
/// The accepted streamlines, in no particular order.
pub fn generate_streamlines<'a, Fac>(
    factory: &Fac,
    seeder: &dyn Seeder3,
    context: &'a SharedTrackingContext,
    regions: &TrackingRegions<'a>,
    config: &GenerationConfig,
) -> Vec<Streamline>
where
    Fac: TrackerFactory3<'a>,
{
    config.validate();
    if let Some(act) = regions.act {
        assert!(
            !act.backtrack() || factory.supports_backtracking(),
            "Backtracking requires a propagation algorithm with more than one \
             candidate direction per step."
        );
    }

    let accepted = AtomicUsize::new(0);
    let attempts = AtomicUsize::new(0);
    let progress = if config.verbose.is_yes() {
        Some(ProgressBar::new(config.target_count as u64))
    } else {
        None
    };

    let (sender, receiver) = mpsc::channel();
    let num_workers = rayon::current_num_threads();

    (0..num_workers)
        .into_par_iter()
        .for_each_with(sender, |sender, worker| {
            let worker_seed = config
                .rng_seed
                .wrapping_add((worker as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let mut tracker = factory.produce(StdRng::seed_from_u64(worker_seed));
            tracker.state_mut().mask = regions.mask;
            tracker.state_mut().exclude = regions.exclude;
            tracker.state_mut().act = regions.act;

            // The stop conditions are only consulted between attempts, so a
            // streamline in progress is always driven to completion.
            loop {
                if accepted.load(Ordering::Relaxed) >= config.target_count {
                    break;
                }
                let attempt = attempts.fetch_add(1, Ordering::Relaxed);
                if attempt >= config.max_attempts {
                    break;
                }
                if let Some(streamline) =
                    generate_attempt(&mut tracker, seeder, context, regions, attempt)
                {
                    accepted.fetch_add(1, Ordering::Relaxed);
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    if sender.send(streamline).is_err() {
                        break;
                    }
                }
            }
        });

    if let Some(bar) = &progress {
        bar.finish();
    }
    let mut streamlines: Vec<_> = receiver.into_iter().collect();
    streamlines.truncate(config.target_count);
    streamlines
}

/// Runs one complete bidirectional generation attempt.
fn generate_attempt<'a, M>(
    tracker: &mut M,
    seeder: &dyn Seeder3,
    context: &SharedTrackingContext,
    regions: &TrackingRegions<'a>,
    attempt_index: usize,
) -> Option<Streamline>
where
    M: TrackingMethod<'a>,
{
    let (seed, seed_direction) = seeder.draw(&mut tracker.state_mut().rng);
    if !tracker.init(&seed, seed_direction.as_ref()) {
        if tracker.state().position.all_finite() {
            context.add_rejection(RejectionReason::NoPropagationFromSeed);
        } else {
            context.add_rejection(RejectionReason::InvalidSeed);
        }
        return None;
    }

    let seed_position = tracker.state().position.clone();
    let first_direction = tracker.state().direction.clone();

    let mut streamline = Streamline::new();
    streamline.set_index(TrackIndex(attempt_index));
    streamline.push(seed_position.clone());

    let mut include_visited = vec![false; regions.include.len()];
    mark_includes(&seed_position, regions, &mut include_visited);

    // Primary direction.
    match track_one_direction(tracker, context, regions, &mut streamline, &mut include_visited)
    {
        DirectionOutcome::Terminated(termination) => context.add_termination(termination),
        DirectionOutcome::Rejected(termination, rejection) => {
            context.add_termination(termination);
            context.add_rejection(rejection);
            return None;
        }
    }

    // Opposite direction, restarting from the seed.
    streamline.reverse();
    tracker.state_mut().position = seed_position;
    tracker.state_mut().direction = first_direction.reversed();
    tracker.state_mut().sgm_depth = 0;
    match track_one_direction(tracker, context, regions, &mut streamline, &mut include_visited)
    {
        DirectionOutcome::Terminated(termination) => context.add_termination(termination),
        DirectionOutcome::Rejected(termination, rejection) => {
            context.add_termination(termination);
            context.add_rejection(rejection);
            return None;
        }
    }

    if streamline.number_of_points() < context.min_num_points() {
        context.add_rejection(RejectionReason::TrackTooShort);
        return None;
    }
    if include_visited.iter().any(|&visited| !visited) {
        context.add_rejection(RejectionReason::MissedIncludeRegion);
        return None;
    }
    streamline.downsample(context.config().downsample_factor);
    Some(streamline)
}

/// Drives the tracker in its current direction until it terminates,
/// backtracking over poor anatomical terminations where permitted.
fn track_one_direction<'a, M>(
    tracker: &mut M,
    context: &SharedTrackingContext,
    regions: &TrackingRegions<'a>,
    streamline: &mut Streamline,
    include_visited: &mut [bool],
) -> DirectionOutcome
where
    M: TrackingMethod<'a>,
{
    let backtracking = regions
        .act
        .is_some_and(|anatomical| anatomical.backtrack());
    let mut revert_step = 1;
    let mut longest_at_backtrack = 0;

    loop {
        if streamline.number_of_points() >= context.max_num_points() {
            return DirectionOutcome::Terminated(TerminationReason::LengthExceeded);
        }

        let mut termination = match tracker.next() {
            StepOutcome::Continue => {
                let position = tracker.state().position.clone();
                match check_position(tracker, regions, &position, include_visited) {
                    None => {
                        streamline.push(position);
                        continue;
                    }
                    Some(termination) => termination,
                }
            }
            StepOutcome::Stopped(termination) => termination,
        };

        // Fading signal inside subcortical grey matter is where such a
        // track is supposed to end.
        if termination == TerminationReason::Model && tracker.state().sgm_depth > 0 {
            termination = TerminationReason::TermInSubcorticalGreyMatter;
        }

        if termination == TerminationReason::EnterExcludeRegion {
            return DirectionOutcome::Rejected(
                termination,
                RejectionReason::EnteredExcludeRegion,
            );
        }

        if regions.act.is_some() && !act::termination_is_acceptable(termination) {
            if backtracking {
                let length = streamline.number_of_points();
                if length > longest_at_backtrack {
                    longest_at_backtrack = length;
                    revert_step = 1;
                } else {
                    revert_step += 1;
                }
                tracker.truncate_track(streamline, length, revert_step);
                if tracker.state().position.all_finite() {
                    continue;
                }
            }
            return DirectionOutcome::Rejected(termination, RejectionReason::PoorTermination);
        }

        return DirectionOutcome::Terminated(termination);
    }
}

/// Checks a freshly accepted position against the spatial and anatomical
/// constraints, updating the inclusion bookkeeping.
fn check_position<'a, M>(
    tracker: &mut M,
    regions: &TrackingRegions<'a>,
    position: &Point3<ftr>,
    include_visited: &mut [bool],
) -> Option<TerminationReason>
where
    M: TrackingMethod<'a>,
{
    if regions.mask.is_some_and(|mask| !mask.contains(position)) {
        return Some(TerminationReason::ExitMask);
    }
    if regions
        .exclude
        .is_some_and(|exclude| exclude.contains(position))
    {
        return Some(TerminationReason::EnterExcludeRegion);
    }
    if let Some(anatomical) = regions.act {
        let tissue = anatomical.classify(position);
        if let Some(termination) =
            act::structural_transition(tissue, &mut tracker.state_mut().sgm_depth)
        {
            return Some(termination);
        }
    }
    mark_includes(position, regions, include_visited);
    None
}

fn mark_includes(
    position: &Point3<ftr>,
    regions: &TrackingRegions<'_>,
    include_visited: &mut [bool],
) {
    for (region, visited) in regions.include.iter().zip(include_visited.iter_mut()) {
        if !*visited && region.contains(position) {
            *visited = true;
        }
    }
}
