//! End-to-end streamline generation scenarios on synthetic fields.

use approx::assert_abs_diff_eq;
use tractus::field::{DiscretePeakField, SphereRegion3};
use tractus::geometry::{Dim3, Point3, Vec3};
use tractus::tracking::act::{AnatomicalConstraint3, Tissue};
use tractus::tracking::calibration::Calibration;
use tractus::tracking::context::{SharedTrackingContext, TrackingConfig};
use tractus::tracking::deterministic::DeterministicTrackerFactory;
use tractus::tracking::ftr;
use tractus::tracking::generate::{
    generate_streamlines, GenerationConfig, Seeder3, TrackingRegions, Verbose,
};
use tractus::tracking::probabilistic::ProbabilisticTrackerFactory;
use tractus::tracking::stats::{RejectionReason, TerminationReason};

use Dim3::{X, Y, Z};

fn unit_z_field() -> DiscretePeakField<f64> {
    DiscretePeakField::uniform(
        (40, 40, 40),
        Vec3::new(0.0, 0.0, 1.0),
        1.0,
        Point3::new(-20.0, -20.0, -20.0),
        1.0,
    )
}

fn z_seed() -> (Point3<ftr>, Option<Vec3<ftr>>) {
    (Point3::origin(), Some(Vec3::new(0.0, 0.0, 1.0)))
}

fn generation_config(target_count: usize, max_attempts: usize) -> GenerationConfig {
    GenerationConfig {
        target_count,
        max_attempts,
        rng_seed: 42,
        verbose: Verbose::No,
    }
}

#[test]
fn a_straight_field_produces_an_exactly_bounded_streamline() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            max_angle: 45.0,
            cutoff: 0.1,
            min_length: 2.0,
            max_length: 10.0,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &TrackingRegions::default(),
        &generation_config(1, 1),
    );

    assert_eq!(streamlines.len(), 1);
    let streamline = &streamlines[0];
    assert_eq!(streamline.number_of_points(), 10);
    // Both directional passes end by exhausting the length budget.
    assert_eq!(
        context.termination_count(TerminationReason::LengthExceeded),
        2
    );

    // Every point lies on the z-axis, spaced exactly one step apart.
    for pair in streamline.points().windows(2) {
        assert_abs_diff_eq!((&pair[1] - &pair[0]).length(), 1.0, epsilon = 1e-12);
    }
    for point in streamline.points() {
        assert_abs_diff_eq!(point[X], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(point[Y], 0.0, epsilon = 1e-12);
    }
    // The seed sits at the reversed end of the bidirectional assembly.
    let seed_point = &streamline.points()[streamline.seed_index()];
    assert_abs_diff_eq!(
        (seed_point - &Point3::origin()).length(),
        0.0,
        epsilon = 1e-12
    );

    let report = context.report().to_string();
    assert!(report.contains("maximum length reached"));
}

#[test]
fn a_cutoff_above_the_field_amplitude_rejects_every_attempt() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            cutoff: 1.1,
            seed_cutoff: Some(0.5),
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &TrackingRegions::default(),
        &generation_config(1, 3),
    );

    assert!(streamlines.is_empty());
    // Each attempt terminates with no signal in both directions, leaving a
    // seed-point-only track that minimum-length filtering discards.
    assert_eq!(context.termination_count(TerminationReason::Model), 6);
    assert_eq!(context.rejection_count(RejectionReason::TrackTooShort), 3);
}

#[test]
fn termination_counts_match_the_attempt_budget_under_contention() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            max_length: 8.0,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let seeder = z_seed();
    let max_attempts = 50;
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &TrackingRegions::default(),
        &generation_config(1000, max_attempts),
    );

    // Every attempt deterministically succeeds with two directional
    // terminations, however many workers raced over the budget.
    assert_eq!(streamlines.len(), max_attempts);
    assert_eq!(context.stats().total_terminations(), 2 * max_attempts);
    assert_eq!(
        context.termination_count(TerminationReason::LengthExceeded),
        2 * max_attempts
    );
    assert_eq!(context.stats().total_rejections(), 0);
}

#[test]
fn entering_an_exclusion_region_rejects_the_track() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            max_length: 15.0,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let exclude = SphereRegion3::new(Point3::new(0.0, 0.0, 5.0), 1.0);
    let regions = TrackingRegions {
        exclude: Some(&exclude),
        ..TrackingRegions::default()
    };
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &regions,
        &generation_config(1, 3),
    );

    assert!(streamlines.is_empty());
    assert_eq!(
        context.rejection_count(RejectionReason::EnteredExcludeRegion),
        3
    );
}

#[test]
fn tracks_must_traverse_every_inclusion_region() {
    let field = unit_z_field();
    // A generous length budget lets both directional passes run to the edge
    // of the image, traversing the on-axis regions on either side of the seed.
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let on_axis_a = SphereRegion3::new(Point3::new(0.0, 0.0, 3.0), 1.0);
    let on_axis_b = SphereRegion3::new(Point3::new(0.0, 0.0, -3.0), 1.0);
    let seeder = z_seed();

    let traversable = TrackingRegions {
        include: vec![&on_axis_a, &on_axis_b],
        ..TrackingRegions::default()
    };
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &traversable,
        &generation_config(1, 1),
    );
    assert_eq!(streamlines.len(), 1);
    assert_eq!(
        context.rejection_count(RejectionReason::MissedIncludeRegion),
        0
    );

    let off_axis = SphereRegion3::new(Point3::new(8.0, 8.0, 0.0), 1.0);
    let missable = TrackingRegions {
        include: vec![&off_axis],
        ..TrackingRegions::default()
    };
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &missable,
        &generation_config(1, 2),
    );
    assert!(streamlines.is_empty());
    assert_eq!(
        context.rejection_count(RejectionReason::MissedIncludeRegion),
        2
    );
}

/// White matter around the seed plane, cortical grey matter past |z| = 2.5.
struct CorticalCaps;

impl AnatomicalConstraint3 for CorticalCaps {
    fn check_seed(&self, position: &Point3<ftr>) -> bool {
        self.classify(position) == Tissue::WhiteMatter
    }

    fn backtrack(&self) -> bool {
        false
    }

    fn classify(&self, position: &Point3<ftr>) -> Tissue {
        if position[Z].abs() > 2.5 {
            Tissue::CorticalGreyMatter
        } else {
            Tissue::WhiteMatter
        }
    }
}

/// Like [`CorticalCaps`], but with cerebrospinal fluid below the seed plane.
struct CsfFloor {
    backtrack: bool,
}

impl AnatomicalConstraint3 for CsfFloor {
    fn check_seed(&self, position: &Point3<ftr>) -> bool {
        self.classify(position) == Tissue::WhiteMatter
    }

    fn backtrack(&self) -> bool {
        self.backtrack
    }

    fn classify(&self, position: &Point3<ftr>) -> Tissue {
        if position[Z] > 2.5 {
            Tissue::CorticalGreyMatter
        } else if position[Z] < -2.5 {
            Tissue::CerebrospinalFluid
        } else {
            Tissue::WhiteMatter
        }
    }
}

#[test]
fn tracks_ending_in_cortical_grey_matter_are_accepted() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            use_act: true,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let anatomy = CorticalCaps;
    let regions = TrackingRegions {
        act: Some(&anatomy),
        ..TrackingRegions::default()
    };
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &regions,
        &generation_config(1, 1),
    );

    assert_eq!(streamlines.len(), 1);
    assert_eq!(
        context.termination_count(TerminationReason::EnterCorticalGreyMatter),
        2
    );
    assert_eq!(context.stats().total_rejections(), 0);
}

#[test]
fn tracks_ending_in_csf_are_rejected_without_backtracking() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            use_act: true,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let anatomy = CsfFloor { backtrack: false };
    let regions = TrackingRegions {
        act: Some(&anatomy),
        ..TrackingRegions::default()
    };
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &regions,
        &generation_config(1, 3),
    );

    assert!(streamlines.is_empty());
    assert_eq!(context.termination_count(TerminationReason::EnterCsf), 3);
    assert_eq!(
        context.rejection_count(RejectionReason::PoorTermination),
        3
    );
}

#[test]
#[should_panic(expected = "Backtracking")]
fn backtracking_refuses_a_single_direction_algorithm() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            use_act: true,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let factory = DeterministicTrackerFactory::new(&context, &field);
    let anatomy = CsfFloor { backtrack: true };
    let regions = TrackingRegions {
        act: Some(&anatomy),
        ..TrackingRegions::default()
    };
    let seeder = z_seed();
    generate_streamlines(
        &factory,
        &seeder,
        &context,
        &regions,
        &generation_config(1, 1),
    );
}

#[test]
fn probabilistic_generation_fills_the_target_count() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            max_angle: 30.0,
            max_length: 12.0,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let calibration = Calibration::compute(context.max_angle(), |elevation: ftr| elevation.cos());
    let factory = ProbabilisticTrackerFactory::new(&context, &field, &calibration);
    let seeder = z_seed();
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &TrackingRegions::default(),
        &generation_config(5, 5000),
    );

    assert_eq!(streamlines.len(), 5);
    let step_size = context.step_size();
    for streamline in &streamlines {
        assert!(streamline.number_of_points() >= context.min_num_points());
        for pair in streamline.points().windows(2) {
            assert_abs_diff_eq!(
                (&pair[1] - &pair[0]).length(),
                step_size,
                epsilon = 1e-9
            );
        }
    }
}

#[test]
fn backtracking_attempts_are_bounded_and_eventually_rejected() {
    let field = unit_z_field();
    let context = SharedTrackingContext::new(
        TrackingConfig {
            step_fraction: 1.0,
            max_angle: 20.0,
            use_act: true,
            ..TrackingConfig::default()
        },
        1.0,
    );
    let calibration = Calibration::compute(context.max_angle(), |elevation: ftr| elevation.cos());
    let factory = ProbabilisticTrackerFactory::new(&context, &field, &calibration);
    let anatomy = CsfFloor { backtrack: true };
    let regions = TrackingRegions {
        act: Some(&anatomy),
        ..TrackingRegions::default()
    };
    let seeder = z_seed();
    // A straight-z field cannot avoid the CSF floor on the backward pass,
    // so every attempt must exhaust its backtracking and be rejected.
    let streamlines = generate_streamlines(
        &factory,
        &seeder,
        &context,
        &regions,
        &generation_config(1, 3),
    );

    assert!(streamlines.is_empty());
    assert_eq!(
        context.rejection_count(RejectionReason::PoorTermination),
        3
    );
}

#[test]
fn sphere_seeding_draws_seeds_inside_the_sphere() {
    use rand::SeedableRng;
    let seeder = tractus::tracking::generate::SphereSeeder3::new(Point3::new(1.0, 2.0, 3.0), 2.0);
    let mut rng = rand::rngs::StdRng::seed_from_u64(5);
    for _ in 0..100 {
        let (seed, direction) = seeder.draw(&mut rng);
        assert!(direction.is_none());
        assert!((&seed - &Point3::new(1.0, 2.0, 3.0)).length() <= 2.0 + 1e-12);
    }
}
