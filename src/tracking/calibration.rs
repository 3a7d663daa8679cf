//! Calibration of the rejection-sampling envelope used by probabilistic
//! propagation.
//!
//! Probabilistic trackers draw candidate directions around the incoming
//! direction and accept them with probability proportional to the field
//! amplitude. For that to be efficient the sampler needs a tight upper
//! bound on the amplitude in the angular neighborhood of a peak. The
//! calibration sweeps the amplitude fall-off away from a notional peak once
//! per run and chooses the elevation offset that minimizes the expected
//! number of draws, trading envelope tightness against the number of
//! candidate directions that must be evaluated per step.

use super::ftr;
use crate::geometry::Vec3;
use std::f64::consts::PI;

/// The precomputed rejection-sampling envelope: a set of candidate offset
/// directions about the positive polar axis and the amplitude scale ratio.
///
/// Computed once per run and shared read-only by all workers.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    directions: Vec<Vec3<ftr>>,
    ratio: ftr,
}

impl Calibration {
    /// Elevation sweep increment in degrees.
    const ELEVATION_INCREMENT: ftr = 0.25;

    /// Builds the envelope for the given maximum deviation angle.
    ///
    /// # Parameters
    ///
    /// - `max_angle`: Maximum deviation angle per step in radians.
    /// - `amplitude_at_elevation`: Callback returning the field amplitude at
    ///   the given angular offset from a notional peak.
    ///
    /// The sweep records (elevation, amplitude) pairs in fixed increments
    /// until the amplitude becomes non-finite or non-positive. If the sweep
    /// dies at elevation zero the calibration degrades to the single polar
    /// direction with unit ratio; callers must treat that as "no viable
    /// propagation".
    pub fn compute<A>(max_angle: ftr, mut amplitude_at_elevation: A) -> Self
    where
        A: FnMut(ftr) -> ftr,
    {
        let increment = Self::ELEVATION_INCREMENT.to_radians();

        let mut amplitudes = Vec::new();
        let mut elevation = 0.0;
        while elevation <= PI / 2.0 {
            let amplitude = amplitude_at_elevation(elevation);
            if !amplitude.is_finite() || amplitude <= 0.0 {
                break;
            }
            amplitudes.push((elevation, amplitude));
            elevation += increment;
        }

        if amplitudes.len() < 2 {
            return Self {
                directions: vec![Vec3::new(0.0, 0.0, 1.0)],
                ratio: 1.0,
            };
        }

        let peak_amplitude = amplitudes[0].1;
        let mut best = None;
        for &(elevation, amplitude) in &amplitudes[1..] {
            let expected_draws = (peak_amplitude / amplitude)
                * ((max_angle + elevation) / elevation).powi(2);
            match best {
                Some((_, _, cost)) if cost <= expected_draws => {}
                _ => best = Some((elevation, amplitude, expected_draws)),
            }
        }
        let (best_elevation, best_amplitude, _) =
            best.expect("Calibration sweep produced no candidate elevations.");

        Self {
            directions: triangular_cap_lattice(max_angle + best_elevation, best_elevation),
            ratio: peak_amplitude / best_amplitude,
        }
    }

    /// Returns the candidate offset directions about the positive polar axis.
    pub fn directions(&self) -> &[Vec3<ftr>] {
        &self.directions
    }

    /// Returns the envelope scale ratio.
    pub fn ratio(&self) -> ftr {
        self.ratio
    }

    /// Whether the calibration degraded to the single polar direction.
    pub fn is_degenerate(&self) -> bool {
        self.directions.len() == 1
    }
}

/// Generates a triangular lattice of unit directions covering the spherical
/// cap of the given angular extent about the positive polar axis.
///
/// Rings of constant elevation are spaced by `spacing`, with the points of
/// adjacent rings staggered in azimuth.
fn triangular_cap_lattice(extent: ftr, spacing: ftr) -> Vec<Vec3<ftr>> {
    let mut directions = vec![Vec3::new(0.0, 0.0, 1.0)];
    let number_of_rings = (extent / spacing).floor() as usize;
    for ring in 1..=number_of_rings {
        let theta = ring as ftr * spacing;
        let count = ((2.0 * PI * theta.sin() / spacing).ceil() as usize).max(1);
        let stagger = if ring % 2 == 0 { 0.0 } else { 0.5 };
        for point in 0..count {
            let phi = 2.0 * PI * (point as ftr + stagger) / count as ftr;
            directions.push(Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            ));
        }
    }
    directions
}
