//! Utilities related to random direction sampling.

use crate::geometry::Vec3;
use crate::num::TFloat;
use rand::Rng;

/// Draws a direction uniformly distributed on the unit sphere.
///
/// Candidate vectors are sampled uniformly inside the unit cube and
/// rejected unless they fall inside the unit ball, which guarantees
/// uniformity of the normalized result.
pub fn uniform_sphere_direction<F, R>(rng: &mut R) -> Vec3<F>
where
    F: TFloat,
    R: Rng,
{
    loop {
        let x = F::from_f64(2.0 * rng.gen::<f64>() - 1.0).expect("Conversion failed");
        let y = F::from_f64(2.0 * rng.gen::<f64>() - 1.0).expect("Conversion failed");
        let z = F::from_f64(2.0 * rng.gen::<f64>() - 1.0).expect("Conversion failed");
        let candidate = Vec3::new(x, y, z);
        let squared_length = candidate.squared_length();
        if squared_length <= F::one() && squared_length > F::epsilon() {
            return candidate / squared_length.sqrt();
        }
    }
}

/// Draws a direction uniformly distributed within a cone of the given
/// half-angle about the positive polar axis.
///
/// The polar angle is drawn by inverse-transform sampling combined with a
/// sin-weighted rejection test, the azimuth uniformly.
///
/// # Parameters
///
/// - `rng`: Random number generator to draw from.
/// - `max_angle`: Half-angle of the cone in radians.
/// - `sin_max_angle`: Precomputed sine of the half-angle.
pub fn uniform_cone_direction<F, R>(rng: &mut R, max_angle: F, sin_max_angle: F) -> Vec3<F>
where
    F: TFloat,
    R: Rng,
{
    let two_pi = F::from_f64(2.0 * std::f64::consts::PI).expect("Conversion failed");
    let phi = two_pi * F::from_f64(rng.gen::<f64>()).expect("Conversion failed");
    let mut theta;
    loop {
        theta = max_angle * F::from_f64(rng.gen::<f64>()).expect("Conversion failed");
        if sin_max_angle * F::from_f64(rng.gen::<f64>()).expect("Conversion failed")
            <= theta.sin()
        {
            break;
        }
    }
    Vec3::new(
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    )
}

/// Re-expresses a direction given relative to the positive polar axis in
/// the frame where `reference` is the pole, by applying the rotation that
/// carries the polar axis onto `reference`.
///
/// Uses the closed-form axis-angle expansion rather than an explicit
/// rotation matrix. If `reference` is aligned with the polar axis the
/// rotation degenerates and only the sign of the pole component matters.
pub fn rotate_direction<F: TFloat>(reference: &Vec3<F>, direction: &Vec3<F>) -> Vec3<F> {
    use crate::geometry::Dim3::{X, Y, Z};

    let sin_polar = (reference[X] * reference[X] + reference[Y] * reference[Y]).sqrt();
    if sin_polar == F::zero() {
        return if reference[Z] < F::zero() {
            direction.reversed()
        } else {
            direction.clone()
        };
    }
    let axis = Vec3::new(-reference[Y] / sin_polar, reference[X] / sin_polar, F::zero());
    let cos_polar = reference[Z];

    let axis_component = axis.dot(direction) * (F::one() - cos_polar);
    &(&(direction * cos_polar) + &(axis.cross(direction) * sin_polar)) + &(axis * axis_component)
}

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn sphere_directions_have_unit_length() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let direction: Vec3<f64> = uniform_sphere_direction(&mut rng);
            assert_abs_diff_eq!(direction.length(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cone_directions_stay_within_the_cone() {
        let max_angle = 0.5_f64;
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let direction: Vec3<f64> =
                uniform_cone_direction(&mut rng, max_angle, max_angle.sin());
            assert_abs_diff_eq!(direction.length(), 1.0, epsilon = 1e-12);
            assert!(direction.dot(&Vec3::new(0.0, 0.0, 1.0)) >= max_angle.cos() - 1e-12);
        }
    }

    #[test]
    fn rotating_the_pole_gives_the_reference() {
        let reference = Vec3::new(1.0, -2.0, 0.5).normalized();
        let rotated = rotate_direction(&reference, &Vec3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(rotated, reference, epsilon = 1e-12);
    }

    #[test]
    fn rotation_preserves_angles_to_the_pole() {
        let reference = Vec3::new(-0.3, 0.9, 0.4).normalized();
        let direction = Vec3::new(0.1, 0.2, 1.0).normalized();
        let rotated = rotate_direction(&reference, &direction);
        assert_abs_diff_eq!(rotated.length(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            rotated.dot(&reference),
            direction[crate::geometry::Dim3::Z],
            epsilon = 1e-12
        );
    }

    #[test]
    fn aligned_reference_reduces_to_a_sign_check() {
        let direction = Vec3::new(0.6, 0.0, 0.8);
        let up = rotate_direction(&Vec3::new(0.0, 0.0, 1.0), &direction);
        let down = rotate_direction(&Vec3::new(0.0, 0.0, -1.0), &direction);
        assert_abs_diff_eq!(up, direction, epsilon = 1e-12);
        assert_abs_diff_eq!(down, direction.reversed(), epsilon = 1e-12);
    }
}
