//! Orientation fields and the oracles consulted during tracking.
//!
//! The volumetric representation of the orientation field is deliberately
//! opaque to the tracking machinery: trackers only see a per-worker sampler
//! answering "is this scanner-space position inside the field, and what is
//! the amplitude in a given direction there". A simple discrete per-voxel
//! peak field is provided for synthetic data and tests.

use crate::geometry::{Dim3, Idx3, Point3, Vec3};
use crate::num::TFloat;
use crate::tracking::ftr;
use ndarray::Array3;
use Dim3::{X, Y, Z};

/// Defines the properties of a provider of orientation-field samplers.
///
/// The provider itself is immutable and shared by all workers; every worker
/// obtains its own sampler, since samplers carry mutable position caches.
pub trait OrientationField3: Sync {
    type Sampler<'a>: FieldSampler3
    where
        Self: 'a;

    /// Returns the smallest voxel extent of the underlying grid,
    /// in scanner-space units.
    fn voxel_size(&self) -> ftr;

    /// Creates an independent sampler over this field.
    fn sampler(&self) -> Self::Sampler<'_>;
}

/// Mutable per-worker sampling state over an orientation field.
pub trait FieldSampler3 {
    /// Moves the sampler to the given scanner-space position.
    ///
    /// Returns `false` if the position lies outside the valid domain of the
    /// field, in which case the amplitude queries must not be consulted.
    fn sample(&mut self, position: &Point3<ftr>) -> bool;

    /// Computes the direction-dependent amplitude of the field at the most
    /// recently sampled position.
    fn amplitude(&self, direction: &Vec3<ftr>) -> ftr;

    /// Finds the preferred fiber direction at the most recently sampled
    /// position, given the direction of arrival.
    ///
    /// Returns the new direction (sign-aligned with the direction of
    /// arrival) and its amplitude.
    fn find_peak(&self, previous_direction: &Vec3<ftr>) -> (Vec3<ftr>, ftr);
}

/// Defines the properties of a spatial region used as an inclusion or
/// exclusion constraint.
pub trait SpatialRegion3: Sync {
    /// Whether the region contains the given scanner-space position.
    fn contains(&self, position: &Point3<ftr>) -> bool;
}

/// A spherical spatial region.
#[derive(Clone, Debug)]
pub struct SphereRegion3 {
    center: Point3<ftr>,
    radius: ftr,
}

impl SphereRegion3 {
    /// Creates a new spherical region with the given center and radius.
    pub fn new(center: Point3<ftr>, radius: ftr) -> Self {
        assert!(radius > 0.0, "Region radius must be larger than zero.");
        Self { center, radius }
    }
}

impl SpatialRegion3 for SphereRegion3 {
    fn contains(&self, position: &Point3<ftr>) -> bool {
        (position - &self.center).squared_length() <= self.radius * self.radius
    }
}

/// An orientation field storing one fiber peak per voxel of a regular grid.
///
/// The directional amplitude profile of each voxel is the absolute cosine
/// of the angle to the stored peak, scaled by the stored peak amplitude,
/// making the field antipodally symmetric like the continuous orientation
/// distributions it stands in for.
#[derive(Clone, Debug)]
pub struct DiscretePeakField<F> {
    directions: Array3<Vec3<F>>,
    amplitudes: Array3<F>,
    origin: Point3<ftr>,
    voxel_extent: ftr,
}

impl<F: TFloat> DiscretePeakField<F> {
    /// Creates a new discrete peak field.
    ///
    /// # Parameters
    ///
    /// - `directions`: Unit peak direction for each voxel.
    /// - `amplitudes`: Peak amplitude for each voxel.
    /// - `origin`: Scanner-space position of the lower corner of the grid.
    /// - `voxel_extent`: Isotropic voxel edge length in scanner-space units.
    pub fn new(
        directions: Array3<Vec3<F>>,
        amplitudes: Array3<F>,
        origin: Point3<ftr>,
        voxel_extent: ftr,
    ) -> Self {
        assert_eq!(
            directions.dim(),
            amplitudes.dim(),
            "Direction and amplitude grids must have the same shape."
        );
        assert!(
            voxel_extent > 0.0,
            "Voxel extent must be larger than zero."
        );
        Self {
            directions,
            amplitudes,
            origin,
            voxel_extent,
        }
    }

    /// Creates a new field with the same peak direction and amplitude
    /// in every voxel.
    pub fn uniform(
        shape: (usize, usize, usize),
        direction: Vec3<F>,
        amplitude: F,
        origin: Point3<ftr>,
        voxel_extent: ftr,
    ) -> Self {
        Self::new(
            Array3::from_elem(shape, direction),
            Array3::from_elem(shape, amplitude),
            origin,
            voxel_extent,
        )
    }

    fn voxel_of(&self, position: &Point3<ftr>) -> Option<Idx3<usize>> {
        if !position.all_finite() {
            return None;
        }
        let shape = self.directions.dim();
        let shape = [shape.0, shape.1, shape.2];
        let mut indices = [0; 3];
        for dim in Dim3::slice() {
            let offset = (position[dim] - self.origin[dim]) / self.voxel_extent;
            if offset < 0.0 || offset >= shape[dim.num()] as ftr {
                return None;
            }
            indices[dim.num()] = offset.floor() as usize;
        }
        Some(Idx3::new(indices[0], indices[1], indices[2]))
    }
}

impl<F: TFloat> OrientationField3 for DiscretePeakField<F> {
    type Sampler<'a>
        = DiscretePeakSampler<'a, F>
    where
        Self: 'a;

    fn voxel_size(&self) -> ftr {
        self.voxel_extent
    }

    fn sampler(&self) -> Self::Sampler<'_> {
        DiscretePeakSampler {
            field: self,
            peak: Vec3::nan(),
            amplitude: ftr::NAN,
        }
    }
}

/// Per-worker sampling state over a [`DiscretePeakField`].
#[derive(Clone, Debug)]
pub struct DiscretePeakSampler<'a, F> {
    field: &'a DiscretePeakField<F>,
    peak: Vec3<ftr>,
    amplitude: ftr,
}

impl<F: TFloat> FieldSampler3 for DiscretePeakSampler<'_, F> {
    fn sample(&mut self, position: &Point3<ftr>) -> bool {
        match self.field.voxel_of(position) {
            Some(indices) => {
                let indices = (indices[X], indices[Y], indices[Z]);
                self.peak = Vec3::from(&self.field.directions[indices]);
                self.amplitude = num::cast(self.field.amplitudes[indices])
                    .expect("Conversion failed");
                true
            }
            None => {
                self.peak = Vec3::nan();
                self.amplitude = ftr::NAN;
                false
            }
        }
    }

    fn amplitude(&self, direction: &Vec3<ftr>) -> ftr {
        self.amplitude * direction.dot(&self.peak).abs()
    }

    fn find_peak(&self, previous_direction: &Vec3<ftr>) -> (Vec3<ftr>, ftr) {
        let peak = if previous_direction.dot(&self.peak) < 0.0 {
            self.peak.reversed()
        } else {
            self.peak.clone()
        };
        (peak, self.amplitude)
    }
}
