//! Streamlines: reconstructed candidate fiber pathways.

use super::ftr;
use crate::geometry::Point3;

#[cfg(feature = "serialization")]
use serde::Serialize;

/// Index tying a streamline back to the generation attempt it originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct TrackIndex(pub usize);

/// An ordered, append-only sequence of scanner-space points making up a
/// reconstructed fiber pathway.
///
/// Points are stored in spatial order along the path. The seed index records
/// which point the generation attempt started from, which is non-zero after
/// bidirectional assembly. Once a streamline has been handed off it is never
/// mutated again; truncation only happens during generation.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct Streamline {
    points: Vec<Point3<ftr>>,
    seed_index: usize,
    weight: ftr,
    index: Option<TrackIndex>,
}

impl Streamline {
    /// Creates a new empty streamline with unit weight.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            seed_index: 0,
            weight: 1.0,
            index: None,
        }
    }

    /// Returns a reference to the points making up the streamline.
    pub fn points(&self) -> &[Point3<ftr>] {
        &self.points
    }

    /// Returns the number of points making up the streamline.
    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    /// Whether the streamline holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the index of the seed point within the streamline.
    pub fn seed_index(&self) -> usize {
        self.seed_index
    }

    /// Returns the weight of the streamline.
    pub fn weight(&self) -> ftr {
        self.weight
    }

    /// Sets the weight of the streamline.
    pub fn set_weight(&mut self, weight: ftr) {
        self.weight = weight;
    }

    /// Returns the originating attempt index, if assigned.
    pub fn index(&self) -> Option<TrackIndex> {
        self.index
    }

    /// Assigns the originating attempt index.
    pub fn set_index(&mut self, index: TrackIndex) {
        self.index = Some(index);
    }

    /// Returns a reference to the last point of the streamline.
    pub fn last_point(&self) -> Option<&Point3<ftr>> {
        self.points.last()
    }

    /// Appends a point to the end of the streamline.
    pub fn push(&mut self, point: Point3<ftr>) {
        self.points.push(point);
    }

    /// Shortens the streamline to the given number of points.
    pub fn truncate(&mut self, number_of_points: usize) {
        self.points.truncate(number_of_points);
    }

    /// Removes all points and resets the seed index.
    pub fn clear(&mut self) {
        self.points.clear();
        self.seed_index = 0;
    }

    /// Reverses the spatial order of the points, updating the seed index
    /// accordingly.
    ///
    /// Used when switching from the primary to the opposite tracking
    /// direction during bidirectional assembly.
    pub fn reverse(&mut self) {
        if !self.points.is_empty() {
            self.points.reverse();
            self.seed_index = self.points.len() - 1 - self.seed_index;
        }
    }

    /// Computes the physical length of the streamline for the given
    /// inter-point step size.
    pub fn length(&self, step_size: ftr) -> ftr {
        if self.points.is_empty() {
            0.0
        } else {
            (self.points.len() - 1) as ftr * step_size
        }
    }

    /// Keeps only every `factor`-th point, always retaining the seed point
    /// and the endpoints.
    pub fn downsample(&mut self, factor: usize) {
        if factor < 2 || self.points.len() < 3 {
            return;
        }
        let last = self.points.len() - 1;
        let seed_index = self.seed_index;
        let mut kept = 0;
        let mut new_seed_index = 0;
        let points = std::mem::take(&mut self.points);
        for (i, point) in points.into_iter().enumerate() {
            let aligned = i % factor == seed_index % factor;
            if i == 0 || i == last || i == seed_index || aligned {
                if i == seed_index {
                    new_seed_index = kept;
                }
                self.points.push(point);
                kept += 1;
            }
        }
        self.seed_index = new_seed_index;
    }
}

impl Default for Streamline {
    fn default() -> Self {
        Self::new()
    }
}
