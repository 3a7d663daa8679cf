//! Generation of streamlines through voxel-sampled orientation fields.

pub mod act;
pub mod calibration;
pub mod context;
pub mod deterministic;
pub mod generate;
pub mod method;
pub mod probabilistic;
pub mod stats;
pub mod streamline;

/// Floating-point precision to use for tracking.
#[allow(non_camel_case_types)]
pub type ftr = f64;
