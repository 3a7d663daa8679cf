//! The `tractus` crate provides tools for reconstructing fiber pathways
//! ("streamlines") from voxel-sampled orientation fields.
pub mod field;
pub mod geometry;
pub mod num;
pub mod random;
pub mod tracking;
