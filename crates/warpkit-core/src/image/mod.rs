//! Image and vector field containers.
//!
//! This module provides the dense grids every other part of the crate works
//! on, together with the index arithmetic they share.

pub mod image;
pub mod vector_field;
pub mod grid;

pub use image::Image;
pub use vector_field::{FVector, VectorField};
pub use grid::GridIter;
