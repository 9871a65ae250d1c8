//! Image filters.
//!
//! Block reduction and the pyramid built from it drive the coarse-to-fine
//! registration; resampling warps images and carries displacement fields
//! between levels.

pub mod downsample;
pub mod median;
pub mod pyramid;
pub mod resample;

pub use downsample::{block_reduce, reduced_size};
pub use median::median;
pub use pyramid::Pyramid;
pub use resample::{resample_field, sample_field_linear, warp};
