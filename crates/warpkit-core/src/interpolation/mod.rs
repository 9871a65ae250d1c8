//! Spline kernels, boundary conditions and image interpolation.
//!
//! This module provides the building blocks shared by image interpolation
//! and the spline transformation: basis kernels, boundary index mapping and
//! the recursive prefilter that converts samples into coefficients.

pub mod trait_;
pub mod kernel;
pub mod boundary;
pub mod bspline;

pub use trait_::Interpolator;
pub use kernel::{KernelFamily, SharedKernel, SplineKernel};
pub use boundary::{BoundaryCondition, BoundaryKind};
pub use bspline::{prefilter, SplineInterpolator};
