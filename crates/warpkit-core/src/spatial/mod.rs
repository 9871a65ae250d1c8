//! Spatial vector types.
//!
//! Points and displacements are expressed in pixel units of the grid they
//! live on. All types are nalgebra static vectors so the usual linear
//! algebra is available on them.

use nalgebra::{SMatrix, SVector};

/// Displacement or point in D-dimensional pixel space.
pub type Vector<const D: usize> = SVector<f64, D>;

/// Jacobian `∂u_i/∂x_j` of a displacement field.
pub type Jacobian<const D: usize> = SMatrix<f64, D, D>;
