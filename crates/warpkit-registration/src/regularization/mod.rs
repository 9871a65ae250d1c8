//! Regularization of the deformation.
//!
//! * [`DivCurlPenalty`]: divergence and curl energy on spline coefficients,
//!   attached to a [`SplineTransform`](warpkit_core::SplineTransform)
//! * [`NavierSolver`]: Navier-Lamé PDE smoothing of dense velocity fields
//!   for fluid registration

pub mod divcurl;
pub mod navier;

pub use divcurl::DivCurlPenalty;
pub use navier::{perturbation, NavierSolver, SolveReport};
