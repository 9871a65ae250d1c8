//! Core containers, spline machinery and transformations for deformable
//! image registration.
//!
//! Images and vector fields are plain in-memory grids with the x axis
//! varying fastest. Everything is expressed in pixel coordinates.

pub mod error;
pub mod factory;
pub mod image;
pub mod spatial;
pub mod interpolation;
pub mod transform;
pub mod filter;

pub use error::{CoreError, Result};
pub use factory::Descriptor;
pub use image::{FVector, Image, VectorField};
pub use spatial::{Jacobian, Vector};
pub use interpolation::{BoundaryKind, Interpolator, SharedKernel, SplineInterpolator, SplineKernel};
pub use transform::{DisplacementFieldTransform, SplinePenalty, SplineTransform, Transform};
