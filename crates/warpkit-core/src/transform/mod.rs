//! Deformable transformations.
//!
//! [`SplineTransform`] is the parametric model optimized by the
//! multi-resolution driver; [`DisplacementFieldTransform`] is the dense
//! model used by fluid registration. Both implement [`Transform`].

pub mod trait_;
pub mod penalty;
pub mod spline;
pub mod displacement_field;

pub use trait_::Transform;
pub use penalty::SplinePenalty;
pub use spline::SplineTransform;
pub use displacement_field::DisplacementFieldTransform;
