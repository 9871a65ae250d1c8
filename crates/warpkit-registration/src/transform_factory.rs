//! Creation of spline transformations for a given image size.

use std::fmt;

use warpkit_core::{BoundaryKind, SharedKernel, SplinePenalty, SplineTransform};

use crate::error::{RegistrationError, Result};

/// Creates identity [`SplineTransform`]s with a fixed kernel, boundary,
/// coefficient rate and penalty.
#[derive(Clone)]
pub struct SplineTransformFactory<const D: usize> {
    rate: [f64; D],
    kernel: SharedKernel,
    boundary: BoundaryKind,
    penalty: Option<Box<dyn SplinePenalty<D>>>,
}

impl<const D: usize> SplineTransformFactory<D> {
    /// # Errors
    /// `InvalidArgument` when a rate is below 1 or the boundary cannot
    /// prefilter the kernel.
    pub fn new(rate: [f64; D], kernel: SharedKernel, boundary: BoundaryKind) -> Result<Self> {
        if rate.iter().any(|&r| !(r >= 1.0 && r.is_finite())) {
            return Err(RegistrationError::invalid_argument(format!(
                "coefficient rate must be >= 1, got {:?}",
                rate
            )));
        }
        boundary.ensure_supports(&kernel)?;
        Ok(Self {
            rate,
            kernel,
            boundary,
            penalty: None,
        })
    }

    /// Attach a penalty to every created transformation.
    pub fn with_penalty(mut self, penalty: Box<dyn SplinePenalty<D>>) -> Self {
        self.penalty = Some(penalty);
        self
    }

    pub fn rate(&self) -> [f64; D] {
        self.rate
    }

    pub fn kernel(&self) -> &SharedKernel {
        &self.kernel
    }

    pub fn boundary(&self) -> BoundaryKind {
        self.boundary
    }

    pub fn has_penalty(&self) -> bool {
        self.penalty.is_some()
    }

    /// Identity transformation for images of `size`.
    pub fn create(&self, size: [usize; D]) -> Result<SplineTransform<D>> {
        let transform = SplineTransform::new(size, self.rate, self.kernel.clone(), self.boundary)?;
        Ok(match &self.penalty {
            Some(penalty) => transform.with_penalty(penalty.clone())?,
            None => transform,
        })
    }
}

impl<const D: usize> fmt::Debug for SplineTransformFactory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplineTransformFactory")
            .field("rate", &self.rate)
            .field("kernel", &self.kernel.to_string())
            .field("boundary", &self.boundary)
            .field("penalty", &self.penalty.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regularization::DivCurlPenalty;
    use std::sync::Arc;
    use warpkit_core::{SplineKernel, Transform};

    #[test]
    fn test_create_identity() {
        let kernel = Arc::new(SplineKernel::bspline(3).unwrap());
        let factory = SplineTransformFactory::new([4.0, 4.0], kernel, BoundaryKind::Mirror)
            .unwrap()
            .with_penalty(Box::new(DivCurlPenalty::<2>::new(1.0, 1.0, 1.0, false).unwrap()));
        let transform = factory.create([16, 12]).unwrap();
        assert_eq!(transform.size(), [16, 12]);
        assert_eq!(transform.max_coefficient_norm(), 0.0);
        assert_eq!(transform.penalty_value(), 0.0);
        assert!(transform.penalty().is_some());
    }

    #[test]
    fn test_rejects_parameters() {
        let kernel = Arc::new(SplineKernel::bspline(3).unwrap());
        assert!(SplineTransformFactory::new([0.5, 4.0], kernel.clone(), BoundaryKind::Mirror).is_err());
        let omoms = Arc::new(SplineKernel::omoms3());
        assert!(SplineTransformFactory::<2>::new([4.0, 4.0], omoms, BoundaryKind::Mirror).is_ok());
        let quintic = Arc::new(SplineKernel::bspline(5).unwrap());
        assert!(SplineTransformFactory::<2>::new([4.0, 4.0], quintic, BoundaryKind::Zero).is_err());
    }
}
