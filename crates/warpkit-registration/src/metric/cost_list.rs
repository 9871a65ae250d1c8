//! Weighted lists of full-resolution image costs.
//!
//! An [`ImageFullCost`] owns a full-resolution moving/reference pair and
//! the reduced pair of the current pyramid level. The driver moves the
//! whole list from level to level with [`FullCostList::set_size`].

use tracing::debug;
use warpkit_core::filter::{block_reduce, reduced_size};
use warpkit_core::{
    BoundaryKind, Image, SharedKernel, SplineInterpolator, SplineTransform, Transform, VectorField,
};

use super::kind::ImageCostKind;
use super::trait_::ImageCost;
use crate::error::{RegistrationError, Result};

/// One weighted image cost with its image pair.
#[derive(Debug, Clone)]
pub struct ImageFullCost<const D: usize> {
    cost: ImageCostKind,
    weight: f64,
    moving_full: Image<D>,
    reference_full: Image<D>,
    reference: Image<D>,
    moving: Option<SplineInterpolator<D>>,
    kernel: SharedKernel,
    boundary: BoundaryKind,
}

impl<const D: usize> ImageFullCost<D> {
    /// Create a weighted cost.
    ///
    /// # Arguments
    /// * `cost` - Image cost
    /// * `weight` - Factor applied to value and gradient, non-negative
    /// * `moving` - Full-resolution moving image
    /// * `reference` - Full-resolution reference image
    /// * `kernel` - Kernel used to warp the moving image
    /// * `boundary` - Boundary condition used to warp the moving image
    ///
    /// # Errors
    /// `InvalidArgument` for differing image sizes, a negative or
    /// non-finite weight or an unsupported kernel/boundary pair.
    pub fn new(
        cost: ImageCostKind,
        weight: f64,
        moving: Image<D>,
        reference: Image<D>,
        kernel: SharedKernel,
        boundary: BoundaryKind,
    ) -> Result<Self> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(RegistrationError::invalid_argument(format!(
                "cost weight must be finite and non-negative, got {}",
                weight
            )));
        }
        if moving.size() != reference.size() {
            return Err(RegistrationError::shape_mismatch(&reference.size(), &moving.size()));
        }
        boundary.ensure_supports(&kernel)?;
        Ok(Self {
            cost,
            weight,
            reference: reference.clone(),
            moving_full: moving,
            reference_full: reference,
            moving: None,
            kernel,
            boundary,
        })
    }

    pub fn cost(&self) -> &ImageCostKind {
        &self.cost
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Size of the full-resolution images.
    pub fn full_size(&self) -> [usize; D] {
        self.moving_full.size()
    }

    /// Size of the current level.
    pub fn size(&self) -> [usize; D] {
        self.reference.size()
    }

    /// Level reference image.
    pub fn reference(&self) -> &Image<D> {
        &self.reference
    }

    /// Drop the level images.
    pub fn reinit(&mut self) {
        self.moving = None;
        self.reference = self.reference_full.clone();
    }

    /// Reduce the images to `size` and prepare the cost for the new
    /// reference.
    ///
    /// The block size is `ceil(full / size)` per axis.
    ///
    /// # Errors
    /// `InvalidArgument` when no block size reduces the full images to
    /// exactly `size`.
    pub fn set_size(&mut self, size: [usize; D]) -> Result<()> {
        let full = self.full_size();
        if size.iter().any(|&s| s == 0) {
            return Err(RegistrationError::invalid_argument(format!(
                "cannot reduce {:?} to {:?}",
                full, size
            )));
        }
        let block: [usize; D] = std::array::from_fn(|d| full[d].div_ceil(size[d]));
        if reduced_size(full, block) != size {
            return Err(RegistrationError::invalid_argument(format!(
                "no block reduction maps {:?} to {:?}",
                full, size
            )));
        }
        let moving = block_reduce(&self.moving_full, block)?;
        self.reference = block_reduce(&self.reference_full, block)?;
        self.cost.set_reference(&self.reference)?;
        self.moving = Some(SplineInterpolator::new(&moving, self.kernel.clone(), self.boundary)?);
        debug!(cost = ImageCost::<D>::name(&self.cost), ?size, ?block, "cost moved to level");
        Ok(())
    }

    /// Moving image warped by `transform`.
    ///
    /// # Errors
    /// `Runtime` before the first `set_size`; `InvalidArgument` when the
    /// transform covers a different grid.
    pub fn warped(&self, transform: &dyn Transform<D>) -> Result<Image<D>> {
        let moving = self
            .moving
            .as_ref()
            .ok_or_else(|| RegistrationError::runtime("cost evaluated before set_size"))?;
        if transform.size() != self.size() {
            return Err(RegistrationError::shape_mismatch(&self.size(), &transform.size()));
        }
        Ok(transform.warp(moving))
    }

    /// Weighted cost value.
    pub fn value(&self, transform: &dyn Transform<D>) -> Result<f64> {
        let warped = self.warped(transform)?;
        Ok(self.weight * self.cost.value(&warped, &self.reference)?)
    }

    /// Weighted cost value and weighted force. The force is overwritten.
    pub fn evaluate_force(&self, transform: &dyn Transform<D>, force: &mut VectorField<D>) -> Result<f64> {
        let warped = self.warped(transform)?;
        let value = self.cost.evaluate_force(&warped, &self.reference, force)?;
        force.scale(self.weight as f32);
        Ok(self.weight * value)
    }

    /// Weighted cost value; adds the weighted parameter gradient to
    /// `gradient`.
    pub fn evaluate(&self, transform: &SplineTransform<D>, gradient: &mut [f64]) -> Result<f64> {
        let warped = self.warped(transform)?;
        let mut force = VectorField::zeros(self.size());
        let value = self.cost.evaluate_force(&warped, &self.reference, &mut force)?;
        let mut local = vec![0.0; gradient.len()];
        transform.translate(&force, &mut local)?;
        for (g, l) in gradient.iter_mut().zip(&local) {
            *g += self.weight * l;
        }
        Ok(self.weight * value)
    }
}

/// Sum of weighted image costs.
#[derive(Debug, Clone, Default)]
pub struct FullCostList<const D: usize> {
    costs: Vec<ImageFullCost<D>>,
}

impl<const D: usize> FullCostList<D> {
    pub fn new() -> Self {
        Self { costs: Vec::new() }
    }

    pub fn push(&mut self, cost: ImageFullCost<D>) {
        self.costs.push(cost);
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageFullCost<D>> {
        self.costs.iter()
    }

    /// Drop all level caches.
    pub fn reinit(&mut self) {
        self.costs.iter_mut().for_each(ImageFullCost::reinit);
    }

    /// Full-resolution size shared by all costs.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty list or costs of differing sizes.
    pub fn full_size(&self) -> Result<[usize; D]> {
        let first = self
            .costs
            .first()
            .ok_or_else(|| RegistrationError::invalid_argument("cost list is empty"))?
            .full_size();
        if let Some(other) = self.costs.iter().find(|c| c.full_size() != first) {
            return Err(RegistrationError::invalid_argument(format!(
                "cost list images disagree in size: {:?} vs {:?}",
                first,
                other.full_size()
            )));
        }
        Ok(first)
    }

    /// Move every cost to a pyramid level of the given size.
    pub fn set_size(&mut self, size: [usize; D]) -> Result<()> {
        self.costs.iter_mut().try_for_each(|c| c.set_size(size))
    }

    /// Total weighted cost.
    pub fn value(&self, transform: &dyn Transform<D>) -> Result<f64> {
        self.costs.iter().map(|c| c.value(transform)).sum()
    }

    /// Total weighted cost and summed weighted force. The force is
    /// overwritten.
    pub fn evaluate_force(&self, transform: &dyn Transform<D>, force: &mut VectorField<D>) -> Result<f64> {
        force.fill_zero();
        let mut scratch = VectorField::zeros(force.size());
        let mut total = 0.0;
        for cost in &self.costs {
            total += cost.evaluate_force(transform, &mut scratch)?;
            force.add_scaled(&scratch, 1.0)?;
        }
        Ok(total)
    }

    /// Total weighted cost and its parameter gradient. The gradient is
    /// overwritten.
    pub fn evaluate(&self, transform: &SplineTransform<D>, gradient: &mut [f64]) -> Result<f64> {
        gradient.iter_mut().for_each(|g| *g = 0.0);
        let mut total = 0.0;
        for cost in &self.costs {
            total += cost.evaluate(transform, gradient)?;
        }
        debug!(value = total, costs = self.costs.len(), "evaluated cost list");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Ssd;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;
    use warpkit_core::SplineKernel;

    fn kernel() -> SharedKernel {
        Arc::new(SplineKernel::bspline(3).unwrap())
    }

    fn entry(size: [usize; 2], offset: f32, weight: f64) -> ImageFullCost<2> {
        let reference = Image::from_fn(size, |[x, y]| (x + 2 * y) as f32);
        let mut moving = reference.clone();
        moving.map_inplace(|v| v + offset);
        ImageFullCost::new(Ssd::new(true).into(), weight, moving, reference, kernel(), BoundaryKind::Mirror)
            .unwrap()
    }

    fn identity(size: [usize; 2]) -> SplineTransform<2> {
        SplineTransform::new(size, [2.0, 2.0], kernel(), BoundaryKind::Mirror).unwrap()
    }

    #[test]
    fn test_rejects_bad_entries() {
        let a = Image::<2>::zeros([4, 4]);
        let b = Image::<2>::zeros([4, 5]);
        let ssd = || ImageCostKind::from(Ssd::default());
        assert!(ImageFullCost::new(ssd(), 1.0, a.clone(), b, kernel(), BoundaryKind::Mirror).is_err());
        assert!(ImageFullCost::new(ssd(), -1.0, a.clone(), a.clone(), kernel(), BoundaryKind::Mirror).is_err());
        let quartic = Arc::new(SplineKernel::bspline(4).unwrap());
        assert!(ImageFullCost::new(ssd(), 1.0, a.clone(), a, quartic, BoundaryKind::Zero).is_err());
    }

    #[test]
    fn test_full_size_must_agree() {
        let mut list = FullCostList::new();
        assert!(list.full_size().is_err());
        list.push(entry([8, 6], 0.0, 1.0));
        assert_eq!(list.full_size().unwrap(), [8, 6]);
        list.push(entry([8, 7], 0.0, 1.0));
        assert!(list.full_size().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_evaluation_requires_level() {
        let cost = entry([8, 6], 0.5, 1.0);
        assert!(cost.value(&identity([8, 6])).is_err());
    }

    #[test]
    fn test_weighted_sum() {
        let mut list = FullCostList::new();
        list.push(entry([9, 9], 0.5, 1.0));
        list.push(entry([9, 9], 1.0, 0.5));
        list.set_size([9, 9]).unwrap();
        let t = identity([9, 9]);
        // 0.5^2/2 + 0.5 * 1^2/2
        assert_abs_diff_eq!(list.value(&t).unwrap(), 0.375, epsilon = 1e-5);
        let mut gradient = vec![1.0; t.degrees_of_freedom()];
        let value = list.evaluate(&t, &mut gradient).unwrap();
        assert_abs_diff_eq!(value, 0.375, epsilon = 1e-5);
        assert!(gradient.iter().any(|g| *g != 0.0));
    }

    #[test]
    fn test_set_size_reduces_images() {
        let mut cost = entry([9, 7], 0.0, 1.0);
        cost.set_size([5, 4]).unwrap();
        assert_eq!(cost.size(), [5, 4]);
        assert!(cost.set_size([4, 4]).is_err());
        cost.reinit();
        assert_eq!(cost.size(), [9, 7]);
    }
}
