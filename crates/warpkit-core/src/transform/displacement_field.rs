//! Dense displacement field transform.
//!
//! Every pixel carries its own displacement vector. This is the model used
//! by fluid registration, where the field is updated directly instead of
//! through a parameter vector.

use super::trait_::Transform;
use crate::error::{CoreError, Result};
use crate::filter::resample::{resample_field, sample_field_linear};
use crate::image::VectorField;
use crate::spatial::{Jacobian, Vector};

/// Dense displacement field transform.
///
/// Between grid points the displacement is interpolated multilinearly.
///
/// # Type Parameters
/// * `D` - The dimensionality (2 or 3)
#[derive(Debug, Clone)]
pub struct DisplacementFieldTransform<const D: usize> {
    field: VectorField<D>,
}

impl<const D: usize> DisplacementFieldTransform<D> {
    /// Wrap an existing displacement field.
    pub fn new(field: VectorField<D>) -> Self {
        Self { field }
    }

    /// Identity transform on a grid.
    pub fn identity(size: [usize; D]) -> Self {
        Self::new(VectorField::zeros(size))
    }

    pub fn field(&self) -> &VectorField<D> {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut VectorField<D> {
        &mut self.field
    }

    pub fn into_field(self) -> VectorField<D> {
        self.field
    }

    /// Carry the transform to a grid of another size.
    ///
    /// The field is resampled with aligned corners and every component is
    /// multiplied by `(new - 1) / (old - 1)` of its axis.
    ///
    /// # Errors
    /// `InvalidArgument` if an axis of either grid has fewer than 2 pixels.
    pub fn upscale(&self, new_size: [usize; D]) -> Result<Self> {
        let old = self.field.size();
        if old.iter().chain(new_size.iter()).any(|&s| s < 2) {
            return Err(CoreError::invalid_argument(format!(
                "cannot rescale a displacement field from {:?} to {:?}",
                old, new_size
            )));
        }
        let mut field = resample_field(&self.field, new_size);
        let factor: [f32; D] =
            std::array::from_fn(|d| (new_size[d] - 1) as f32 / (old[d] - 1) as f32);
        for v in field.data_mut() {
            for d in 0..D {
                v[d] *= factor[d];
            }
        }
        Ok(Self { field })
    }
}

impl<const D: usize> Transform<D> for DisplacementFieldTransform<D> {
    fn size(&self) -> [usize; D] {
        self.field.size()
    }

    fn displacement_at(&self, point: [f64; D]) -> Vector<D> {
        sample_field_linear(&self.field, point)
    }

    /// Central differences of the interpolated field, one-sided at the
    /// border.
    fn jacobian_at(&self, point: [f64; D]) -> Jacobian<D> {
        let size = self.field.size();
        let mut jacobian = Jacobian::<D>::zeros();
        for j in 0..D {
            let max = (size[j] - 1) as f64;
            let lo = (point[j] - 1.0).max(0.0);
            let hi = (point[j] + 1.0).min(max);
            if hi <= lo {
                continue;
            }
            let mut p_lo = point;
            let mut p_hi = point;
            p_lo[j] = lo;
            p_hi[j] = hi;
            let column = (sample_field_linear(&self.field, p_hi)
                - sample_field_linear(&self.field, p_lo))
                / (hi - lo);
            jacobian.set_column(j, &column);
        }
        jacobian
    }

    fn displacement_field(&self) -> VectorField<D> {
        self.field.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FVector;
    use approx::assert_abs_diff_eq;

    fn linear_field() -> DisplacementFieldTransform<2> {
        DisplacementFieldTransform::new(VectorField::from_fn([9, 5], |[x, y]| {
            FVector::<2>::new(0.5 * x as f32, -0.25 * y as f32 + 0.1 * x as f32)
        }))
    }

    #[test]
    fn test_interpolated_displacement_and_jacobian() {
        let t = linear_field();
        let u = t.displacement_at([2.5, 1.5]);
        assert_abs_diff_eq!(u[0], 1.25, epsilon = 1e-6);
        assert_abs_diff_eq!(u[1], -0.125, epsilon = 1e-6);

        let j = t.jacobian_at([0.0, 4.0]);
        assert_abs_diff_eq!(j[(0, 0)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(j[(1, 0)], 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(j[(1, 1)], -0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(t.transform_point([2.0, 2.0])[0], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_upscale_scales_vectors() {
        let t = linear_field();
        let up = t.upscale([17, 9]).unwrap();
        assert_eq!(up.size(), [17, 9]);
        // pixel 8 of the new grid is pixel 4 of the old one, displacement doubled
        assert_abs_diff_eq!(up.field().get([8, 4])[0], 4.0, epsilon = 1e-5);
        assert!(t.upscale([1, 9]).is_err());
        let identity = DisplacementFieldTransform::<2>::identity([4, 4]).upscale([8, 8]).unwrap();
        assert_eq!(identity.field().max_norm(), 0.0);
    }
}
