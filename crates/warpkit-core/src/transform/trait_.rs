//! Transform trait for deformable transformations.
//!
//! A transformation maps every point `x` of the reference grid to
//! `x + u(x)` in the moving image. Implementations provide the displacement
//! `u` and its Jacobian; the derived quantities follow from those.

use crate::filter::resample;
use crate::image::{Image, VectorField};
use crate::interpolation::Interpolator;
use crate::spatial::{Jacobian, Vector};

/// Deformable transformation on a fixed image grid.
///
/// # Type Parameters
/// * `D` - The spatial dimensionality (2 or 3)
pub trait Transform<const D: usize>: Send + Sync {
    /// Size of the image grid the transformation is defined on.
    fn size(&self) -> [usize; D];

    /// Displacement `u(x)` at a continuous point.
    fn displacement_at(&self, point: [f64; D]) -> Vector<D>;

    /// Jacobian `∂u_i/∂x_j` at a continuous point.
    fn jacobian_at(&self, point: [f64; D]) -> Jacobian<D>;

    /// Displacement at every grid point.
    fn displacement_field(&self) -> VectorField<D>;

    /// Map a point: `x + u(x)`.
    fn transform_point(&self, point: [f64; D]) -> [f64; D] {
        let u = self.displacement_at(point);
        std::array::from_fn(|d| point[d] + u[d])
    }

    /// Divergence of the displacement at a point.
    fn divergence_at(&self, point: [f64; D]) -> f64 {
        self.jacobian_at(point).trace()
    }

    /// Magnitude of the curl of the displacement at a point.
    ///
    /// In 2D this is `|∂u_y/∂x - ∂u_x/∂y|`; in 3D the norm of the curl vector.
    fn curl_at(&self, point: [f64; D]) -> f64 {
        let j = self.jacobian_at(point);
        let mut sum = 0.0;
        for a in 0..D {
            for b in (a + 1)..D {
                let w = j[(b, a)] - j[(a, b)];
                sum += w * w;
            }
        }
        sum.sqrt()
    }

    /// Resample a source image through this transformation.
    fn warp(&self, source: &dyn Interpolator<D>) -> Image<D> {
        resample::warp(source, &self.displacement_field())
    }
}
