//! Spline image interpolation.
//!
//! The image is converted once into spline coefficients by separable
//! recursive prefiltering. Evaluation then sums `(degree + 1)^D`
//! coefficients weighted by products of per-axis kernel weights.

use rayon::prelude::*;

use super::boundary::{BoundaryCondition, BoundaryKind};
use super::kernel::{SharedKernel, SplineKernel};
use super::trait_::Interpolator;
use crate::error::Result;
use crate::image::{grid, Image};

/// Largest kernel support (degree 5).
pub(crate) const MAX_SUPPORT: usize = 6;

/// Kernel weights and boundary-mapped indices along one axis.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AxisTaps {
    pub indices: [usize; MAX_SUPPORT],
    pub weights: [f64; MAX_SUPPORT],
    pub len: usize,
}

impl AxisTaps {
    #[inline]
    pub fn new(kernel: &SplineKernel, bc: &BoundaryCondition, x: f64, order: usize) -> Self {
        let len = kernel.size();
        let mut taps = Self {
            indices: [0; MAX_SUPPORT],
            weights: [0.0; MAX_SUPPORT],
            len,
        };
        let start = kernel.weights(x, order, &mut taps.weights[..len]);
        bc.apply(start, &mut taps.indices[..len], &mut taps.weights[..len]);
        taps
    }
}

/// Visit every non-zero tap of a separable stencil.
///
/// Calls `f(linear_offset, weight)` for each combination of per-axis taps.
#[inline]
pub(crate) fn for_each_tap<const D: usize, F>(taps: &[AxisTaps; D], strides: [usize; D], mut f: F)
where
    F: FnMut(usize, f64),
{
    let n = taps[0].len;
    let total = n.pow(D as u32);
    for t in 0..total {
        let mut rem = t;
        let mut weight = 1.0;
        let mut offset = 0;
        for d in 0..D {
            let i = rem % n;
            rem /= n;
            weight *= taps[d].weights[i];
            offset += taps[d].indices[i] * strides[d];
        }
        if weight != 0.0 {
            f(offset, weight);
        }
    }
}

/// Prefilter a scalar grid along every axis.
///
/// # Arguments
/// * `data` - Samples in x-fastest order, replaced by coefficients
/// * `size` - Grid size
/// * `kind` - Boundary condition used for the initial values
/// * `kernel` - Kernel providing the poles
///
/// # Errors
/// `InvalidArgument` when `kind` does not support the kernel.
pub fn prefilter<const D: usize>(
    data: &mut [f64],
    size: [usize; D],
    kind: BoundaryKind,
    kernel: &SplineKernel,
) -> Result<()> {
    kind.ensure_supports(kernel)?;
    if kernel.is_interpolating() {
        return Ok(());
    }
    let strides = grid::strides(size);
    for axis in 0..D {
        let len = size[axis];
        if len < 2 {
            continue;
        }
        let bc = BoundaryCondition::new(kind, len)?;
        if axis == 0 {
            data.par_chunks_mut(len)
                .try_for_each(|line| bc.filter_line(line, kernel.poles()))?;
            continue;
        }

        let stride = strides[axis];
        let block = stride * len;
        let starts: Vec<usize> = (0..data.len())
            .filter(|&i| (i % block) < stride)
            .collect();
        let view: &[f64] = data;
        let lines: Vec<Vec<f64>> = starts
            .par_iter()
            .map(|&s| {
                let mut line: Vec<f64> = (0..len).map(|k| view[s + k * stride]).collect();
                bc.filter_line(&mut line, kernel.poles()).map(|_| line)
            })
            .collect::<Result<_>>()?;
        for (&s, line) in starts.iter().zip(lines) {
            for (k, v) in line.into_iter().enumerate() {
                data[s + k * stride] = v;
            }
        }
    }
    Ok(())
}

/// Spline interpolator over a scalar image.
#[derive(Debug, Clone)]
pub struct SplineInterpolator<const D: usize> {
    size: [usize; D],
    strides: [usize; D],
    coeffs: Vec<f64>,
    kernel: SharedKernel,
    boundaries: [BoundaryCondition; D],
}

impl<const D: usize> SplineInterpolator<D> {
    /// Prefilter `image` for evaluation with `kernel`.
    ///
    /// # Errors
    /// `InvalidArgument` when `kind` does not support the kernel.
    pub fn new(image: &Image<D>, kernel: SharedKernel, kind: BoundaryKind) -> Result<Self> {
        let size = image.size();
        let mut coeffs: Vec<f64> = image.data().iter().map(|&v| v as f64).collect();
        prefilter(&mut coeffs, size, kind, &kernel)?;
        let mut boundaries = [BoundaryCondition::new(kind, 1)?; D];
        for d in 0..D {
            boundaries[d] = BoundaryCondition::new(kind, size[d])?;
        }
        Ok(Self {
            size,
            strides: grid::strides(size),
            coeffs,
            kernel,
            boundaries,
        })
    }

    pub fn kernel(&self) -> &SharedKernel {
        &self.kernel
    }

    /// Evaluate the interpolated value and its gradient at `point`.
    pub fn evaluate_with_gradient(&self, point: [f64; D]) -> (f64, [f64; D]) {
        let value_taps: [AxisTaps; D] =
            std::array::from_fn(|d| AxisTaps::new(&self.kernel, &self.boundaries[d], point[d], 0));
        let mut value = 0.0;
        for_each_tap(&value_taps, self.strides, |o, w| value += w * self.coeffs[o]);

        let mut gradient = [0.0; D];
        for (axis, g) in gradient.iter_mut().enumerate() {
            let mut taps = value_taps;
            taps[axis] = AxisTaps::new(&self.kernel, &self.boundaries[axis], point[axis], 1);
            for_each_tap(&taps, self.strides, |o, w| *g += w * self.coeffs[o]);
        }
        (value, gradient)
    }
}

impl<const D: usize> Interpolator<D> for SplineInterpolator<D> {
    fn evaluate(&self, point: [f64; D]) -> f64 {
        let taps: [AxisTaps; D] =
            std::array::from_fn(|d| AxisTaps::new(&self.kernel, &self.boundaries[d], point[d], 0));
        let mut value = 0.0;
        for_each_tap(&taps, self.strides, |o, w| value += w * self.coeffs[o]);
        value
    }

    fn size(&self) -> [usize; D] {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn test_image() -> Image<2> {
        Image::from_fn([7, 6], |[x, y]| ((x * 7 + y * 3) % 5) as f32 + 0.25 * y as f32)
    }

    #[test]
    fn test_reproduces_samples() {
        let image = test_image();
        for kernel in ["bspline:d=2", "bspline:d=3", "bspline:d=5", "omoms:d=3"] {
            let kernel = Arc::new(SplineKernel::parse(kernel).unwrap());
            let interp = SplineInterpolator::new(&image, kernel, BoundaryKind::Mirror).unwrap();
            for [x, y] in grid::GridIter::new(image.size()) {
                let v = interp.evaluate([x as f64, y as f64]);
                assert_abs_diff_eq!(v, image.get([x, y]) as f64, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_linear_ramp_gradient() {
        let image = Image::from_fn([32, 32], |[x, y]| 2.0 * x as f32 - y as f32);
        let kernel = Arc::new(SplineKernel::bspline(3).unwrap());
        let interp = SplineInterpolator::new(&image, kernel, BoundaryKind::Mirror).unwrap();
        let (v, g) = interp.evaluate_with_gradient([15.4, 16.1]);
        assert_abs_diff_eq!(v, 2.0 * 15.4 - 16.1, epsilon = 1e-4);
        assert_abs_diff_eq!(g[0], 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(g[1], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rejects_unsupported_boundary() {
        let kernel = Arc::new(SplineKernel::bspline(5).unwrap());
        assert!(SplineInterpolator::new(&test_image(), kernel, BoundaryKind::Zero).is_err());
    }
}
