//! Resampling through displacement fields.
//!
//! [`warp`] evaluates a source image at `x + u(x)` for every pixel of the
//! displacement grid. [`resample_field`] carries a dense displacement field
//! to a grid of a different size with multilinear interpolation.

use rayon::prelude::*;

use crate::image::{grid, FVector, Image, VectorField};
use crate::interpolation::Interpolator;
use crate::spatial::Vector;

/// Number of elements in one slice perpendicular to the last axis.
fn slice_len<const D: usize>(size: [usize; D]) -> usize {
    size[..D - 1].iter().product::<usize>().max(1)
}

/// Resample `source` through a displacement field.
///
/// # Arguments
/// * `source` - Interpolator over the moving image
/// * `field` - Displacement `u` on the output grid
///
/// # Returns
/// The image `M(x + u(x))` with the size of `field`
pub fn warp<const D: usize>(source: &dyn Interpolator<D>, field: &VectorField<D>) -> Image<D> {
    let size = field.size();
    let slice = slice_len(size);
    let mut data = vec![0.0f32; field.len()];
    data.par_chunks_mut(slice)
        .enumerate()
        .for_each(|(s, chunk)| {
            let base = s * slice;
            for (i, out) in chunk.iter_mut().enumerate() {
                let coords = grid::coordinates(size, base + i);
                let u = field.data()[base + i];
                let point: [f64; D] = std::array::from_fn(|d| coords[d] as f64 + u[d] as f64);
                *out = source.evaluate(point) as f32;
            }
        });
    Image::from_parts(size, data)
}

/// Multilinear sample of a vector field at a continuous point.
///
/// Coordinates are clamped to the grid.
pub fn sample_field_linear<const D: usize>(field: &VectorField<D>, point: [f64; D]) -> Vector<D> {
    let size = field.size();
    let strides = grid::strides(size);
    let mut lower = [0usize; D];
    let mut frac = [0.0f64; D];
    for d in 0..D {
        let max = (size[d] - 1) as f64;
        let x = point[d].clamp(0.0, max);
        let i = (x.floor() as usize).min(size[d].saturating_sub(2));
        lower[d] = i;
        frac[d] = if size[d] > 1 { x - i as f64 } else { 0.0 };
    }

    let mut sum = Vector::<D>::zeros();
    for corner in 0..(1usize << D) {
        let mut weight = 1.0;
        let mut offset = 0;
        for d in 0..D {
            let upper = (corner >> d) & 1 == 1 && size[d] > 1;
            if upper {
                weight *= frac[d];
                offset += (lower[d] + 1) * strides[d];
            } else {
                weight *= 1.0 - frac[d];
                offset += lower[d] * strides[d];
            }
        }
        if weight != 0.0 {
            sum += field.data()[offset].map(|v| v as f64) * weight;
        }
    }
    sum
}

/// Resample a vector field to a new grid size.
///
/// Grid corners are kept aligned: output pixel `j` samples the input at
/// `j * (old - 1) / (new - 1)`. Vector values are not rescaled.
pub fn resample_field<const D: usize>(field: &VectorField<D>, new_size: [usize; D]) -> VectorField<D> {
    let old = field.size();
    let ratio: [f64; D] = std::array::from_fn(|d| {
        if new_size[d] > 1 {
            (old[d] - 1) as f64 / (new_size[d] - 1) as f64
        } else {
            0.0
        }
    });
    let slice = slice_len(new_size);
    let mut data = vec![FVector::<D>::zeros(); grid::num_elements(new_size)];
    data.par_chunks_mut(slice)
        .enumerate()
        .for_each(|(s, chunk)| {
            let base = s * slice;
            for (i, out) in chunk.iter_mut().enumerate() {
                let coords = grid::coordinates(new_size, base + i);
                let point: [f64; D] = std::array::from_fn(|d| coords[d] as f64 * ratio[d]);
                *out = sample_field_linear(field, point).map(|v| v as f32);
            }
        });
    VectorField::from_parts(new_size, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::{BoundaryKind, SplineInterpolator, SplineKernel};
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    #[test]
    fn test_warp_with_zero_field_is_identity() {
        let image = Image::from_fn([6, 5], |[x, y]| (x * y) as f32 + 0.5);
        let kernel = Arc::new(SplineKernel::bspline(3).unwrap());
        let interp = SplineInterpolator::new(&image, kernel, BoundaryKind::Mirror).unwrap();
        let warped = warp(&interp, &VectorField::zeros([6, 5]));
        for (a, b) in warped.data().iter().zip(image.data()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_warp_shift_by_one_pixel() {
        let image = Image::from_fn([8, 4], |[x, _]| x as f32);
        let kernel = Arc::new(SplineKernel::bspline(1).unwrap());
        let interp = SplineInterpolator::new(&image, kernel, BoundaryKind::Mirror).unwrap();
        let field = VectorField::from_fn([8, 4], |_| FVector::<2>::new(1.0, 0.0));
        let warped = warp(&interp, &field);
        assert_abs_diff_eq!(warped.get([3, 2]), 4.0, epsilon = 1e-6);
        // mirrored beyond the last column
        assert_abs_diff_eq!(warped.get([7, 0]), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_linear_sampling_and_resize() {
        let field = VectorField::from_fn([3, 3], |[x, y]| FVector::<2>::new(x as f32, 2.0 * y as f32));
        let v = sample_field_linear(&field, [0.5, 1.25]);
        assert_abs_diff_eq!(v[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(v[1], 2.5, epsilon = 1e-12);

        let resized = resample_field(&field, [5, 5]);
        assert_eq!(resized.size(), [5, 5]);
        assert_abs_diff_eq!(resized.get([1, 3])[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(resized.get([1, 3])[1], 3.0, epsilon = 1e-6);
    }
}
