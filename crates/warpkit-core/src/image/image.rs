//! Scalar image container.
//!
//! An [`Image`] is a dense `f32` grid of dimension 2 or 3 stored with the x
//! axis varying fastest. Images carry no physical metadata: pixel
//! coordinates are the coordinate system every transformation works in.

use rayon::prelude::*;

use super::grid::{self, GridIter};
use super::vector_field::{FVector, VectorField};
use crate::error::{CoreError, Result};

/// Dense scalar image.
///
/// # Type Parameters
/// * `D` - The dimensionality of the image (2 or 3)
///
/// # Examples
/// ```rust
/// use warpkit_core::Image;
///
/// let image = Image::from_fn([4, 3], |[x, y]| (x + 10 * y) as f32);
/// assert_eq!(image.get([2, 1]), 12.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Image<const D: usize> {
    size: [usize; D],
    data: Vec<f32>,
}

impl<const D: usize> Image<D> {
    /// Create an image from a size and its pixel buffer.
    ///
    /// # Errors
    /// `DimensionMismatch` when the buffer length differs from the grid size.
    pub fn new(size: [usize; D], data: Vec<f32>) -> Result<Self> {
        let expected = grid::num_elements(size);
        if data.len() != expected {
            return Err(CoreError::dimension_mismatch(format!(
                "image of size {:?} needs {} pixels, got {}",
                size,
                expected,
                data.len()
            )));
        }
        Ok(Self { size, data })
    }

    pub(crate) fn from_parts(size: [usize; D], data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), grid::num_elements(size));
        Self { size, data }
    }

    /// Create an image filled with zeros.
    pub fn zeros(size: [usize; D]) -> Self {
        Self::filled(size, 0.0)
    }

    /// Create an image filled with a constant.
    pub fn filled(size: [usize; D], value: f32) -> Self {
        Self {
            size,
            data: vec![value; grid::num_elements(size)],
        }
    }

    /// Create an image by evaluating `f` at every pixel coordinate.
    pub fn from_fn<F>(size: [usize; D], f: F) -> Self
    where
        F: Fn([usize; D]) -> f32,
    {
        let data = GridIter::new(size).map(f).collect();
        Self { size, data }
    }

    /// Grid size `[x, y(, z)]`.
    pub fn size(&self) -> [usize; D] {
        self.size
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no pixels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pixel buffer in memory order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable pixel buffer in memory order.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the image and return its buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Pixel value at a coordinate.
    #[inline]
    pub fn get(&self, coords: [usize; D]) -> f32 {
        self.data[grid::linear_index(self.size, coords)]
    }

    /// Set the pixel value at a coordinate.
    #[inline]
    pub fn set(&mut self, coords: [usize; D], value: f32) {
        let index = grid::linear_index(self.size, coords);
        self.data[index] = value;
    }

    /// Check that another grid has the same size.
    ///
    /// # Errors
    /// `ShapeMismatch` naming both sizes.
    pub fn ensure_same_size(&self, other: [usize; D]) -> Result<()> {
        if self.size != other {
            return Err(CoreError::shape_mismatch(&self.size, &other));
        }
        Ok(())
    }

    /// Minimum and maximum pixel value. An empty image yields `(0, 0)`.
    pub fn value_range(&self) -> (f32, f32) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        self.data
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Mean and population standard deviation, accumulated in f64.
    pub fn mean_and_std(&self) -> (f64, f64) {
        if self.data.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.data.len() as f64;
        let (sum, sum2) = self
            .data
            .par_iter()
            .fold(
                || (0.0f64, 0.0f64),
                |(s, s2), &v| (s + v as f64, s2 + (v as f64) * (v as f64)),
            )
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
        let mean = sum / n;
        let var = (sum2 / n - mean * mean).max(0.0);
        (mean, var.sqrt())
    }

    /// Apply `f` to every pixel in place.
    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(f32) -> f32 + Sync,
    {
        self.data.par_iter_mut().for_each(|v| *v = f(*v));
    }

    /// Image gradient by central differences.
    ///
    /// Pixels on the image border along an axis get a zero derivative along
    /// that axis.
    pub fn gradient(&self) -> VectorField<D> {
        let size = self.size;
        let strides = grid::strides(size);
        let data = &self.data;
        let gradient: Vec<FVector<D>> = (0..data.len())
            .into_par_iter()
            .map(|index| {
                let coords = grid::coordinates(size, index);
                let mut g = FVector::<D>::zeros();
                for d in 0..D {
                    if coords[d] > 0 && coords[d] + 1 < size[d] {
                        g[d] = 0.5 * (data[index + strides[d]] - data[index - strides[d]]);
                    }
                }
                g
            })
            .collect();
        VectorField::from_parts(size, gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Image::<2>::new([3, 3], vec![0.0; 8]).is_err());
        assert!(Image::<2>::new([3, 3], vec![0.0; 9]).is_ok());
    }

    #[test]
    fn test_gradient_of_ramp() {
        let image = Image::from_fn([5, 4], |[x, y]| 2.0 * x as f32 + 3.0 * y as f32);
        let g = image.gradient();
        assert_eq!(g.get([2, 1]), FVector::<2>::new(2.0, 3.0));
        // border along x: only the y derivative survives
        assert_eq!(g.get([0, 1]), FVector::<2>::new(0.0, 3.0));
        assert_eq!(g.get([4, 3]), FVector::<2>::new(0.0, 0.0));
    }

    #[test]
    fn test_mean_and_std() {
        let image = Image::new([2, 2], vec![1.0, 3.0, 1.0, 3.0]).unwrap();
        let (mean, std) = image.mean_and_std();
        assert!((mean - 2.0).abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-12);
        assert_eq!(image.value_range(), (1.0, 3.0));
    }
}
