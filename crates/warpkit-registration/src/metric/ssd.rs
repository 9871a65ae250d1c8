//! Sum of squared differences.

use rayon::prelude::*;
use warpkit_core::{FVector, Image, VectorField};

use super::trait_::{check_force_sizes, check_sizes, ImageCost};
use crate::error::Result;

/// Intensity thresholds selecting the pixels an SSD evaluation counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoMask {
    /// Reference pixels must be strictly above this value.
    pub reference_threshold: f32,
    /// Moving pixels must be strictly above this value.
    pub moving_threshold: f32,
}

impl AutoMask {
    #[inline]
    fn accepts(&self, moving: f32, reference: f32) -> bool {
        reference > self.reference_threshold && moving > self.moving_threshold
    }
}

/// Sum of squared differences: `C = 1/2 Σ (m - r)^2`.
///
/// With normalization the sum is divided by the number of pixels it
/// covers. The automask variant only counts pixels that pass both
/// thresholds and always normalizes by their count.
#[derive(Debug, Clone, PartialEq)]
pub struct Ssd {
    normalize: bool,
    mask: Option<AutoMask>,
}

impl Ssd {
    /// Create an SSD cost.
    ///
    /// # Arguments
    /// * `normalize` - Divide by the number of pixels
    pub fn new(normalize: bool) -> Self {
        Self {
            normalize,
            mask: None,
        }
    }

    /// Create an SSD cost that ignores background pixels.
    pub fn with_automask(reference_threshold: f32, moving_threshold: f32) -> Self {
        Self {
            normalize: true,
            mask: Some(AutoMask {
                reference_threshold,
                moving_threshold,
            }),
        }
    }

    pub fn mask(&self) -> Option<AutoMask> {
        self.mask
    }

    #[inline]
    fn accepts(&self, moving: f32, reference: f32) -> bool {
        self.mask.map_or(true, |m| m.accepts(moving, reference))
    }

    /// Sum of squared differences and number of pixels counted.
    fn accumulate(&self, moving: &[f32], reference: &[f32]) -> (f64, usize) {
        moving
            .par_iter()
            .zip(reference.par_iter())
            .fold(
                || (0.0f64, 0usize),
                |(sum, count), (&m, &r)| {
                    if self.accepts(m, r) {
                        let d = (m - r) as f64;
                        (sum + d * d, count + 1)
                    } else {
                        (sum, count)
                    }
                },
            )
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
    }

    fn scale(&self, count: usize) -> f64 {
        if self.normalize {
            1.0 / count as f64
        } else {
            1.0
        }
    }
}

impl Default for Ssd {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<const D: usize> ImageCost<D> for Ssd {
    fn name(&self) -> &'static str {
        if self.mask.is_some() {
            "ssd-automask"
        } else {
            "ssd"
        }
    }

    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64> {
        check_sizes(moving, reference)?;
        let (sum, count) = self.accumulate(moving.data(), reference.data());
        if count == 0 {
            return Ok(f32::MAX as f64);
        }
        Ok(0.5 * sum * self.scale(count))
    }

    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64> {
        check_force_sizes(moving, reference, force)?;
        let (sum, count) = self.accumulate(moving.data(), reference.data());
        if count == 0 {
            force.fill_zero();
            return Ok(f32::MAX as f64);
        }
        let scale = self.scale(count) as f32;
        let gradient = moving.gradient();
        force
            .data_mut()
            .par_iter_mut()
            .zip(gradient.data().par_iter())
            .zip(moving.data().par_iter().zip(reference.data().par_iter()))
            .for_each(|((f, g), (&m, &r))| {
                *f = if self.accepts(m, r) {
                    g * ((m - r) * scale)
                } else {
                    FVector::<D>::zeros()
                };
            });
        Ok(0.5 * sum * self.scale(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> Image<2> {
        Image::from_fn([8, 6], |[x, y]| (x * x + y) as f32 * 0.5)
    }

    #[test]
    fn test_self_cost_is_zero() {
        let image = ramp();
        let ssd = Ssd::default();
        assert_eq!(ImageCost::<2>::value(&ssd, &image, &image).unwrap(), 0.0);
        let mut force = VectorField::zeros(image.size());
        let value = ssd.evaluate_force(&image, &image, &mut force).unwrap();
        assert_eq!(value, 0.0);
        assert_eq!(force.max_norm(), 0.0);
    }

    #[test]
    fn test_constant_offset() {
        let reference = ramp();
        let mut moving = reference.clone();
        moving.map_inplace(|v| v + 0.75);
        let value = Ssd::new(true).value(&moving, &reference).unwrap();
        assert_abs_diff_eq!(value, 0.75 * 0.75 / 2.0, epsilon = 1e-6);
        let unnormalized = Ssd::new(false).value(&moving, &reference).unwrap();
        assert_abs_diff_eq!(unnormalized, 48.0 * 0.75 * 0.75 / 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_force_direction() {
        let reference = Image::from_fn([7, 3], |[x, _]| x as f32);
        let moving = Image::from_fn([7, 3], |[x, _]| x as f32 + 1.0);
        let mut force = VectorField::zeros([7, 3]);
        Ssd::new(false).evaluate_force(&moving, &reference, &mut force).unwrap();
        // (m - r) * dm/dx on interior columns
        assert_abs_diff_eq!(force.get([3, 1])[0], 1.0);
        assert_abs_diff_eq!(force.get([0, 1])[0], 0.0);
    }

    #[test]
    fn test_automask_without_overlap() {
        let reference = Image::<2>::zeros([4, 4]);
        let moving = Image::filled([4, 4], 3.0);
        let ssd = Ssd::with_automask(0.5, 0.5);
        assert_eq!(ImageCost::<2>::value(&ssd, &moving, &reference).unwrap(), f32::MAX as f64);
        let mut force = VectorField::from_fn([4, 4], |_| FVector::<2>::new(1.0, 1.0));
        let value = ssd.evaluate_force(&moving, &reference, &mut force).unwrap();
        assert_eq!(value, f32::MAX as f64);
        assert_eq!(force.max_norm(), 0.0);
    }

    #[test]
    fn test_automask_counts_selected_pixels() {
        let reference = Image::new([4, 1], vec![0.0, 2.0, 2.0, 2.0]).unwrap();
        let moving = Image::new([4, 1], vec![5.0, 3.0, 4.0, 0.0]).unwrap();
        // only pixels 1 and 2 pass both thresholds
        let value = Ssd::with_automask(1.0, 1.0).value(&moving, &reference).unwrap();
        assert_abs_diff_eq!(value, 0.5 * (1.0 + 4.0) / 2.0);
    }

    #[test]
    fn test_size_mismatch() {
        let a = Image::<2>::zeros([3, 3]);
        let b = Image::<2>::zeros([3, 4]);
        assert!(Ssd::default().value(&a, &b).is_err());
    }
}
