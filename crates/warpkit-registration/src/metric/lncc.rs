//! Local normalized cross correlation.
//!
//! Every pixel contributes `1 - ncc^2` of the window centered on it. The
//! windows are clamped to the image, so border windows are smaller.

use rayon::prelude::*;
use warpkit_core::image::grid;
use warpkit_core::{FVector, Image, VectorField};

use super::trait_::{check_force_sizes, check_sizes, ImageCost};
use crate::error::{RegistrationError, Result};

/// Largest accepted window half-width.
pub const MAX_HALF_WIDTH: usize = 256;

/// Running sums over one window.
#[derive(Debug, Default, Clone, Copy)]
struct WindowSums {
    sa: f64,
    sb: f64,
    saa: f64,
    sbb: f64,
    sab: f64,
    n: f64,
}

impl WindowSums {
    #[inline]
    fn add(&mut self, a: f64, b: f64) {
        self.sa += a;
        self.sb += b;
        self.saa += a * a;
        self.sbb += b * b;
        self.sab += a * b;
        self.n += 1.0;
    }

    fn means(&self) -> (f64, f64) {
        (self.sa / self.n, self.sb / self.n)
    }

    /// Centered second moments `(saa, sbb, sab)`.
    fn moments(&self) -> (f64, f64, f64) {
        let (ma, mb) = self.means();
        (
            self.saa - self.n * ma * ma,
            self.sbb - self.n * mb * mb,
            self.sab - self.n * ma * mb,
        )
    }

    fn value(&self) -> f64 {
        let (saa, sbb, sab) = self.moments();
        let suma2_sumb2 = saa * sbb;
        if suma2_sumb2 > 1e-10 {
            1.0 - sab * sab / suma2_sumb2
        } else if saa < 1e-5 && sbb < 1e-5 {
            0.0
        } else {
            1.0
        }
    }

    /// Value and force factor `2 sab/(saa sbb) ((sab/saa)(a - ma) - (b - mb))`.
    fn value_and_force_factor(&self, a: f64, b: f64) -> (f64, f64) {
        let (saa, sbb, sab) = self.moments();
        let suma2_sumb2 = saa * sbb;
        if suma2_sumb2 > 1e-5 {
            let (ma, mb) = self.means();
            let factor = 2.0 * sab / suma2_sumb2 * (sab / saa * (a - ma) - (b - mb));
            (1.0 - sab * sab / suma2_sumb2, factor)
        } else {
            (self.value(), 0.0)
        }
    }
}

/// Local normalized cross correlation cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Lncc {
    half_width: usize,
}

impl Lncc {
    /// # Errors
    /// `InvalidArgument` when `half_width` is outside `1..=256`.
    pub fn new(half_width: usize) -> Result<Self> {
        if !(1..=MAX_HALF_WIDTH).contains(&half_width) {
            return Err(RegistrationError::invalid_argument(format!(
                "LNCC half-width must be in 1..={}, got {}",
                MAX_HALF_WIDTH, half_width
            )));
        }
        Ok(Self { half_width })
    }

    pub fn half_width(&self) -> usize {
        self.half_width
    }

    fn window_sums<const D: usize>(
        &self,
        moving: &[f32],
        reference: &[f32],
        size: [usize; D],
        center: [usize; D],
    ) -> WindowSums {
        let lo: [usize; D] = std::array::from_fn(|d| center[d].saturating_sub(self.half_width));
        let hi: [usize; D] =
            std::array::from_fn(|d| (center[d] + self.half_width).min(size[d] - 1));
        let extent: [usize; D] = std::array::from_fn(|d| hi[d] - lo[d] + 1);
        let strides = grid::strides(size);
        let mut sums = WindowSums::default();
        for offset in grid::GridIter::new(extent) {
            let index: usize = (0..D).map(|d| (lo[d] + offset[d]) * strides[d]).sum();
            sums.add(moving[index] as f64, reference[index] as f64);
        }
        sums
    }

    /// Per-slice partial sums, combined in slice order.
    fn reduce(partials: Vec<(f64, usize)>) -> f64 {
        let (sum, count) = partials
            .into_iter()
            .fold((0.0, 0usize), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        if count > 0 {
            sum / count as f64
        } else {
            0.0
        }
    }
}

impl Default for Lncc {
    fn default() -> Self {
        Self { half_width: 5 }
    }
}

impl<const D: usize> ImageCost<D> for Lncc {
    fn name(&self) -> &'static str {
        "lncc"
    }

    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64> {
        check_sizes(moving, reference)?;
        let size = moving.size();
        let slice_len = moving.len() / size[D - 1];
        let (m, r) = (moving.data(), reference.data());
        let partials: Vec<(f64, usize)> = (0..size[D - 1])
            .into_par_iter()
            .map(|slice| {
                let mut sum = 0.0;
                let mut count = 0;
                for i in slice * slice_len..(slice + 1) * slice_len {
                    let sums = self.window_sums(m, r, size, grid::coordinates(size, i));
                    if sums.n > 1.0 {
                        sum += sums.value();
                        count += 1;
                    }
                }
                (sum, count)
            })
            .collect();
        Ok(Self::reduce(partials))
    }

    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64> {
        check_force_sizes(moving, reference, force)?;
        let size = moving.size();
        let slice_len = moving.len() / size[D - 1];
        let gradient = moving.gradient();
        let (m, r) = (moving.data(), reference.data());
        let partials: Vec<(f64, usize)> = force
            .data_mut()
            .par_chunks_mut(slice_len)
            .zip(gradient.data().par_chunks(slice_len))
            .enumerate()
            .map(|(slice, (out, grad))| {
                let mut sum = 0.0;
                let mut count = 0;
                for (j, (f, g)) in out.iter_mut().zip(grad).enumerate() {
                    let i = slice * slice_len + j;
                    let sums = self.window_sums(m, r, size, grid::coordinates(size, i));
                    if sums.n <= 1.0 {
                        *f = FVector::<D>::zeros();
                        continue;
                    }
                    let (value, factor) = sums.value_and_force_factor(m[i] as f64, r[i] as f64);
                    sum += value;
                    count += 1;
                    *f = g * factor as f32;
                }
                (sum, count)
            })
            .collect();
        let count: usize = partials.iter().map(|p| p.1).sum();
        if count > 0 {
            force.scale(1.0 / count as f32);
        }
        Ok(Self::reduce(partials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn textured(size: [usize; 2]) -> Image<2> {
        Image::from_fn(size, |[x, y]| ((x * 5 + y * 3) % 7) as f32 + 0.5 * x as f32)
    }

    #[test]
    fn test_rejects_half_width() {
        assert!(Lncc::new(0).is_err());
        assert!(Lncc::new(257).is_err());
        assert_eq!(Lncc::new(3).unwrap().half_width(), 3);
    }

    #[test]
    fn test_identical_images_are_zero() {
        let image = textured([12, 9]);
        let lncc = Lncc::new(2).unwrap();
        let first = ImageCost::<2>::value(&lncc, &image, &image).unwrap();
        assert_abs_diff_eq!(first, 0.0, epsilon = 1e-9);
        for _ in 0..3 {
            assert_eq!(ImageCost::<2>::value(&lncc, &image, &image).unwrap(), first);
        }
    }

    #[test]
    fn test_linear_intensity_map_is_zero() {
        let reference = textured([10, 10]);
        let mut moving = reference.clone();
        moving.map_inplace(|v| 3.0 * v - 2.0);
        let value = Lncc::new(1).unwrap().value(&moving, &reference).unwrap();
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_flat_windows() {
        let flat = Image::<2>::filled([6, 6], 1.0);
        let lncc = Lncc::new(1).unwrap();
        // both windows flat
        assert_eq!(lncc.value(&flat, &flat).unwrap(), 0.0);
        // one window flat, the other textured
        assert_abs_diff_eq!(lncc.value(&flat, &textured([6, 6])).unwrap(), 1.0);
    }

    #[test]
    fn test_force_matches_value() {
        let reference = textured([9, 8]);
        let moving = Image::from_fn([9, 8], |[x, y]| ((x * 5 + y * 3) % 7) as f32 + 0.3 * y as f32);
        let lncc = Lncc::new(2).unwrap();
        let mut force = VectorField::zeros([9, 8]);
        let value = lncc.evaluate_force(&moving, &reference, &mut force).unwrap();
        assert_abs_diff_eq!(value, lncc.value(&moving, &reference).unwrap(), epsilon = 1e-12);
        assert!(value > 0.0);
        assert!(force.max_norm() > 0.0);
    }

    #[test]
    fn test_same_result_for_any_thread_count() {
        let size = [9, 8, 7];
        let reference = Image::from_fn(size, |[x, y, z]| ((x * 5 + y * 3 + z * 2) % 7) as f32 + 0.5 * z as f32);
        let moving = Image::from_fn(size, |[x, y, z]| ((x * 3 + y * 5 + z) % 6) as f32 + 0.2 * x as f32);
        let lncc = Lncc::new(2).unwrap();
        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| {
                let value = ImageCost::<3>::value(&lncc, &moving, &reference).unwrap();
                let mut force = VectorField::zeros(size);
                let force_value = lncc.evaluate_force(&moving, &reference, &mut force).unwrap();
                (value, force_value, force)
            })
        };
        let (value_1, force_value_1, force_1) = run(1);
        let (value_4, force_value_4, force_4) = run(4);
        assert_eq!(value_1.to_bits(), value_4.to_bits());
        assert_eq!(force_value_1.to_bits(), force_value_4.to_bits());
        assert_eq!(force_1.data(), force_4.data());
        assert!(force_1.max_norm() > 0.0);
    }
}
