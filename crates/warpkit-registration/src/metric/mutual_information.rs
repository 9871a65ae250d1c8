//! Mutual information with spline Parzen windows.
//!
//! The joint histogram of (reference, moving) intensities is filled with
//! B-spline Parzen windows, which makes the mutual information
//! differentiable with respect to the moving intensities (Thévenaz and
//! Unser, IEEE TIP 9(12), 2000).

use rayon::prelude::*;
use tracing::trace;
use warpkit_core::{Image, SharedKernel, VectorField};

use super::trait_::{check_force_sizes, check_sizes, ImageCost};
use crate::error::{RegistrationError, Result};

/// Largest number of histogram bins per axis.
pub const MAX_BINS: usize = 256;

/// Largest outlier cut, in percent.
pub const MAX_CUT: f64 = 40.0;

/// Intensity axis of the joint histogram.
#[derive(Debug, Clone)]
struct HistogramAxis {
    bins: usize,
    kernel: SharedKernel,
    border: usize,
    real_bins: usize,
    min: f64,
    max: f64,
    scale: f64,
}

impl HistogramAxis {
    fn new(bins: usize, kernel: SharedKernel) -> Self {
        let support = kernel.size();
        Self {
            bins,
            border: (support - 1) / 2,
            real_bins: bins + support - 1,
            kernel,
            min: 0.0,
            max: 0.0,
            scale: 1.0,
        }
    }

    /// Fit the intensity range to `values`, clamping `cut` percent at
    /// both ends. A zero range is widened to the unit interval above the
    /// value.
    ///
    /// # Returns
    /// Whether the range was zero
    fn fit(&mut self, values: &[f32], cut: f64) -> bool {
        let (min, mut max) = intensity_range(values, cut);
        let flat = !(max > min);
        if flat {
            max = min + 1.0;
        }
        self.min = min;
        self.max = max;
        self.scale = (self.bins - 1) as f64 / (max - min);
        flat
    }

    #[inline]
    fn scaled(&self, value: f32) -> f64 {
        (value as f64).clamp(self.min, self.max) - self.min
    }

    /// Histogram offset of the first weight and the weights themselves.
    #[inline]
    fn weights(&self, value: f32, order: usize, out: &mut [f64]) -> usize {
        let x = self.scaled(value) * self.scale;
        let start = self.kernel.weights(x, order, &mut out[..self.kernel.size()]);
        (start + self.border as isize) as usize
    }
}

/// Intensity range after clamping `cut` percent of the values at each end.
fn intensity_range(values: &[f32], cut: f64) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    if cut <= 0.0 {
        let (lo, hi) = values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        return (lo as f64, hi as f64);
    }
    let mut sorted = values.to_vec();
    sorted.par_sort_unstable_by(f32::total_cmp);
    let last = sorted.len() - 1;
    let fraction = cut / 100.0;
    let lo = (fraction * last as f64).floor() as usize;
    let hi = ((1.0 - fraction) * last as f64).ceil() as usize;
    (sorted[lo] as f64, sorted[hi.min(last)] as f64)
}

/// Joint histogram estimator of mutual information.
#[derive(Debug, Clone)]
pub struct SplineParzenMi {
    reference: HistogramAxis,
    moving: HistogramAxis,
    cut: f64,
    joint: Vec<f64>,
    reference_histogram: Vec<f64>,
    moving_histogram: Vec<f64>,
    log_cache: Vec<f64>,
    nscale: f64,
}

impl SplineParzenMi {
    /// # Arguments
    /// * `reference_bins` - Bins over the reference intensity range
    /// * `reference_kernel` - Parzen kernel for the reference intensities
    /// * `moving_bins` - Bins over the moving intensity range
    /// * `moving_kernel` - Parzen kernel for the moving intensities
    /// * `cut` - Percentage of intensities clamped at each end, `[0, 40]`
    ///
    /// # Errors
    /// `InvalidArgument` for bins outside `1..=256` or a cut outside
    /// `[0, 40]`.
    pub fn new(
        reference_bins: usize,
        reference_kernel: SharedKernel,
        moving_bins: usize,
        moving_kernel: SharedKernel,
        cut: f64,
    ) -> Result<Self> {
        for bins in [reference_bins, moving_bins] {
            if !(1..=MAX_BINS).contains(&bins) {
                return Err(RegistrationError::invalid_argument(format!(
                    "histogram bins must be in 1..={}, got {}",
                    MAX_BINS, bins
                )));
            }
        }
        if !(0.0..=MAX_CUT).contains(&cut) {
            return Err(RegistrationError::invalid_argument(format!(
                "histogram cut must be in [0, {}] percent, got {}",
                MAX_CUT, cut
            )));
        }
        let reference = HistogramAxis::new(reference_bins, reference_kernel);
        let moving = HistogramAxis::new(moving_bins, moving_kernel);
        let size = reference.real_bins * moving.real_bins;
        Ok(Self {
            joint: vec![0.0; size],
            log_cache: vec![0.0; size],
            reference_histogram: vec![0.0; reference.real_bins],
            moving_histogram: vec![0.0; moving.real_bins],
            reference,
            moving,
            cut,
            nscale: 0.0,
        })
    }

    /// Fill the histograms from corresponding intensity pairs.
    ///
    /// # Errors
    /// `InvalidArgument` when the slices differ in length, are empty or
    /// the reference intensity range is zero. A constant moving image, as
    /// a warp may produce, fills a single bin.
    pub fn fill(&mut self, moving: &[f32], reference: &[f32]) -> Result<()> {
        if moving.len() != reference.len() || moving.is_empty() {
            return Err(RegistrationError::invalid_argument(format!(
                "cannot fill a histogram from {} moving and {} reference values",
                moving.len(),
                reference.len()
            )));
        }
        if self.reference.fit(reference, self.cut) {
            return Err(RegistrationError::invalid_argument("reference image intensity range is zero"));
        }
        if self.moving.fit(moving, self.cut) {
            trace!(value = self.moving.min, "moving image is constant");
        }

        let mreal = self.moving.real_bins;
        self.joint.iter_mut().for_each(|v| *v = 0.0);
        let mut mweights = [0.0f64; 6];
        let mut rweights = [0.0f64; 6];
        let msize = self.moving.kernel.size();
        let rsize = self.reference.kernel.size();
        for (&m, &r) in moving.iter().zip(reference) {
            let mstart = self.moving.weights(m, 0, &mut mweights);
            let rstart = self.reference.weights(r, 0, &mut rweights);
            for (ri, &rw) in rweights[..rsize].iter().enumerate() {
                let row = &mut self.joint[mreal * (rstart + ri) + mstart..][..msize];
                for (h, &mw) in row.iter_mut().zip(&mweights[..msize]) {
                    *h += mw * rw;
                }
            }
        }
        self.nscale = 1.0 / moving.len() as f64;
        let nscale = self.nscale;
        self.joint.iter_mut().for_each(|v| *v *= nscale);
        trace!(
            pixels = moving.len(),
            moving_range = ?(self.moving.min, self.moving.max),
            reference_range = ?(self.reference.min, self.reference.max),
            "filled joint histogram"
        );
        self.evaluate_histograms();
        self.evaluate_log_cache();
        Ok(())
    }

    fn evaluate_histograms(&mut self) {
        let mreal = self.moving.real_bins;
        self.moving_histogram.iter_mut().for_each(|v| *v = 0.0);
        for (r, row) in self.joint.chunks_exact(mreal).enumerate() {
            self.reference_histogram[r] = row.iter().sum();
            for (h, &j) in self.moving_histogram.iter_mut().zip(row) {
                *h += j;
            }
        }
    }

    fn evaluate_log_cache(&mut self) {
        let mreal = self.moving.real_bins;
        for (row, cache) in self
            .joint
            .chunks_exact(mreal)
            .zip(self.log_cache.chunks_exact_mut(mreal))
        {
            for ((&j, &pm), c) in row.iter().zip(&self.moving_histogram).zip(cache.iter_mut()) {
                *c = if j > 0.0 && pm > 0.0 { (j / pm).ln() } else { 0.0 };
            }
        }
    }

    /// Mutual information of the filled histogram.
    pub fn value(&self) -> f64 {
        let mreal = self.moving.real_bins;
        let mut sum = 0.0;
        for (row, &pr) in self.joint.chunks_exact(mreal).zip(&self.reference_histogram) {
            for (&j, &pm) in row.iter().zip(&self.moving_histogram) {
                if j > 0.0 {
                    sum += j * (j / (pr * pm)).ln();
                }
            }
        }
        sum
    }

    /// Derivative of `-MI` with respect to the moving intensity of one pixel.
    pub fn gradient(&self, moving: f32, reference: f32) -> f64 {
        let mreal = self.moving.real_bins;
        let mut mweights = [0.0f64; 6];
        let mut rweights = [0.0f64; 6];
        let msize = self.moving.kernel.size();
        let rsize = self.reference.kernel.size();
        let mstart = self.moving.weights(moving, 1, &mut mweights);
        let rstart = self.reference.weights(reference, 0, &mut rweights);
        let mut sum = 0.0;
        for (ri, &rw) in rweights[..rsize].iter().enumerate() {
            if rw == 0.0 {
                continue;
            }
            let cache = &self.log_cache[mreal * (rstart + ri) + mstart..][..msize];
            let inner: f64 = cache.iter().zip(&mweights[..msize]).map(|(c, w)| c * w).sum();
            sum += rw * inner;
        }
        -sum * self.moving.scale * self.nscale
    }
}

/// Mutual information cost: `C = -MI(moving, reference)`.
#[derive(Debug, Clone)]
pub struct MutualInformation {
    estimator: SplineParzenMi,
}

impl MutualInformation {
    /// See [`SplineParzenMi::new`] for the arguments.
    pub fn new(
        reference_bins: usize,
        reference_kernel: SharedKernel,
        moving_bins: usize,
        moving_kernel: SharedKernel,
        cut: f64,
    ) -> Result<Self> {
        Ok(Self {
            estimator: SplineParzenMi::new(
                reference_bins,
                reference_kernel,
                moving_bins,
                moving_kernel,
                cut,
            )?,
        })
    }

    fn filled<const D: usize>(&self, moving: &Image<D>, reference: &Image<D>) -> Result<SplineParzenMi> {
        let mut estimator = self.estimator.clone();
        estimator.fill(moving.data(), reference.data())?;
        Ok(estimator)
    }
}

impl<const D: usize> ImageCost<D> for MutualInformation {
    fn name(&self) -> &'static str {
        "mi"
    }

    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64> {
        check_sizes(moving, reference)?;
        Ok(-self.filled(moving, reference)?.value())
    }

    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64> {
        check_force_sizes(moving, reference, force)?;
        let estimator = self.filled(moving, reference)?;
        let gradient = moving.gradient();
        force
            .data_mut()
            .par_iter_mut()
            .zip(gradient.data().par_iter())
            .zip(moving.data().par_iter().zip(reference.data().par_iter()))
            .for_each(|((f, g), (&m, &r))| {
                *f = g * estimator.gradient(m, r) as f32;
            });
        Ok(-estimator.value())
    }
}
