//! Least squares distance for multi-modal images.
//!
//! Pixels sharing a reference intensity form a bucket. The cost is the
//! within-bucket variance of the moving intensities, so any moving image
//! that is a function of the reference scores zero.

use rayon::prelude::*;
use tracing::debug;
use warpkit_core::{Image, VectorField};

use super::trait_::{check_force_sizes, check_sizes, ImageCost};
use crate::error::{RegistrationError, Result};

/// Least squares distance cost. Requires [`ImageCost::set_reference`].
#[derive(Debug, Clone, Default)]
pub struct Lsd {
    size: Vec<usize>,
    bucket_of: Vec<u32>,
    inverse_count: Vec<f64>,
}

impl Lsd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_count(&self) -> usize {
        self.inverse_count.len()
    }

    fn check_prepared<const D: usize>(&self, reference: &Image<D>) -> Result<()> {
        if self.size.as_slice() != reference.size().as_slice() {
            return Err(RegistrationError::invalid_argument(format!(
                "LSD prepared for size {:?}, evaluated with {:?}",
                self.size,
                reference.size()
            )));
        }
        Ok(())
    }

    /// Per-bucket sums of the moving intensities.
    fn bucket_sums(&self, moving: &[f32]) -> Vec<f64> {
        let mut sums = vec![0.0; self.inverse_count.len()];
        for (&b, &m) in self.bucket_of.iter().zip(moving) {
            sums[b as usize] += m as f64;
        }
        sums
    }

    fn value_from_sums(&self, moving: &[f32], sums: &[f64]) -> f64 {
        let squares: f64 = moving.par_iter().map(|&m| (m as f64) * (m as f64)).sum();
        let explained: f64 = sums
            .iter()
            .zip(&self.inverse_count)
            .map(|(s, inv)| s * s * inv)
            .sum();
        0.5 * (squares - explained)
    }
}

impl<const D: usize> ImageCost<D> for Lsd {
    fn name(&self) -> &'static str {
        "lsd"
    }

    fn set_reference(&mut self, reference: &Image<D>) -> Result<()> {
        let data = reference.data();
        let mut order: Vec<u32> = (0..data.len() as u32).collect();
        order.par_sort_unstable_by(|&a, &b| data[a as usize].total_cmp(&data[b as usize]));

        let mut bucket_of = vec![0u32; data.len()];
        let mut counts: Vec<usize> = Vec::new();
        let mut last = None;
        for &i in &order {
            let value = data[i as usize];
            if last != Some(value) {
                counts.push(0);
                last = Some(value);
            }
            let bucket = counts.len() - 1;
            counts[bucket] += 1;
            bucket_of[i as usize] = bucket as u32;
        }
        self.size = reference.size().to_vec();
        self.bucket_of = bucket_of;
        self.inverse_count = counts.into_iter().map(|n| 1.0 / n as f64).collect();
        debug!(buckets = self.inverse_count.len(), "prepared LSD reference buckets");
        Ok(())
    }

    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64> {
        check_sizes(moving, reference)?;
        self.check_prepared(reference)?;
        let sums = self.bucket_sums(moving.data());
        Ok(self.value_from_sums(moving.data(), &sums))
    }

    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64> {
        check_force_sizes(moving, reference, force)?;
        self.check_prepared(reference)?;
        let sums = self.bucket_sums(moving.data());
        let means: Vec<f64> = sums
            .iter()
            .zip(&self.inverse_count)
            .map(|(s, inv)| s * inv)
            .collect();
        let gradient = moving.gradient();
        force
            .data_mut()
            .par_iter_mut()
            .zip(gradient.data().par_iter())
            .zip(moving.data().par_iter().zip(self.bucket_of.par_iter()))
            .for_each(|((f, g), (&m, &b))| {
                *f = g * (m as f64 - means[b as usize]) as f32;
            });
        Ok(self.value_from_sums(moving.data(), &sums))
    }
}
