use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use warpkit_core::filter::warp;
use warpkit_core::{BoundaryKind, FVector, Image, SplineInterpolator, SplineKernel, VectorField};
use warpkit_registration::{ProgressCallback, ProgressInfo};

/// A reference image and a smoothly deformed copy of it.
pub struct PhantomPair<const D: usize> {
    pub moving: Image<D>,
    pub reference: Image<D>,
    /// Deformation that produced `moving` from `reference`.
    pub deformation: VectorField<D>,
}

/// Two overlapping Gaussian blobs and a sinusoidal deformation of at most
/// `amplitude` pixels per axis.
pub fn phantom_pair<const D: usize>(size: [usize; D], amplitude: f64) -> Result<PhantomPair<D>> {
    let reference = Image::from_fn(size, |p: [usize; D]| {
        let mut near = 0.0;
        let mut far = 0.0;
        for d in 0..D {
            let extent = size[d] as f64;
            let x = p[d] as f64;
            let a = (x - 0.45 * extent) / (0.18 * extent);
            let b = (x - 0.65 * extent) / (0.10 * extent);
            near += a * a;
            far += b * b;
        }
        ((-0.5 * near).exp() + 0.6 * (-0.5 * far).exp()) as f32
    });
    let deformation = VectorField::from_fn(size, |p: [usize; D]| {
        FVector::<D>::from_fn(|d, _| {
            let across = (d + 1) % D;
            let phase = 2.0 * PI * p[across] as f64 / size[across] as f64;
            (amplitude * phase.sin()) as f32
        })
    });
    let kernel = Arc::new(SplineKernel::bspline(3)?);
    let source = SplineInterpolator::new(&reference, kernel, BoundaryKind::Mirror)?;
    let moving = warp(&source, &deformation);
    Ok(PhantomPair {
        moving,
        reference,
        deformation,
    })
}

/// Renders registration progress as a level bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] level {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, levels: usize) {
        self.bar.set_length(levels as u64);
        self.bar.set_position(0);
    }

    fn on_level(&self, level: usize, size: &[usize], parameters: usize) {
        self.bar.set_position(level as u64);
        self.bar.set_message(format!("{:?}, {} parameters", size, parameters));
    }

    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_message(format!(
            "eval {} cost {:.6} ({:.3} of start)",
            info.evaluation, info.value, info.ratio
        ));
        self.bar.tick();
    }

    fn on_complete(&self, value: f64, elapsed: Duration) {
        self.bar.set_position(self.bar.length().unwrap_or(0));
        self.bar
            .finish_with_message(format!("cost {:.6} after {:.2}s", value, elapsed.as_secs_f64()));
    }

    fn on_error(&self, error: &str) {
        self.bar.abandon_with_message(format!("failed: {}", error));
    }
}

/// Mean Euclidean distance between two fields.
pub fn mean_field_error<const D: usize>(a: &VectorField<D>, b: &VectorField<D>) -> f64 {
    if a.data().is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).norm() as f64)
        .sum();
    sum / a.data().len() as f64
}
