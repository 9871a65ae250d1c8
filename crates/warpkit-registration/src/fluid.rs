//! Dense fluid registration.
//!
//! The displacement is a dense field updated directly. Every iteration
//! computes the cost force on the current warp, smooths the negated force
//! into a velocity with the Navier-Lamé solver, corrects the velocity for
//! the convective term and steps along it so the largest update is
//! `max_step` pixels. Levels run coarse to fine; the field is carried to
//! the next level by linear resampling.

use std::sync::Arc;

use tracing::{debug, info};
use warpkit_core::filter::{reduced_size, warp, Pyramid};
use warpkit_core::{
    BoundaryKind, DisplacementFieldTransform, Image, SharedKernel, SplineInterpolator, VectorField,
};

use crate::config::FluidConfig;
use crate::error::{RegistrationError, Result};
use crate::metric::{ImageCost, ImageCostKind};
use crate::optimizer::{ConvergenceReason, MinimizerStatus};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::regularization::{perturbation, NavierSolver};
use crate::registry::Registry;

/// What happened on one level of a fluid registration.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidLevelReport<const D: usize> {
    /// Level index, 0 is the coarsest.
    pub level: usize,
    pub size: [usize; D],
    /// Accepted and rejected update steps.
    pub iterations: usize,
    pub status: MinimizerStatus,
    /// Cost when the level started.
    pub initial_value: f64,
    /// Cost of the returned field.
    pub final_value: f64,
}

/// Result of a fluid registration.
#[derive(Debug, Clone)]
pub struct FluidOutcome<const D: usize> {
    pub transform: DisplacementFieldTransform<D>,
    pub levels: Vec<FluidLevelReport<D>>,
}

/// Coarse-to-fine fluid registration with a single image cost.
#[derive(Clone)]
pub struct FluidRegistration<const D: usize> {
    cost: ImageCostKind,
    solver: NavierSolver,
    kernel: SharedKernel,
    boundary: BoundaryKind,
    levels: usize,
    max_iter: usize,
    max_step: f32,
    tolerance: f64,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl<const D: usize> FluidRegistration<D> {
    /// Registration with the default schedule of [`FluidConfig`].
    ///
    /// # Arguments
    /// * `cost` - Image cost
    /// * `solver` - Navier solver smoothing the force
    /// * `kernel` - Spline kernel interpolating the moving image
    pub fn new(cost: ImageCostKind, solver: NavierSolver, kernel: SharedKernel) -> Result<Self> {
        let defaults = FluidConfig::default();
        Self {
            cost,
            solver,
            kernel,
            boundary: BoundaryKind::Mirror,
            levels: 1,
            max_iter: 1,
            max_step: 1.0,
            tolerance: 0.0,
            progress: None,
        }
        .with_schedule(defaults.levels, defaults.max_iter, defaults.max_step, defaults.tolerance)
    }

    /// Resolve a configuration against a registry.
    pub fn from_config(registry: &Registry<D>, config: &FluidConfig) -> Result<Self> {
        config.validate()?;
        let cost = registry.cost(&config.cost)?;
        let solver = registry.navier(&config.navier)?;
        let kernel = registry.kernel("bspline:d=3")?;
        Self::new(cost, solver, kernel)?.with_schedule(
            config.levels,
            config.max_iter,
            config.max_step,
            config.tolerance,
        )
    }

    /// Set the level count and the per-level stopping rules.
    ///
    /// # Errors
    /// `InvalidArgument` for zero levels or iterations, a non-positive
    /// step or a negative tolerance.
    pub fn with_schedule(mut self, levels: usize, max_iter: usize, max_step: f64, tolerance: f64) -> Result<Self> {
        if levels == 0 || max_iter == 0 {
            return Err(RegistrationError::invalid_argument(
                "fluid registration needs at least one level and one iteration",
            ));
        }
        if !(max_step > 0.0 && max_step.is_finite()) || !(tolerance >= 0.0) {
            return Err(RegistrationError::invalid_argument(format!(
                "fluid registration needs max_step > 0 and tolerance >= 0, got {} and {}",
                max_step, tolerance
            )));
        }
        self.levels = levels;
        self.max_iter = max_iter;
        self.max_step = max_step as f32;
        self.tolerance = tolerance;
        Ok(self)
    }

    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Register `moving` to `reference`.
    ///
    /// # Errors
    /// `InvalidArgument` when the sizes differ or the coarsest level has
    /// an axis shorter than 2 pixels.
    pub fn run(&self, moving: &Image<D>, reference: &Image<D>) -> Result<FluidOutcome<D>> {
        let mut tracker = ProgressTracker::new(self.progress.clone(), self.levels);
        tracker.start();
        match self.run_levels(moving, reference, &mut tracker) {
            Ok(outcome) => {
                tracker.complete(outcome.levels.last().map_or(0.0, |l| l.final_value));
                Ok(outcome)
            }
            Err(e) => {
                tracker.error(&e.to_string());
                Err(e)
            }
        }
    }

    fn run_levels(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        tracker: &mut ProgressTracker,
    ) -> Result<FluidOutcome<D>> {
        if moving.size() != reference.size() {
            return Err(RegistrationError::shape_mismatch(&reference.size(), &moving.size()));
        }
        let full_size = reference.size();
        let coarsest = reduced_size(full_size, [Pyramid::<D>::block(self.levels - 1); D]);
        if coarsest.iter().any(|&s| s < 2) {
            return Err(RegistrationError::invalid_argument(format!(
                "{} levels reduce {:?} to {:?}",
                self.levels, full_size, coarsest
            )));
        }
        let moving_pyramid = Pyramid::new(moving, self.levels)?;
        let reference_pyramid = Pyramid::new(reference, self.levels)?;
        let mut cost = self.cost.clone();

        let mut transform: Option<DisplacementFieldTransform<D>> = None;
        let mut reports = Vec::with_capacity(self.levels);
        for (level, shift) in (0..self.levels).rev().enumerate() {
            let (Some(moving_level), Some(reference_level)) =
                (moving_pyramid.level(shift), reference_pyramid.level(shift))
            else {
                return Err(RegistrationError::runtime(format!("pyramid level {} is missing", shift)));
            };
            let size = reference_level.size();
            let mut current = match transform.take() {
                None => DisplacementFieldTransform::identity(size),
                Some(previous) => previous.upscale(size)?,
            };
            ImageCost::<D>::set_reference(&mut cost, reference_level)?;
            let source = SplineInterpolator::new(moving_level, self.kernel.clone(), self.boundary)?;

            info!(level = level + 1, levels = self.levels, ?size, "fluid level");
            tracker.begin_level(level, &size, size.iter().product::<usize>() * D);
            let report = self.register_level(&cost, &source, reference_level, &mut current, tracker)?;
            info!(
                iterations = report.iterations,
                status = %report.status,
                value = report.final_value,
                "fluid level finished"
            );
            reports.push(FluidLevelReport { level, ..report });
            transform = Some(current);
        }

        let transform =
            transform.ok_or_else(|| RegistrationError::runtime("fluid registration produced no field"))?;
        Ok(FluidOutcome {
            transform,
            levels: reports,
        })
    }

    fn register_level(
        &self,
        cost: &ImageCostKind,
        source: &SplineInterpolator<D>,
        reference: &Image<D>,
        transform: &mut DisplacementFieldTransform<D>,
        tracker: &mut ProgressTracker,
    ) -> Result<FluidLevelReport<D>> {
        let size = reference.size();
        let evaluate = |field: &VectorField<D>| -> Result<(f64, VectorField<D>)> {
            let warped = warp(source, field);
            let mut force = VectorField::zeros(size);
            let value = cost.evaluate_force(&warped, reference, &mut force)?;
            Ok((value, force))
        };

        let (mut value, mut force) = evaluate(transform.field())?;
        let initial_value = value;
        tracker.record(value);
        let mut velocity = VectorField::zeros(size);
        let mut iterations = 0;

        let status = loop {
            if iterations >= self.max_iter {
                break MinimizerStatus::MaxIterations;
            }
            force.scale(-1.0);
            velocity.fill_zero();
            let solve = self.solver.solve(&force, &mut velocity)?;
            let max_squared = perturbation(transform.field(), &mut velocity)?;
            if !(max_squared > 0.0) {
                break MinimizerStatus::Converged(ConvergenceReason::Gradient);
            }
            let step = self.max_step / max_squared.sqrt();

            let mut trial = transform.field().clone();
            trial.add_scaled(&velocity, step)?;
            let (trial_value, trial_force) = evaluate(&trial)?;
            iterations += 1;
            debug!(
                iterations,
                value = trial_value,
                solver_iterations = solve.iterations,
                solver_converged = solve.converged,
                "fluid step"
            );
            if !(trial_value < value) {
                break MinimizerStatus::Stalled;
            }

            let change = (value - trial_value) / value.abs().max(f64::MIN_POSITIVE);
            *transform.field_mut() = trial;
            value = trial_value;
            force = trial_force;
            tracker.record(value);
            if change < self.tolerance {
                break MinimizerStatus::Converged(ConvergenceReason::Function);
            }
        };

        Ok(FluidLevelReport {
            level: 0,
            size,
            iterations,
            status,
            initial_value,
            final_value: value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Ssd;
    use warpkit_core::SplineKernel;

    fn kernel() -> SharedKernel {
        Arc::new(SplineKernel::bspline(3).unwrap())
    }

    #[test]
    fn test_rejects_schedule() {
        let fluid = FluidRegistration::<2>::new(Ssd::default().into(), NavierSolver::default(), kernel()).unwrap();
        assert!(fluid.clone().with_schedule(0, 10, 0.5, 0.0).is_err());
        assert!(fluid.clone().with_schedule(1, 0, 0.5, 0.0).is_err());
        assert!(fluid.clone().with_schedule(1, 10, 0.0, 0.0).is_err());
        assert!(fluid.with_schedule(1, 10, 0.5, -1.0).is_err());
    }

    #[test]
    fn test_identical_images_stay_put() {
        let image = Image::from_fn([12, 10], |[x, y]| ((x as f32 - 6.0).powi(2) + (y as f32 - 5.0).powi(2)).sqrt());
        let fluid = FluidRegistration::<2>::new(Ssd::default().into(), NavierSolver::default(), kernel())
            .unwrap()
            .with_schedule(2, 5, 0.5, 1e-4)
            .unwrap();
        let outcome = fluid.run(&image, &image).unwrap();
        assert_eq!(outcome.levels.len(), 2);
        assert_eq!(outcome.levels[0].size, [6, 5]);
        assert_eq!(outcome.levels[1].size, [12, 10]);
        assert_eq!(outcome.transform.field().max_norm(), 0.0);
        assert!(outcome.levels[1].final_value < 1e-8);
    }

    #[test]
    fn test_too_many_levels() {
        let image = Image::from_fn([8, 8], |[x, y]| (x + y) as f32);
        let fluid = FluidRegistration::<2>::new(Ssd::default().into(), NavierSolver::default(), kernel())
            .unwrap()
            .with_schedule(4, 5, 0.5, 1e-4)
            .unwrap();
        assert!(fluid.run(&image, &image).unwrap_err().is_invalid_argument());
    }
}
