//! Multi-resolution spline registration.
//!
//! Registration runs coarse to fine. Level `shift` works on images reduced
//! by blocks of `2^shift` pixels; the transformation found on one level is
//! upscaled to the next and, when the coefficient rate asks for it, refined
//! and optimized again on the same level.

use std::sync::Arc;

use tracing::{debug, info};
use warpkit_core::filter::{reduced_size, Pyramid};
use warpkit_core::{Image, SplineTransform};

use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use crate::metric::{FullCostList, ImageCostKind, ImageFullCost};
use crate::optimizer::{Minimizer, MinimizerReport};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::registration::RegistrationProblem;
use crate::registry::Registry;
use crate::transform_factory::SplineTransformFactory;

/// What happened on one pyramid level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport<const D: usize> {
    /// Level index, 0 is the coarsest.
    pub level: usize,
    /// Image size of the level.
    pub size: [usize; D],
    /// Coefficient grid after the level.
    pub coefficient_size: [usize; D],
    /// Whether the coefficient grid was refined on this level.
    pub refined: bool,
    /// Minimizer runs in order.
    pub reports: Vec<MinimizerReport>,
}

impl<const D: usize> LevelReport<D> {
    /// Cost at the end of the level.
    pub fn final_value(&self) -> Option<f64> {
        self.reports.last().map(|r| r.value)
    }
}

/// Result of a registration run.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome<const D: usize> {
    pub transform: SplineTransform<D>,
    pub levels: Vec<LevelReport<D>>,
}

/// Coarse-to-fine registration of a cost list with a spline transformation.
pub struct MultiResolutionRegistration<const D: usize> {
    costs: FullCostList<D>,
    minimizer: Minimizer,
    refinement: Option<Minimizer>,
    factory: SplineTransformFactory<D>,
    levels: usize,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl<const D: usize> MultiResolutionRegistration<D> {
    /// # Arguments
    /// * `costs` - Weighted image costs at full resolution
    /// * `minimizer` - Minimizer run on every level
    /// * `factory` - Creates the transformation on the coarsest level
    /// * `levels` - Number of pyramid levels
    ///
    /// # Errors
    /// `InvalidArgument` when `levels` is zero.
    pub fn new(
        costs: FullCostList<D>,
        minimizer: Minimizer,
        factory: SplineTransformFactory<D>,
        levels: usize,
    ) -> Result<Self> {
        if levels == 0 {
            return Err(RegistrationError::invalid_argument(
                "registration needs at least one level",
            ));
        }
        Ok(Self {
            costs,
            minimizer,
            refinement: None,
            factory,
            levels,
            progress: None,
        })
    }

    /// Resolve a configuration against a registry for one image pair.
    pub fn from_config(
        registry: &Registry<D>,
        config: &RegistrationConfig,
        moving: &Image<D>,
        reference: &Image<D>,
    ) -> Result<Self> {
        config.validate()?;
        let costs = registry.cost_list(config, moving, reference)?;
        let minimizer = registry.minimizer(&config.minimizer)?;
        let factory = registry.transform_factory(&config.transform)?;
        let mut registration = Self::new(costs, minimizer, factory, config.levels)?;
        if let Some(refinement) = &config.refinement {
            registration = registration.with_refinement(registry.minimizer(refinement)?);
        }
        Ok(registration)
    }

    /// Run a second minimizer after the main one on every level.
    pub fn with_refinement(mut self, minimizer: Minimizer) -> Self {
        self.refinement = Some(minimizer);
        self
    }

    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn costs(&self) -> &FullCostList<D> {
        &self.costs
    }

    /// Run the registration.
    ///
    /// # Errors
    /// `InvalidArgument` when the costs disagree on the image size or a
    /// level is too small for a transformation. Errors abort the run.
    pub fn run(&mut self) -> Result<RegistrationOutcome<D>> {
        let mut tracker = ProgressTracker::new(self.progress.clone(), self.levels);
        tracker.start();
        match self.run_levels(&mut tracker) {
            Ok(outcome) => {
                let value = outcome
                    .levels
                    .last()
                    .and_then(LevelReport::final_value)
                    .unwrap_or(0.0);
                tracker.complete(value);
                Ok(outcome)
            }
            Err(e) => {
                tracker.error(&e.to_string());
                Err(e)
            }
        }
    }

    fn run_levels(&mut self, tracker: &mut ProgressTracker) -> Result<RegistrationOutcome<D>> {
        self.costs.reinit();
        let full_size = self.costs.full_size()?;

        let mut transform: Option<SplineTransform<D>> = None;
        let mut reports = Vec::with_capacity(self.levels);

        for (level, shift) in (0..self.levels).rev().enumerate() {
            let size = reduced_size(full_size, [Pyramid::<D>::block(shift); D]);
            let mut current = match transform.take() {
                None => {
                    debug!(?size, "creating transformation");
                    self.factory.create(size)?
                }
                Some(previous) => {
                    debug!(?size, "upscaling transformation");
                    previous.upscale(size)?
                }
            };
            self.costs.set_size(size)?;

            info!(
                level = level + 1,
                levels = self.levels,
                ?size,
                parameters = current.degrees_of_freedom(),
                "registration level"
            );
            tracker.begin_level(level, &size, current.degrees_of_freedom());
            let mut level_reports = self.optimize(&mut current, tracker)?;

            let refined = current.refine()?;
            if refined {
                info!(
                    coefficients = ?current.coefficient_size(),
                    parameters = current.degrees_of_freedom(),
                    "registration at refined coefficient grid"
                );
                tracker.begin_level(level, &size, current.degrees_of_freedom());
                level_reports.extend(self.optimize(&mut current, tracker)?);
            }

            reports.push(LevelReport {
                level,
                size,
                coefficient_size: current.coefficient_size(),
                refined,
                reports: level_reports,
            });
            transform = Some(current);
        }

        let transform = transform
            .ok_or_else(|| RegistrationError::runtime("registration finished without a transformation"))?;
        Ok(RegistrationOutcome {
            transform,
            levels: reports,
        })
    }

    fn optimize(
        &self,
        transform: &mut SplineTransform<D>,
        tracker: &mut ProgressTracker,
    ) -> Result<Vec<MinimizerReport>> {
        let mut x = transform.get_parameters();
        let mut reports = Vec::with_capacity(2);
        {
            let mut problem = RegistrationProblem::new(&self.costs, transform).with_tracker(tracker);
            let report = self.minimizer.minimize(&mut problem, &mut x)?;
            info!(minimizer = %self.minimizer.name(), status = %report.status, value = report.value, "level optimized");
            reports.push(report);
            if let Some(refinement) = &self.refinement {
                let report = refinement.minimize(&mut problem, &mut x)?;
                info!(minimizer = %refinement.name(), status = %report.status, value = report.value, "refinement optimized");
                reports.push(report);
            }
        }
        transform.set_parameters(&x)?;
        Ok(reports)
    }
}

/// Scale two images jointly to zero mean and unit variance.
///
/// # Returns
/// `None` when both images together hold a single value.
pub fn normalize_jointly<const D: usize>(moving: &Image<D>, reference: &Image<D>) -> Option<(Image<D>, Image<D>)> {
    let (m_mean, m_std) = moving.mean_and_std();
    let (r_mean, r_std) = reference.mean_and_std();
    let (m_n, r_n) = (moving.len() as f64, reference.len() as f64);
    let n = m_n + r_n;
    if n == 0.0 {
        return None;
    }
    let mean = (m_n * m_mean + r_n * r_mean) / n;
    let second = (m_n * (m_std * m_std + m_mean * m_mean) + r_n * (r_std * r_std + r_mean * r_mean)) / n;
    let variance = second - mean * mean;
    if !(variance > 0.0) {
        return None;
    }
    let std = variance.sqrt();
    let scale = |image: &Image<D>| {
        let mut scaled = image.clone();
        scaled.map_inplace(|v| ((v as f64 - mean) / std) as f32);
        scaled
    };
    Some((scale(moving), scale(reference)))
}

/// Register one image pair with a single cost.
///
/// Both images are normalized jointly first. When they hold a single value
/// together they are already aligned and the identity is returned without
/// running any level.
///
/// # Errors
/// `InvalidArgument` when the image sizes differ or `levels` is zero.
pub fn register_images<const D: usize>(
    moving: &Image<D>,
    reference: &Image<D>,
    cost: ImageCostKind,
    minimizer: Minimizer,
    factory: SplineTransformFactory<D>,
    levels: usize,
) -> Result<RegistrationOutcome<D>> {
    if moving.size() != reference.size() {
        return Err(RegistrationError::shape_mismatch(&reference.size(), &moving.size()));
    }
    let Some((moving, reference)) = normalize_jointly(moving, reference) else {
        info!("images hold a single value, returning the identity");
        return Ok(RegistrationOutcome {
            transform: factory.create(reference.size())?,
            levels: Vec::new(),
        });
    };
    let mut costs = FullCostList::new();
    costs.push(ImageFullCost::new(
        cost,
        1.0,
        moving,
        reference,
        factory.kernel().clone(),
        factory.boundary(),
    )?);
    MultiResolutionRegistration::new(costs, minimizer, factory, levels)?.run()
}

/// Register one image pair as configured, with joint normalization.
pub fn register_with_config<const D: usize>(
    registry: &Registry<D>,
    config: &RegistrationConfig,
    moving: &Image<D>,
    reference: &Image<D>,
) -> Result<RegistrationOutcome<D>> {
    if moving.size() != reference.size() {
        return Err(RegistrationError::shape_mismatch(&reference.size(), &moving.size()));
    }
    match normalize_jointly(moving, reference) {
        Some((moving, reference)) => {
            MultiResolutionRegistration::from_config(registry, config, &moving, &reference)?.run()
        }
        None => {
            config.validate()?;
            Ok(RegistrationOutcome {
                transform: registry.transform_factory(&config.transform)?.create(reference.size())?,
                levels: Vec::new(),
            })
        }
    }
}
