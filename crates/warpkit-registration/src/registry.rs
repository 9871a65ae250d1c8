//! Resolution of descriptor strings into registration components.
//!
//! A [`Registry`] is built once and passed by reference to whatever needs
//! to turn descriptors into kernels, costs, penalties, minimizers,
//! transformation factories or Navier solvers. It keeps one shared instance
//! per spline kernel and a table of penalty constructors that can be
//! extended at runtime.
//!
//! # Examples
//!
//! ```rust,ignore
//! let registry = Registry::<2>::new();
//! let cost = registry.cost("mi:rbins=32,mbins=32")?;
//! let minimizer = registry.minimizer("gsl:opt=bfgs,iter=50")?;
//! let factory = registry.transform_factory("spline:rate=8,penalty=[divcurl:weight=0.01]")?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use warpkit_core::interpolation::KernelFamily;
use warpkit_core::{BoundaryKind, CoreError, Descriptor, Image, SharedKernel, SplineKernel, SplinePenalty};

use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use crate::metric::{FullCostList, ImageCostKind, ImageFullCost, Lncc, Lsd, MutualInformation, Ssd};
use crate::optimizer::{AdaptiveGradientDescent, DirectionRule, LineSearchMinimizer, Minimizer, NelderMead};
use crate::regularization::{DivCurlPenalty, NavierSolver};
use crate::transform_factory::SplineTransformFactory;

/// Builds a penalty from its descriptor. Keys it does not consume are
/// rejected by the registry afterwards.
pub type PenaltyConstructor<const D: usize> =
    Arc<dyn Fn(&mut Descriptor) -> Result<Box<dyn SplinePenalty<D>>> + Send + Sync>;

/// Largest B-spline degree with a cached kernel.
const MAX_DEGREE: usize = 5;

/// Descriptor resolution context.
pub struct Registry<const D: usize> {
    bsplines: Vec<SharedKernel>,
    omoms3: SharedKernel,
    penalties: BTreeMap<String, PenaltyConstructor<D>>,
}

impl<const D: usize> Registry<D> {
    /// Registry with the built-in kernels and the `divcurl` penalty.
    pub fn new() -> Self {
        let bsplines = (0..=MAX_DEGREE)
            .filter_map(|d| SplineKernel::bspline(d).ok().map(Arc::new))
            .collect();
        let mut registry = Self {
            bsplines,
            omoms3: Arc::new(SplineKernel::omoms3()),
            penalties: BTreeMap::new(),
        };
        registry.register_penalty("divcurl", Arc::new(divcurl_from_descriptor::<D>));
        registry
    }

    /// Add or replace a penalty constructor.
    pub fn register_penalty(&mut self, name: &str, constructor: PenaltyConstructor<D>) {
        self.penalties.insert(name.to_string(), constructor);
    }

    /// Names of the registered penalties.
    pub fn penalty_names(&self) -> Vec<&str> {
        self.penalties.keys().map(String::as_str).collect()
    }

    /// Shared kernel for `bspline:d=N` or `omoms:d=3`.
    pub fn kernel(&self, text: &str) -> Result<SharedKernel> {
        self.kernel_from(Descriptor::parse(text)?)
    }

    /// Shared kernel for a parsed descriptor.
    pub fn kernel_from(&self, descriptor: Descriptor) -> Result<SharedKernel> {
        // parse to validate, then hand out the cached instance
        let kernel = SplineKernel::from_descriptor(descriptor)?;
        let cached = match kernel.family() {
            KernelFamily::OMoms => Some(&self.omoms3).filter(|k| k.degree() == kernel.degree()),
            KernelFamily::BSpline => self.bsplines.get(kernel.degree()),
        };
        Ok(cached.cloned().unwrap_or_else(|| Arc::new(kernel)))
    }

    /// Penalty from a descriptor such as `divcurl:weight=0.01`.
    pub fn penalty(&self, text: &str) -> Result<Box<dyn SplinePenalty<D>>> {
        self.penalty_from(Descriptor::parse(text)?)
    }

    pub fn penalty_from(&self, mut descriptor: Descriptor) -> Result<Box<dyn SplinePenalty<D>>> {
        let constructor = self.penalties.get(descriptor.name()).ok_or_else(|| {
            unknown(&descriptor, "penalty", &self.penalty_names())
        })?;
        let penalty = constructor(&mut descriptor)?;
        descriptor.finish()?;
        Ok(penalty)
    }

    /// Image cost from a descriptor.
    ///
    /// * `ssd:norm=1`
    /// * `ssd-automask:rthresh=0,sthresh=0`
    /// * `mi:rbins=64,mbins=64,rkernel=[bspline:d=0],mkernel=[bspline:d=3],cut=0`
    /// * `lncc:w=5`
    /// * `lsd`
    pub fn cost(&self, text: &str) -> Result<ImageCostKind> {
        let mut d = Descriptor::parse(text)?;
        let name = d.name().to_string();
        let cost = match name.as_str() {
            "ssd" => Ssd::new(d.take_bool("norm", true)?).into(),
            "ssd-automask" => {
                let rthresh = d.take_f64_in("rthresh", 0.0, f64::MIN, f64::MAX)?;
                let sthresh = d.take_f64_in("sthresh", 0.0, f64::MIN, f64::MAX)?;
                Ssd::with_automask(rthresh as f32, sthresh as f32).into()
            }
            "mi" => {
                let reference_bins = d.take_usize_in("rbins", 64, 1, 256)?;
                let moving_bins = d.take_usize_in("mbins", 64, 1, 256)?;
                let reference_kernel = self.kernel_from(d.take_descriptor("rkernel", "bspline:d=0")?)?;
                let moving_kernel = self.kernel_from(d.take_descriptor("mkernel", "bspline:d=3")?)?;
                let cut = d.take_f64_in("cut", 0.0, 0.0, 40.0)?;
                MutualInformation::new(reference_bins, reference_kernel, moving_bins, moving_kernel, cut)?.into()
            }
            "lncc" => Lncc::new(d.take_usize_in("w", 5, 1, 256)?)?.into(),
            "lsd" => Lsd::new().into(),
            _ => return Err(unknown(&d, "cost", &["ssd", "ssd-automask", "mi", "lncc", "lsd"])),
        };
        d.finish()?;
        Ok(cost)
    }

    /// Minimizer from a descriptor.
    ///
    /// * `gdas:min-step=0.1,max-step=2,xtola=0.01,ftolr=0,maxiter=200`
    /// * `gsl:opt=gd|cg-fr|cg-pr|bfgs|bfgs2|simplex,step=0.001,tol=0.1,eps=0.01,iter=100`
    ///
    /// For `opt=simplex` the step is the initial simplex size and defaults
    /// to 1.
    pub fn minimizer(&self, text: &str) -> Result<Minimizer> {
        let mut d = Descriptor::parse(text)?;
        let name = d.name().to_string();
        let minimizer = match name.as_str() {
            "gdas" => {
                let min_step = d.take_f64_in("min-step", 0.1, f64::MIN_POSITIVE, f64::MAX)?;
                let max_step = d.take_f64_in("max-step", 2.0, f64::MIN_POSITIVE, f64::MAX)?;
                let xtola = d.take_f64_in("xtola", 0.01, 0.0, f64::MAX)?;
                let ftolr = d.take_f64_in("ftolr", 0.0, 0.0, f64::MAX)?;
                let max_iter = d.take_usize_in("maxiter", 200, 1, usize::MAX)?;
                AdaptiveGradientDescent::new(min_step, max_step, xtola, ftolr, max_iter)?.into()
            }
            "gsl" => {
                let opt = d.take_choice("opt", "gd", &["gd", "cg-fr", "cg-pr", "bfgs", "bfgs2", "simplex"])?;
                let max_iter = d.take_usize_in("iter", 100, 1, usize::MAX)?;
                if opt == "simplex" {
                    let step = d.take_f64_in("step", 1.0, f64::MIN_POSITIVE, 10.0)?;
                    NelderMead::new(step, max_iter)?.into()
                } else {
                    let rule: DirectionRule = opt.parse()?;
                    let step = d.take_f64_in("step", 0.001, f64::MIN_POSITIVE, 10.0)?;
                    let tol = d.take_f64_in("tol", 0.1, 0.001, 0.999)?;
                    let eps = d.take_f64_in("eps", 0.01, 1e-10, 10.0)?;
                    LineSearchMinimizer::new(rule, step, tol, eps, max_iter)?.into()
                }
            }
            _ => return Err(unknown(&d, "minimizer", &["gdas", "gsl"])),
        };
        d.finish()?;
        Ok(minimizer)
    }

    /// Transformation factory from
    /// `spline:rate=16,kernel=[bspline:d=3],bc=mirror,penalty=[...]`.
    pub fn transform_factory(&self, text: &str) -> Result<SplineTransformFactory<D>> {
        let mut d = Descriptor::parse(text)?;
        if d.name() != "spline" {
            return Err(unknown(&d, "transformation", &["spline"]));
        }
        let rate = d.take_f64_in("rate", 16.0, 1.0, f64::MAX)?;
        let kernel = self.kernel_from(d.take_descriptor("kernel", "bspline:d=3")?)?;
        let boundary: BoundaryKind = d.take_choice("bc", "mirror", &["mirror", "zero", "repeat"])?.parse()?;
        let penalty = d
            .take_optional_descriptor("penalty")?
            .map(|p| self.penalty_from(p))
            .transpose()?;
        d.finish()?;

        let factory = SplineTransformFactory::new([rate; D], kernel, boundary)?;
        Ok(match penalty {
            Some(p) => factory.with_penalty(p),
            None => factory,
        })
    }

    /// Navier solver from `navier:mu=1,lambda=1,omega=1,epsilon=1e-4,iter=100`.
    pub fn navier(&self, text: &str) -> Result<NavierSolver> {
        let mut d = Descriptor::parse(text)?;
        if d.name() != "navier" {
            return Err(unknown(&d, "solver", &["navier"]));
        }
        let mu = d.take_f64_in("mu", 1.0, f64::MIN_POSITIVE, f64::MAX)?;
        let lambda = d.take_f64_in("lambda", 1.0, 0.0, f64::MAX)?;
        let omega = d.take_f64_in("omega", 1.0, 0.1, 10.0)?;
        let epsilon = d.take_f64_in("epsilon", 1e-4, f64::MIN_POSITIVE, f64::MAX)?;
        let max_iter = d.take_usize_in("iter", 100, 1, usize::MAX)?;
        d.finish()?;
        NavierSolver::new(mu, lambda, omega, epsilon, max_iter)
    }

    /// Cost list over one image pair from the configured costs.
    pub fn cost_list(
        &self,
        config: &RegistrationConfig,
        moving: &Image<D>,
        reference: &Image<D>,
    ) -> Result<FullCostList<D>> {
        let factory = self.transform_factory(&config.transform)?;
        let mut costs = FullCostList::new();
        for entry in &config.costs {
            let cost = self.cost(&entry.cost)?;
            debug!(cost = %entry.cost, weight = entry.weight, "adding cost");
            costs.push(ImageFullCost::new(
                cost,
                entry.weight,
                moving.clone(),
                reference.clone(),
                factory.kernel().clone(),
                factory.boundary(),
            )?);
        }
        Ok(costs)
    }
}

impl<const D: usize> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn divcurl_from_descriptor<const D: usize>(d: &mut Descriptor) -> Result<Box<dyn SplinePenalty<D>>> {
    let div = d.take_f64_in("div", 1.0, 0.0, f64::MAX)?;
    let curl = d.take_f64_in("curl", 1.0, 0.0, f64::MAX)?;
    let weight = d.take_f64_in("weight", 1.0, 0.0, f64::MAX)?;
    let normalize = d.take_bool("norm", false)?;
    Ok(Box::new(DivCurlPenalty::<D>::new(div, curl, weight, normalize)?))
}

fn unknown(descriptor: &Descriptor, what: &str, known: &[&str]) -> RegistrationError {
    CoreError::descriptor(
        descriptor.source(),
        format!("unknown {} '{}', expected one of {:?}", what, descriptor.name(), known),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::ImageCost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_kernel_cache_is_shared() {
        let registry = Registry::<2>::new();
        let a = registry.kernel("bspline:d=3").unwrap();
        let b = registry.kernel("bspline").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let omoms = registry.kernel("omoms:d=3").unwrap();
        assert!(!Arc::ptr_eq(&a, &omoms));
        assert!(Arc::ptr_eq(&omoms, &registry.kernel("omoms").unwrap()));
        assert!(registry.kernel("bspline:d=7").is_err());
        assert!(registry.kernel("catmull").is_err());
    }

    #[test]
    fn test_costs() {
        let registry = Registry::<2>::new();
        let names = ["ssd", "ssd:norm=0", "ssd-automask:rthresh=0.5", "mi:rbins=16,cut=5", "lncc:w=3", "lsd"];
        let expected = ["ssd", "ssd", "ssd-automask", "mi", "lncc", "lsd"];
        for (text, name) in names.iter().zip(expected) {
            let cost = registry.cost(text).unwrap();
            assert_eq!(ImageCost::<2>::name(&cost), name, "{}", text);
        }
    }

    #[test]
    fn test_cost_bounds_and_unknown_keys() {
        let registry = Registry::<2>::new();
        for text in ["mi:rbins=0", "mi:mbins=300", "mi:cut=50", "lncc:w=0", "lncc:w=257", "ssd:w=3", "ncc"] {
            let err = registry.cost(text).unwrap_err();
            assert!(err.is_invalid_argument(), "{}: {}", text, err);
        }
    }

    #[test]
    fn test_minimizers() {
        let registry = Registry::<2>::new();
        assert_eq!(registry.minimizer("gdas").unwrap(), Minimizer::default());
        assert_eq!(registry.minimizer("gsl").unwrap().name(), "gsl:gd");
        assert_eq!(registry.minimizer("gsl:opt=bfgs2,iter=10").unwrap().name(), "gsl:bfgs");
        let simplex = registry.minimizer("gsl:opt=simplex").unwrap();
        assert_eq!(simplex, Minimizer::Simplex(NelderMead::new(1.0, 100).unwrap()));
        assert!(registry.minimizer("gdas:min-step=2,max-step=1").is_err());
        assert!(registry.minimizer("gsl:opt=newton").is_err());
        assert!(registry.minimizer("gsl:opt=gd,tol=0").is_err());
        assert!(registry.minimizer("nlopt").is_err());
    }

    #[test]
    fn test_transform_factory() {
        let registry = Registry::<2>::new();
        let factory = registry
            .transform_factory("spline:rate=4,kernel=[bspline:d=3],bc=mirror,penalty=[divcurl:weight=0.01]")
            .unwrap();
        assert_eq!(factory.rate(), [4.0, 4.0]);
        assert_eq!(factory.boundary(), BoundaryKind::Mirror);
        assert!(factory.has_penalty());
        assert!(Arc::ptr_eq(factory.kernel(), &registry.kernel("bspline:d=3").unwrap()));

        let plain = registry.transform_factory("spline").unwrap();
        assert_eq!(plain.rate(), [16.0, 16.0]);
        assert!(!plain.has_penalty());

        assert!(registry.transform_factory("spline:rate=0.5").is_err());
        assert!(registry.transform_factory("spline:kernel=[bspline:d=5],bc=zero").is_err());
        assert!(registry.transform_factory("spline:penalty=[divcurl:weigth=1]").is_err());
        assert!(registry.transform_factory("affine").is_err());
    }

    #[test]
    fn test_registered_penalty() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut registry = Registry::<2>::new();
        registry.register_penalty(
            "scaled-divcurl",
            Arc::new(|d: &mut Descriptor| -> Result<Box<dyn SplinePenalty<2>>> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                let scale = d.take_f64_in("scale", 1.0, 0.0, 10.0)?;
                Ok(Box::new(DivCurlPenalty::<2>::new(scale, scale, 1.0, false)?))
            }),
        );
        assert_eq!(registry.penalty_names(), vec!["divcurl", "scaled-divcurl"]);
        let penalty = registry.penalty("scaled-divcurl:scale=2").unwrap();
        assert_eq!(penalty.weight(), 1.0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(registry.penalty("scaled-divcurl:other=1").is_err());
        assert!(registry.penalty("thinplate").is_err());
    }

    #[test]
    fn test_navier() {
        let registry = Registry::<3>::new();
        let solver = registry.navier("navier:mu=2,lambda=0.5,iter=20").unwrap();
        assert_eq!(solver.mu(), 2.0);
        assert_eq!(solver.lambda(), 0.5);
        assert_eq!(solver.max_iter(), 20);
        assert!(registry.navier("navier:omega=20").is_err());
        assert!(registry.navier("navier:mu=0").is_err());
    }

    #[test]
    fn test_cost_list_from_config() {
        let registry = Registry::<2>::new();
        let config = RegistrationConfig::from_json(
            r#"{"transform": "spline:rate=4", "costs": [{"cost": "ssd"}, {"cost": "lncc:w=2", "weight": 0.5}]}"#,
        )
        .unwrap();
        let image = Image::from_fn([10, 8], |[x, y]| (x + 2 * y) as f32);
        let costs = registry.cost_list(&config, &image, &image).unwrap();
        assert_eq!(costs.len(), 2);
        assert_eq!(costs.full_size().unwrap(), [10, 8]);

        let bad = RegistrationConfig {
            costs: vec![crate::config::CostConfig::new("mi:rbins=999", 1.0)],
            ..config
        };
        assert!(registry.cost_list(&bad, &image, &image).is_err());
    }
}
