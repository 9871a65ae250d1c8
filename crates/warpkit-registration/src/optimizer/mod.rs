//! Minimizers for the registration problem.
//!
//! All minimizers work on a flat `f64` parameter vector through the
//! [`Problem`] trait. Adaptive gradient descent is implemented here, the
//! line search and simplex minimizers run argmin solvers. [`Minimizer`] is the closed set of choices a
//! registration run can be configured with.
//!
//! # Examples
//!
//! ```rust,ignore
//! use warpkit_registration::optimizer::{AdaptiveGradientDescent, Minimizer};
//!
//! let minimizer = Minimizer::from(AdaptiveGradientDescent::default());
//! let report = minimizer.minimize(&mut problem, &mut params)?;
//! ```

mod adapter;
pub mod gdas;
pub mod line_search;
pub mod problem;
pub mod simplex;

pub use gdas::AdaptiveGradientDescent;
pub use line_search::{DirectionRule, LineSearchMinimizer};
pub use problem::{ConvergenceReason, MinimizerReport, MinimizerStatus, Problem};
pub use simplex::NelderMead;

use crate::error::Result;

/// Minimizer selected for a registration run.
#[derive(Debug, Clone, PartialEq)]
pub enum Minimizer {
    Gdas(AdaptiveGradientDescent),
    LineSearch(LineSearchMinimizer),
    Simplex(NelderMead),
}

impl Minimizer {
    /// Minimize `problem` starting from `x`, which receives the result.
    pub fn minimize<P: Problem + ?Sized>(&self, problem: &mut P, x: &mut [f64]) -> Result<MinimizerReport> {
        match self {
            Minimizer::Gdas(m) => m.minimize(problem, x),
            Minimizer::LineSearch(m) => m.minimize(problem, x),
            Minimizer::Simplex(m) => m.minimize(problem, x),
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> String {
        match self {
            Minimizer::Gdas(_) => "gdas".to_string(),
            Minimizer::LineSearch(m) => format!("gsl:{}", m.rule()),
            Minimizer::Simplex(_) => "gsl:simplex".to_string(),
        }
    }

    /// Whether the minimizer evaluates gradients.
    pub fn uses_gradient(&self) -> bool {
        !matches!(self, Minimizer::Simplex(_))
    }
}

impl Default for Minimizer {
    fn default() -> Self {
        Minimizer::Gdas(AdaptiveGradientDescent::default())
    }
}

impl From<AdaptiveGradientDescent> for Minimizer {
    fn from(m: AdaptiveGradientDescent) -> Self {
        Minimizer::Gdas(m)
    }
}

impl From<LineSearchMinimizer> for Minimizer {
    fn from(m: LineSearchMinimizer) -> Self {
        Minimizer::LineSearch(m)
    }
}

impl From<NelderMead> for Minimizer {
    fn from(m: NelderMead) -> Self {
        Minimizer::Simplex(m)
    }
}
