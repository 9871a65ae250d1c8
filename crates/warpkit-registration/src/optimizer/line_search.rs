//! Gradient minimizers driven by line minimization.
//!
//! Each rule maps onto an argmin solver paired with the More-Thuente line
//! search: steepest descent, nonlinear conjugate gradients with the
//! Fletcher-Reeves or Polak-Ribiere+ update, and L-BFGS.

use std::fmt;
use std::str::FromStr;

use argmin::core::LineSearch;
use argmin::solver::conjugategradient::beta::{FletcherReeves, PolakRibierePlus};
use argmin::solver::conjugategradient::NonlinearConjugateGradient;
use argmin::solver::gradientdescent::SteepestDescent;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use tracing::debug;

use super::adapter::{execute, Evaluations, Params};
use super::problem::{ConvergenceReason, MinimizerReport, MinimizerStatus, Problem};
use crate::error::{RegistrationError, Result};

/// L-BFGS history length.
const HISTORY_SIZE: usize = 10;

/// Sufficient decrease constant of the Wolfe conditions.
const ARMIJO: f64 = 1e-4;

/// Restart conjugate gradients when consecutive gradients lose
/// orthogonality beyond this ratio.
const RESTART_ORTHOGONALITY: f64 = 0.1;

type MoreThuente = MoreThuenteLineSearch<Params, Params, f64>;

/// Search direction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionRule {
    /// Steepest descent.
    SteepestDescent,
    /// Fletcher-Reeves conjugate gradients.
    FletcherReeves,
    /// Polak-Ribière conjugate gradients.
    PolakRibiere,
    /// Limited-memory BFGS.
    Bfgs,
}

impl FromStr for DirectionRule {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gd" => Ok(Self::SteepestDescent),
            "cg-fr" => Ok(Self::FletcherReeves),
            "cg-pr" => Ok(Self::PolakRibiere),
            "bfgs" | "bfgs2" => Ok(Self::Bfgs),
            other => Err(RegistrationError::invalid_argument(format!(
                "unknown line search direction '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DirectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SteepestDescent => "gd",
            Self::FletcherReeves => "cg-fr",
            Self::PolakRibiere => "cg-pr",
            Self::Bfgs => "bfgs",
        })
    }
}

/// Line search minimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchMinimizer {
    rule: DirectionRule,
    step: f64,
    tol: f64,
    eps: f64,
    max_iter: usize,
}

impl LineSearchMinimizer {
    /// # Arguments
    /// * `rule` - Direction rule
    /// * `step` - Length of the first trial step
    /// * `tol` - Curvature condition of the line search: `|gᵀp| <= tol |g₀ᵀp|`
    /// * `eps` - Stop when the gradient norm falls below this
    /// * `max_iter` - Iteration limit
    pub fn new(rule: DirectionRule, step: f64, tol: f64, eps: f64, max_iter: usize) -> Result<Self> {
        if !(step > 0.0) || !(tol > 0.0 && tol < 1.0) || eps < 0.0 || max_iter == 0 {
            return Err(RegistrationError::invalid_argument(format!(
                "line search needs step > 0, tol in (0, 1), eps >= 0 and iter >= 1, got {}, {}, {}, {}",
                step, tol, eps, max_iter
            )));
        }
        Ok(Self {
            rule,
            step,
            tol,
            eps,
            max_iter,
        })
    }

    pub fn rule(&self) -> DirectionRule {
        self.rule
    }

    /// Minimize `problem` starting from `x`, which receives the result.
    ///
    /// The first line search tries `step` along the descent direction,
    /// L-BFGS starts from the unit quasi-Newton step.
    pub fn minimize<P: Problem + ?Sized>(&self, problem: &mut P, x: &mut [f64]) -> Result<MinimizerReport> {
        if x.len() != problem.size() {
            return Err(RegistrationError::shape_mismatch(&[problem.size()], &[x.len()]));
        }
        let evaluations = Evaluations::new(problem, self.eps);
        let (value, g) = evaluations.value_and_gradient(x)?;
        if evaluations.small(&g) {
            debug!(rule = %self.rule, value, "gradient below tolerance at the start");
            return Ok(MinimizerReport {
                status: MinimizerStatus::Converged(ConvergenceReason::Gradient),
                iterations: 0,
                value,
            });
        }

        let mut linesearch: MoreThuente = MoreThuenteLineSearch::new()
            .with_c(ARMIJO, self.tol)
            .map_err(library_error)?;
        let outcome = match self.rule {
            DirectionRule::Bfgs => {
                let solver = LBFGS::new(linesearch, HISTORY_SIZE)
                    .with_tolerance_grad(self.eps)
                    .map_err(library_error)?;
                execute!(&evaluations, solver, x, self.max_iter)
            }
            rule => {
                linesearch.initial_step_length(self.step).map_err(library_error)?;
                match rule {
                    DirectionRule::SteepestDescent => {
                        execute!(&evaluations, SteepestDescent::new(linesearch), x, self.max_iter)
                    }
                    DirectionRule::FletcherReeves => {
                        let solver = NonlinearConjugateGradient::new(linesearch, FletcherReeves::new())
                            .restart_orthogonality(RESTART_ORTHOGONALITY);
                        execute!(&evaluations, solver, x, self.max_iter)
                    }
                    _ => {
                        let solver = NonlinearConjugateGradient::new(linesearch, PolakRibierePlus::new())
                            .restart_orthogonality(RESTART_ORTHOGONALITY);
                        execute!(&evaluations, solver, x, self.max_iter)
                    }
                }
            }
        };
        let report = evaluations.finish(outcome, ConvergenceReason::Gradient, x)?;
        debug!(
            rule = %self.rule,
            iterations = report.iterations,
            value = report.value,
            status = %report.status,
            "line search minimizer finished"
        );
        Ok(report)
    }
}

/// Parameter checks inside argmin fail on values validated by `new`.
pub(crate) fn library_error(e: argmin::core::Error) -> RegistrationError {
    RegistrationError::optimizer(e.to_string())
}
