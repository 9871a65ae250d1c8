//! Bridge from [`Problem`] to the argmin solver traits.
//!
//! argmin evaluates through `&self`, so the problem sits behind a
//! `RefCell`. The bridge remembers the lowest value seen together with its
//! parameters, which is what a run returns even when the solver gives up
//! part way through a line search.

use std::cell::RefCell;

use argmin::core::{CostFunction, Error as ArgminError, Gradient, TerminationReason};
use tracing::warn;

use super::problem::{norm, ConvergenceReason, MinimizerReport, MinimizerStatus, Problem};
use crate::error::{RegistrationError, Result};

/// Parameter and gradient vectors handed to argmin.
pub(crate) type Params = Vec<f64>;

/// Raised from [`Gradient::gradient`] to end a run once the gradient at
/// the best point falls below the tolerance.
#[derive(Debug, thiserror::Error)]
#[error("gradient norm below tolerance")]
struct GradientBelowTolerance;

#[derive(Default)]
struct Record {
    best: Option<(f64, Params)>,
    improvements: usize,
    /// Last value and gradient, argmin asks for both at the same point.
    last: Option<(Params, f64, Params)>,
}

/// A [`Problem`] seen through argmin's `CostFunction` and `Gradient`.
pub(crate) struct Evaluations<'a, P: Problem + ?Sized> {
    problem: RefCell<&'a mut P>,
    eps: f64,
    record: RefCell<Record>,
}

/// How an argmin run ended.
pub(crate) type Outcome = std::result::Result<(u64, Option<TerminationReason>), ArgminError>;

impl<'a, P: Problem + ?Sized> Evaluations<'a, P> {
    /// Wrap `problem`; gradient evaluations stop the run once `|g| < eps`
    /// at the best point.
    pub(crate) fn new(problem: &'a mut P, eps: f64) -> Self {
        Self {
            problem: RefCell::new(problem),
            eps,
            record: RefCell::new(Record::default()),
        }
    }

    /// Value and gradient at `x`.
    pub(crate) fn value_and_gradient(&self, x: &[f64]) -> Result<(f64, Params)> {
        if let Some((at, value, g)) = &self.record.borrow().last {
            if at.as_slice() == x {
                return Ok((*value, g.clone()));
            }
        }
        let mut g = vec![0.0; x.len()];
        let value = self.problem.borrow_mut().fdf(x, &mut g)?;
        self.note(x, value);
        self.record.borrow_mut().last = Some((x.to_vec(), value, g.clone()));
        Ok((value, g))
    }

    /// Whether the gradient tolerance holds at `g`.
    pub(crate) fn small(&self, g: &[f64]) -> bool {
        norm(g) < self.eps
    }

    fn value(&self, x: &[f64]) -> Result<f64> {
        if let Some((at, value, _)) = &self.record.borrow().last {
            if at.as_slice() == x {
                return Ok(*value);
            }
        }
        let value = self.problem.borrow_mut().f(x)?;
        self.note(x, value);
        Ok(value)
    }

    /// Track the lowest value. Returns whether `x` is the best point.
    fn note(&self, x: &[f64], value: f64) -> bool {
        let mut record = self.record.borrow_mut();
        if let Some((best, at)) = &record.best {
            if !(value < *best) {
                return *best == value && at.as_slice() == x;
            }
        }
        record.best = Some((value, x.to_vec()));
        record.improvements += 1;
        true
    }

    /// Write the best point to `x` and summarize the run.
    ///
    /// Errors raised by the problem abort the run. Any other solver failure
    /// is a breakdown of the search and ends it as `Stalled`.
    pub(crate) fn finish(self, outcome: Outcome, converged: ConvergenceReason, x: &mut [f64]) -> Result<MinimizerReport> {
        let improvements = self.record.borrow().improvements;
        let (status, iterations) = match outcome {
            Ok((iterations, reason)) => {
                let status = match reason {
                    Some(TerminationReason::MaxItersReached) => MinimizerStatus::MaxIterations,
                    Some(TerminationReason::SolverConverged) => MinimizerStatus::Converged(converged),
                    _ => MinimizerStatus::Stalled,
                };
                (status, iterations as usize)
            }
            Err(e) if e.is::<GradientBelowTolerance>() => {
                (MinimizerStatus::Converged(ConvergenceReason::Gradient), improvements)
            }
            Err(e) => match e.downcast::<RegistrationError>() {
                Ok(e) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "minimizer stopped early");
                    (MinimizerStatus::Stalled, improvements)
                }
            },
        };
        let (value, best) = self
            .record
            .into_inner()
            .best
            .ok_or_else(|| RegistrationError::runtime("minimizer evaluated no point"))?;
        x.copy_from_slice(&best);
        Ok(MinimizerReport {
            status,
            iterations,
            value,
        })
    }
}

impl<P: Problem + ?Sized> CostFunction for &Evaluations<'_, P> {
    type Param = Params;
    type Output = f64;

    fn cost(&self, x: &Params) -> std::result::Result<f64, ArgminError> {
        Ok(self.value(x)?)
    }
}

impl<P: Problem + ?Sized> Gradient for &Evaluations<'_, P> {
    type Param = Params;
    type Gradient = Params;

    fn gradient(&self, x: &Params) -> std::result::Result<Params, ArgminError> {
        let (value, g) = self.value_and_gradient(x)?;
        if self.small(&g) && self.note(x, value) {
            return Err(GradientBelowTolerance.into());
        }
        Ok(g)
    }
}

/// Run an argmin solver from `x` for at most `max_iter` iterations.
macro_rules! execute {
    ($evaluations:expr, $solver:expr, $x:expr, $max_iter:expr) => {
        argmin::core::Executor::new($evaluations, $solver)
            .configure(|state| state.param($x.to_vec()).max_iters($max_iter as u64))
            .run()
            .map(|result| {
                use argmin::core::State;
                let state = result.state();
                (state.get_iter(), state.get_termination_reason().cloned())
            })
    };
}
pub(crate) use execute;
