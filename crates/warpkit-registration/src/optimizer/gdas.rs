//! Gradient descent with adaptive step size.
//!
//! Each step moves the parameter with the largest gradient component by
//! exactly `step`. Successful steps may grow the step size, failed steps
//! are undone and halve it.

use tracing::{debug, trace};

use super::problem::{max_abs, ConvergenceReason, MinimizerReport, MinimizerStatus, Problem};
use crate::error::{RegistrationError, Result};

/// Consecutive failures at the minimal step size tolerated before giving up.
const MAX_FAILURES_AT_MIN: usize = 5;

/// Adaptive step gradient descent.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveGradientDescent {
    min_step: f64,
    max_step: f64,
    xtola: f64,
    ftolr: f64,
    max_iter: usize,
}

impl Default for AdaptiveGradientDescent {
    fn default() -> Self {
        Self {
            min_step: 0.1,
            max_step: 2.0,
            xtola: 0.01,
            ftolr: 0.0,
            max_iter: 200,
        }
    }
}

impl AdaptiveGradientDescent {
    /// # Arguments
    /// * `min_step` - Smallest step size
    /// * `max_step` - Largest step size, above `min_step`
    /// * `xtola` - Stop when the largest gradient component falls below this
    /// * `ftolr` - Stop when a step decreases the objective by less than this
    ///   fraction
    /// * `max_iter` - Iteration limit
    ///
    /// # Errors
    /// `InvalidArgument` when `max_step <= min_step` or a tolerance is
    /// negative.
    pub fn new(min_step: f64, max_step: f64, xtola: f64, ftolr: f64, max_iter: usize) -> Result<Self> {
        if !(min_step > 0.0) || max_step <= min_step {
            return Err(RegistrationError::invalid_argument(format!(
                "gdas needs 0 < min-step < max-step, got {} and {}",
                min_step, max_step
            )));
        }
        if xtola < 0.0 || ftolr < 0.0 || max_iter == 0 {
            return Err(RegistrationError::invalid_argument(
                "gdas tolerances must be non-negative and maxiter positive",
            ));
        }
        Ok(Self {
            min_step,
            max_step,
            xtola,
            ftolr,
            max_iter,
        })
    }

    /// Minimize `problem` starting from `x`, which receives the result.
    pub fn minimize<P: Problem + ?Sized>(&self, problem: &mut P, x: &mut [f64]) -> Result<MinimizerReport> {
        if x.len() != problem.size() {
            return Err(RegistrationError::shape_mismatch(&[problem.size()], &[x.len()]));
        }
        let mut g = vec![0.0; x.len()];
        let mut value = problem.fdf(x, &mut g)?;
        let mut gmax = max_abs(&g);
        let mut step = (self.max_step - self.min_step) / 2.0;
        let mut failures = 0;
        let mut trial = vec![0.0; x.len()];
        let mut trial_g = vec![0.0; x.len()];

        let mut iterations = 0;
        let status = loop {
            if gmax < self.xtola || gmax == 0.0 {
                break MinimizerStatus::Converged(ConvergenceReason::Gradient);
            }
            if iterations >= self.max_iter {
                break MinimizerStatus::MaxIterations;
            }
            iterations += 1;

            let factor = step / gmax;
            for ((t, xi), gi) in trial.iter_mut().zip(x.iter()).zip(&g) {
                *t = xi - factor * gi;
            }
            let trial_value = problem.fdf(&trial, &mut trial_g)?;
            trace!(iterations, value, trial_value, step, "gdas step");

            if trial_value < value {
                let decrease = (value - trial_value) / value.abs().max(f64::MIN_POSITIVE);
                if trial_value < 0.5 * value {
                    step = (step * 1.5).min(self.max_step);
                }
                failures = 0;
                x.copy_from_slice(&trial);
                std::mem::swap(&mut g, &mut trial_g);
                gmax = max_abs(&g);
                value = trial_value;
                if decrease < self.ftolr {
                    break MinimizerStatus::Converged(ConvergenceReason::Function);
                }
            } else if step > self.min_step {
                step = (step / 2.0).max(self.min_step);
            } else {
                failures += 1;
                if failures >= MAX_FAILURES_AT_MIN {
                    break MinimizerStatus::Stalled;
                }
            }
        };
        debug!(iterations, value, %status, "gdas finished");
        Ok(MinimizerReport {
            status,
            iterations,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::problem::testing::Quadratic;

    /// 1-D problem with a unit gradient whose trial values follow a script:
    /// `true` entries undercut the current value, `false` entries exceed it.
    struct Scripted {
        script: Vec<bool>,
        calls: usize,
        value: f64,
    }

    impl Scripted {
        fn new(script: Vec<bool>) -> Self {
            Self {
                script,
                calls: 0,
                value: 100.0,
            }
        }
    }

    impl Problem for Scripted {
        fn size(&self) -> usize {
            1
        }

        fn f(&mut self, _x: &[f64]) -> Result<f64> {
            let call = self.calls;
            self.calls += 1;
            if call == 0 {
                return Ok(self.value);
            }
            let improves = self.script[(call - 1) % self.script.len()];
            if improves {
                self.value -= 1.0;
                Ok(self.value)
            } else {
                Ok(self.value + 1.0)
            }
        }

        fn fdf(&mut self, x: &[f64], g: &mut [f64]) -> Result<f64> {
            g[0] = 1.0;
            self.f(x)
        }
    }

    #[test]
    fn test_rejects_step_range() {
        assert!(AdaptiveGradientDescent::new(1.0, 1.0, 0.01, 0.0, 10).is_err());
        assert!(AdaptiveGradientDescent::new(0.0, 1.0, 0.01, 0.0, 10).is_err());
        assert!(AdaptiveGradientDescent::new(0.1, 2.0, 0.01, 0.0, 10).is_ok());
    }

    #[test]
    fn test_minimizes_quadratic() {
        let gdas = AdaptiveGradientDescent::new(0.001, 1.0, 1e-3, 0.0, 2000).unwrap();
        let mut problem = Quadratic::new(vec![3.0, -1.0, 0.5]);
        let mut x = vec![0.0; 3];
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert!(report.value < 1e-3, "{:?}", report);
        for (a, b) in x.iter().zip([3.0, -1.0, 0.5]) {
            assert!((a - b).abs() < 0.05, "{:?}", x);
        }
    }

    #[test]
    fn test_gradient_tolerance_at_minimum() {
        let gdas = AdaptiveGradientDescent::default();
        let mut problem = Quadratic::new(vec![1.0, 2.0]);
        let mut x = vec![1.0, 2.0];
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(report.status, MinimizerStatus::Converged(ConvergenceReason::Gradient));
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_failures_must_be_consecutive() {
        let gdas = AdaptiveGradientDescent::new(0.1, 0.3, 0.01, 0.0, 100).unwrap();
        let mut problem = Scripted::new(vec![false, true]);
        let mut x = vec![0.0];
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(report.status, MinimizerStatus::MaxIterations);
        assert_eq!(report.iterations, 100);
        assert_eq!(report.value, 50.0);
    }

    #[test]
    fn test_stalls_after_failures_at_min_step() {
        // 0.95 halves three times and is floored on the fourth failure,
        // then five failures at the minimal step end the run
        let gdas = AdaptiveGradientDescent::default();
        let mut problem = Scripted::new(vec![false]);
        let mut x = vec![0.0];
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(report.status, MinimizerStatus::Stalled);
        assert_eq!(report.iterations, 9);
        assert_eq!(x, vec![0.0]);
        assert_eq!(report.value, 100.0);
    }

    #[test]
    fn test_zero_gradient_without_tolerance() {
        let gdas = AdaptiveGradientDescent::new(0.1, 2.0, 0.0, 0.0, 10).unwrap();
        let mut problem = Quadratic::new(vec![1.0, 2.0]);
        let mut x = vec![1.0, 2.0];
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert_eq!(report.status, MinimizerStatus::Converged(ConvergenceReason::Gradient));
        assert_eq!(report.iterations, 0);
        assert_eq!(x, vec![1.0, 2.0]);
    }

    #[test]
    fn test_never_increases() {
        let gdas = AdaptiveGradientDescent::default();
        let mut problem = Quadratic::new(vec![0.3, 0.2]);
        let mut x = vec![5.0, -4.0];
        let start = problem.f(&x).unwrap();
        let report = gdas.minimize(&mut problem, &mut x).unwrap();
        assert!(report.value <= start);
        assert_eq!(report.value, problem.f(&x).unwrap());
    }
}
