//! Nelder-Mead downhill simplex.
//!
//! Gradient-free; only `Problem::f` is evaluated. The simplex itself is
//! argmin's.

use argmin::solver::neldermead::NelderMead as Simplex;
use tracing::debug;

use super::adapter::{execute, Evaluations, Params};
use super::line_search::library_error;
use super::problem::{ConvergenceReason, MinimizerReport, MinimizerStatus, Problem};
use crate::error::{RegistrationError, Result};

/// Standard deviation of the vertex values below which the simplex stops.
const VALUE_TOLERANCE: f64 = 1e-10;

/// Nelder-Mead simplex minimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    step: f64,
    max_iter: usize,
}

impl NelderMead {
    /// # Arguments
    /// * `step` - Edge length of the initial simplex
    /// * `max_iter` - Iteration limit
    pub fn new(step: f64, max_iter: usize) -> Result<Self> {
        if !(step > 0.0) || max_iter == 0 {
            return Err(RegistrationError::invalid_argument(format!(
                "simplex needs step > 0 and iter >= 1, got {} and {}",
                step, max_iter
            )));
        }
        Ok(Self { step, max_iter })
    }

    /// Minimize `problem` starting from `x`, which receives the best vertex.
    pub fn minimize<P: Problem + ?Sized>(&self, problem: &mut P, x: &mut [f64]) -> Result<MinimizerReport> {
        let n = x.len();
        if n != problem.size() {
            return Err(RegistrationError::shape_mismatch(&[problem.size()], &[n]));
        }
        if n == 0 {
            return Ok(MinimizerReport {
                status: MinimizerStatus::Converged(ConvergenceReason::SimplexSize),
                iterations: 0,
                value: problem.f(x)?,
            });
        }

        let mut vertices: Vec<Params> = Vec::with_capacity(n + 1);
        vertices.push(x.to_vec());
        for i in 0..n {
            let mut v = x.to_vec();
            v[i] += self.step;
            vertices.push(v);
        }
        let simplex = Simplex::new(vertices)
            .with_sd_tolerance(VALUE_TOLERANCE)
            .map_err(library_error)?;

        let evaluations = Evaluations::new(problem, 0.0);
        let outcome = execute!(&evaluations, simplex, x, self.max_iter);
        let report = evaluations.finish(outcome, ConvergenceReason::SimplexSize, x)?;
        debug!(
            iterations = report.iterations,
            value = report.value,
            status = %report.status,
            "simplex finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::problem::testing::{Quadratic, Rosenbrock};

    #[test]
    fn test_rosenbrock() {
        let simplex = NelderMead::new(1.0, 2000).unwrap();
        let mut x = vec![-1.2, 1.0];
        let report = simplex.minimize(&mut Rosenbrock, &mut x).unwrap();
        assert!(report.status.is_converged(), "{:?}", report);
        assert!((x[0] - 1.0).abs() < 0.05 && (x[1] - 1.0).abs() < 0.05, "{:?}", x);
    }

    #[test]
    fn test_quadratic() {
        let simplex = NelderMead::new(1.0, 2000).unwrap();
        let mut problem = Quadratic::new(vec![1.0, -2.0, 0.5, 3.0]);
        let mut x = vec![0.0; 4];
        let report = simplex.minimize(&mut problem, &mut x).unwrap();
        assert!(report.value < 1e-3, "{:?}", report);
        assert_eq!(report.value, problem.f(&x).unwrap());
    }

    #[test]
    fn test_iteration_limit() {
        let simplex = NelderMead::new(1.0, 3).unwrap();
        let mut x = vec![-1.2, 1.0];
        let report = simplex.minimize(&mut Rosenbrock, &mut x).unwrap();
        assert_eq!(report.status, MinimizerStatus::MaxIterations);
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn test_rejects_parameters() {
        assert!(NelderMead::new(0.0, 10).is_err());
        assert!(NelderMead::new(1.0, 0).is_err());
    }
}
