//! Minimization problems and minimizer reports.

use std::fmt;

use crate::error::Result;

/// Objective function over a flat parameter vector.
///
/// Evaluation takes `&mut self` so problems can keep scratch state, e.g.
/// the transformation the parameters are written into.
pub trait Problem {
    /// Number of parameters.
    fn size(&self) -> usize;

    /// Objective value at `x`.
    fn f(&mut self, x: &[f64]) -> Result<f64>;

    /// Gradient at `x`, written to `g`.
    fn df(&mut self, x: &[f64], g: &mut [f64]) -> Result<()> {
        self.fdf(x, g).map(|_| ())
    }

    /// Objective value and gradient at `x`.
    fn fdf(&mut self, x: &[f64], g: &mut [f64]) -> Result<f64>;
}

/// Why a minimizer considered the problem solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    /// The gradient fell below the tolerance.
    Gradient,
    /// The relative decrease of the objective fell below the tolerance.
    Function,
    /// The simplex shrank below the tolerance.
    SimplexSize,
}

/// How a minimizer run ended. Not converging is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimizerStatus {
    Converged(ConvergenceReason),
    MaxIterations,
    /// No further progress was possible.
    Stalled,
}

impl MinimizerStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, MinimizerStatus::Converged(_))
    }
}

impl fmt::Display for MinimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinimizerStatus::Converged(reason) => write!(f, "converged ({:?})", reason),
            MinimizerStatus::MaxIterations => f.write_str("iteration limit reached"),
            MinimizerStatus::Stalled => f.write_str("stalled"),
        }
    }
}

/// Result of a minimizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerReport {
    pub status: MinimizerStatus,
    pub iterations: usize,
    /// Objective value at the returned parameters.
    pub value: f64,
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

pub(crate) fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m, v| m.max(v.abs()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// `Σ_i (i + 1) (x_i - c_i)²`
    pub struct Quadratic {
        pub center: Vec<f64>,
        pub evaluations: usize,
    }

    impl Quadratic {
        pub fn new(center: Vec<f64>) -> Self {
            Self {
                center,
                evaluations: 0,
            }
        }
    }

    impl Problem for Quadratic {
        fn size(&self) -> usize {
            self.center.len()
        }

        fn f(&mut self, x: &[f64]) -> Result<f64> {
            self.evaluations += 1;
            Ok(x
                .iter()
                .zip(&self.center)
                .enumerate()
                .map(|(i, (x, c))| (i + 1) as f64 * (x - c).powi(2))
                .sum())
        }

        fn fdf(&mut self, x: &[f64], g: &mut [f64]) -> Result<f64> {
            for (i, ((g, x), c)) in g.iter_mut().zip(x).zip(&self.center).enumerate() {
                *g = 2.0 * (i + 1) as f64 * (x - c);
            }
            self.f(x)
        }
    }

    /// `(1 - x)² + 100 (y - x²)²`
    pub struct Rosenbrock;

    impl Problem for Rosenbrock {
        fn size(&self) -> usize {
            2
        }

        fn f(&mut self, x: &[f64]) -> Result<f64> {
            Ok((1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2))
        }

        fn fdf(&mut self, x: &[f64], g: &mut [f64]) -> Result<f64> {
            let t = x[1] - x[0] * x[0];
            g[0] = -2.0 * (1.0 - x[0]) - 400.0 * x[0] * t;
            g[1] = 200.0 * t;
            self.f(x)
        }
    }

    #[test]
    fn test_quadratic_gradient() {
        let mut q = Quadratic::new(vec![1.0, -2.0]);
        let mut g = [0.0; 2];
        let f = q.fdf(&[0.0, 0.0], &mut g).unwrap();
        assert_eq!(f, 1.0 + 2.0 * 4.0);
        assert_eq!(g, [-2.0, 8.0]);
        let mut r = Rosenbrock;
        assert_eq!(r.fdf(&[1.0, 1.0], &mut g).unwrap(), 0.0);
        assert_eq!(g, [0.0, 0.0]);
    }
}
