//! Smoothness penalties on spline coefficient grids.
//!
//! A penalty is owned by a [`SplineTransform`](super::SplineTransform) and
//! re-initialized every time the coefficient grid or the image range
//! changes.

use std::fmt;

use crate::error::Result;
use crate::interpolation::SharedKernel;
use crate::spatial::Vector;

/// Energy penalty evaluated directly on spline coefficients.
///
/// Implementations provide the unweighted energy through `do_value` and
/// `do_value_and_gradient`; the provided methods apply the weight.
pub trait SplinePenalty<const D: usize>: Send + Sync + fmt::Debug {
    /// Prepare for a coefficient grid.
    ///
    /// # Arguments
    /// * `coeff_size` - Size of the coefficient grid
    /// * `range` - Size of the image domain the grid covers
    /// * `kernel` - Basis kernel of the transformation
    fn initialize(&mut self, coeff_size: [usize; D], range: [f64; D], kernel: &SharedKernel) -> Result<()>;

    /// Weight applied to the energy.
    fn weight(&self) -> f64;

    /// Whether the energy is normalized by the image domain size.
    fn normalize(&self) -> bool {
        false
    }

    /// Unweighted energy.
    fn do_value(&self, coefficients: &[Vector<D>]) -> f64;

    /// Unweighted energy and its gradient, interleaved per control point.
    /// The gradient buffer is overwritten.
    fn do_value_and_gradient(&self, coefficients: &[Vector<D>], gradient: &mut [f64]) -> f64;

    /// Clone into a box.
    fn clone_box(&self) -> Box<dyn SplinePenalty<D>>;

    /// Weighted energy.
    fn value(&self, coefficients: &[Vector<D>]) -> f64 {
        self.weight() * self.do_value(coefficients)
    }

    /// Weighted energy and gradient. The gradient buffer is overwritten.
    fn value_and_gradient(&self, coefficients: &[Vector<D>], gradient: &mut [f64]) -> f64 {
        let value = self.do_value_and_gradient(coefficients, gradient);
        let weight = self.weight();
        gradient.iter_mut().for_each(|g| *g *= weight);
        weight * value
    }
}

impl<const D: usize> Clone for Box<dyn SplinePenalty<D>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::SplineKernel;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    /// Energy `Σ_k Σ_d s_d c_k[d]` with `s = range / size`.
    #[derive(Debug, Clone)]
    struct ScaledSum {
        weight: f64,
        scale: [f64; 2],
    }

    impl SplinePenalty<2> for ScaledSum {
        fn initialize(&mut self, coeff_size: [usize; 2], range: [f64; 2], _kernel: &SharedKernel) -> Result<()> {
            self.scale = [range[0] / coeff_size[0] as f64, range[1] / coeff_size[1] as f64];
            Ok(())
        }

        fn weight(&self) -> f64 {
            self.weight
        }

        fn do_value(&self, coefficients: &[Vector<2>]) -> f64 {
            coefficients
                .iter()
                .map(|c| self.scale[0] * c[0] + self.scale[1] * c[1])
                .sum()
        }

        fn do_value_and_gradient(&self, coefficients: &[Vector<2>], gradient: &mut [f64]) -> f64 {
            for (g, c) in gradient.chunks_exact_mut(2).zip(coefficients) {
                g[0] = self.scale[0] * c[0];
                g[1] = self.scale[1] * c[1];
            }
            self.do_value(coefficients)
        }

        fn clone_box(&self) -> Box<dyn SplinePenalty<2>> {
            Box::new(self.clone())
        }
    }

    fn kernel() -> SharedKernel {
        Arc::new(SplineKernel::bspline(2).unwrap())
    }

    #[test]
    fn test_single_point() {
        let mut penalty = ScaledSum { weight: 1.0, scale: [1.0; 2] };
        penalty.initialize([1, 1], [1.5, 2.9], &kernel()).unwrap();
        let c = [Vector::<2>::new(1.0 / 1.5, 1.0 / 2.9)];
        let mut g = [0.0; 2];
        assert_abs_diff_eq!(penalty.value(&c), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(penalty.value_and_gradient(&c, &mut g), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[1], 1.0, epsilon = 1e-12);

        penalty.weight = 0.5;
        assert_abs_diff_eq!(penalty.value_and_gradient(&c, &mut g), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(g[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_grid() {
        let mut penalty: Box<dyn SplinePenalty<2>> = Box::new(ScaledSum { weight: 0.5, scale: [1.0; 2] });
        penalty.initialize([2, 3], [2.0, 3.0], &kernel()).unwrap();
        let c: Vec<Vector<2>> = (0..3)
            .flat_map(|y| (0..2).map(move |x| Vector::<2>::new(x as f64, y as f64)))
            .collect();
        let copy = penalty.clone();
        let mut g = vec![0.0; 12];
        assert_abs_diff_eq!(copy.value_and_gradient(&c, &mut g), 4.5, epsilon = 1e-12);
        let expected = [0.0, 0.0, 0.5, 0.0, 0.0, 0.5, 0.5, 0.5, 0.0, 1.0, 0.5, 1.0];
        for (a, b) in g.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }
}
