//! Spline basis kernels.
//!
//! A [`SplineKernel`] evaluates the weights of the `degree + 1` coefficients
//! that contribute to a continuous coordinate, together with their
//! derivatives. Kernels are immutable and shared through `Arc` between the
//! transformations, interpolators and penalties that use them.
//!
//! Supported kernels:
//! * B-splines of degree 0 to 5 (`bspline:d=N`)
//! * the cubic O-MOMS kernel (`omoms:d=3`)

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::factory::Descriptor;

/// Kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelFamily {
    BSpline,
    OMoms,
}

/// Spline basis kernel of a fixed degree.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineKernel {
    family: KernelFamily,
    degree: usize,
    poles: Vec<f64>,
    shift: f64,
}

/// Shared kernel handle.
pub type SharedKernel = Arc<SplineKernel>;

const GAUSS_NODES: [f64; 6] = [
    -0.932_469_514_203_152_1,
    -0.661_209_386_466_264_5,
    -0.238_619_186_083_196_9,
    0.238_619_186_083_196_9,
    0.661_209_386_466_264_5,
    0.932_469_514_203_152_1,
];
const GAUSS_WEIGHTS: [f64; 6] = [
    0.171_324_492_379_170_4,
    0.360_761_573_048_138_6,
    0.467_913_934_572_691_0,
    0.467_913_934_572_691_0,
    0.360_761_573_048_138_6,
    0.171_324_492_379_170_4,
];

impl SplineKernel {
    /// B-spline kernel of degree 0 to 5.
    ///
    /// # Errors
    /// `InvalidArgument` for other degrees.
    pub fn bspline(degree: usize) -> Result<Self> {
        let poles = match degree {
            0 | 1 => Vec::new(),
            2 => vec![8f64.sqrt() - 3.0],
            3 => vec![3f64.sqrt() - 2.0],
            4 => vec![
                (664.0 - 438_976f64.sqrt()).sqrt() + 304f64.sqrt() - 19.0,
                (664.0 + 438_976f64.sqrt()).sqrt() - 304f64.sqrt() - 19.0,
            ],
            5 => vec![
                0.5 * ((270.0 - 70_980f64.sqrt()).sqrt() + 105f64.sqrt() - 13.0),
                0.5 * ((270.0 + 70_980f64.sqrt()).sqrt() - 105f64.sqrt() - 13.0),
            ],
            _ => {
                return Err(CoreError::invalid_argument(format!(
                    "B-spline degree must be in 0..=5, got {}",
                    degree
                )))
            }
        };
        Ok(Self {
            family: KernelFamily::BSpline,
            degree,
            poles,
            shift: if degree % 2 == 0 { 0.5 } else { 0.0 },
        })
    }

    /// Cubic O-MOMS kernel.
    pub fn omoms3() -> Self {
        Self {
            family: KernelFamily::OMoms,
            degree: 3,
            poles: vec![(105f64.sqrt() - 13.0) / 8.0],
            shift: 0.0,
        }
    }

    /// Build a kernel from a `bspline:d=N` or `omoms:d=3` descriptor.
    pub fn from_descriptor(mut descriptor: Descriptor) -> Result<Self> {
        let kernel = match descriptor.name() {
            "bspline" => Self::bspline(descriptor.take_usize_in("d", 3, 0, 5)?)?,
            "omoms" => {
                descriptor.take_usize_in("d", 3, 3, 3)?;
                Self::omoms3()
            }
            other => {
                return Err(CoreError::descriptor(
                    descriptor.source(),
                    format!("unknown spline kernel '{}'", other),
                ))
            }
        };
        descriptor.finish()?;
        Ok(kernel)
    }

    /// Parse a kernel descriptor string.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_descriptor(Descriptor::parse(text)?)
    }

    pub fn family(&self) -> KernelFamily {
        self.family
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of coefficients that contribute to one coordinate.
    pub fn size(&self) -> usize {
        self.degree + 1
    }

    /// Poles of the interpolation prefilter.
    pub fn poles(&self) -> &[f64] {
        &self.poles
    }

    /// Whether samples can be used as coefficients without prefiltering.
    pub fn is_interpolating(&self) -> bool {
        self.poles.is_empty()
    }

    /// Half of the coefficient range that is active around a point.
    pub fn active_halfrange(&self) -> usize {
        (self.size() + 1) / 2
    }

    /// First coefficient index that contributes to `x`.
    #[inline]
    pub fn start_index(&self, x: f64) -> isize {
        (x + self.shift).floor() as isize - (self.degree / 2) as isize
    }

    /// Evaluate the weights of all coefficients that contribute to `x`.
    ///
    /// # Arguments
    /// * `x` - Continuous coefficient coordinate
    /// * `order` - Derivative order (0, 1 or 2)
    /// * `weights` - Output, at least `size()` long
    ///
    /// # Returns
    /// The index of the coefficient `weights[0]` belongs to
    pub fn weights(&self, x: f64, order: usize, weights: &mut [f64]) -> isize {
        let start = self.start_index(x);
        if order == 0 && self.fill_value_weights(x - (x + self.shift).floor(), weights) {
            return start;
        }
        for (i, w) in weights.iter_mut().take(self.size()).enumerate() {
            *w = self.weight_at(x - (start + i as isize) as f64, order);
        }
        start
    }

    fn fill_value_weights(&self, f: f64, w: &mut [f64]) -> bool {
        match (self.family, self.degree) {
            (KernelFamily::BSpline, 0) => w[0] = 1.0,
            (KernelFamily::BSpline, 1) => {
                w[0] = 1.0 - f;
                w[1] = f;
            }
            (KernelFamily::BSpline, 2) => {
                w[1] = 0.75 - f * f;
                w[2] = 0.5 * (f - w[1] + 1.0);
                w[0] = 1.0 - w[1] - w[2];
            }
            (KernelFamily::BSpline, 3) => {
                let a = f * f * f / 6.0;
                let omf = 1.0 - f;
                let b = omf * omf * omf / 6.0;
                w[0] = b;
                w[1] = omf - 2.0 * b + a;
                w[2] = f - 2.0 * a + b;
                w[3] = a;
            }
            (KernelFamily::OMoms, 3) => {
                let f2 = f * f;
                let f3 = f2 * f;
                w[1] = 0.5 * f3 - f2 + f / 14.0 + 13.0 / 21.0;
                w[2] = -0.5 * f3 + 0.5 * f2 + 3.0 * f / 7.0 + 4.0 / 21.0;
                w[3] = f3 / 6.0 + f / 42.0;
                w[0] = 1.0 - w[1] - w[2] - w[3];
            }
            _ => return false,
        }
        true
    }

    /// Centered basis function (or derivative) at offset `x`.
    pub fn weight_at(&self, x: f64, order: usize) -> f64 {
        match self.family {
            KernelFamily::BSpline => bspline_value(self.degree, x, order),
            KernelFamily::OMoms => {
                bspline_value(3, x, order) + bspline_value(3, x, order + 2) / 42.0
            }
        }
    }

    /// Integral of a product of two shifted basis derivatives.
    ///
    /// Computes `∫_lo^hi β^(o1)(x - k1) β^(o2)(x - k2) dx` exactly: the
    /// interval is split at every half-integer knot so each piece is a
    /// polynomial of degree at most `2 * degree`.
    pub fn integrate(&self, lo: f64, hi: f64, k1: f64, k2: f64, o1: usize, o2: usize) -> f64 {
        let radius = 0.5 * self.size() as f64;
        let lo = lo.max(k1 - radius).max(k2 - radius);
        let hi = hi.min(k1 + radius).min(k2 + radius);
        if hi <= lo {
            return 0.0;
        }
        let mut breaks = vec![lo];
        let mut knot = (2.0 * lo).floor() / 2.0 + 0.5;
        while knot < hi {
            if knot > lo {
                breaks.push(knot);
            }
            knot += 0.5;
        }
        breaks.push(hi);

        breaks
            .windows(2)
            .map(|piece| {
                let half = 0.5 * (piece[1] - piece[0]);
                let mid = 0.5 * (piece[1] + piece[0]);
                GAUSS_NODES
                    .iter()
                    .zip(GAUSS_WEIGHTS.iter())
                    .map(|(&t, &w)| {
                        let x = mid + half * t;
                        w * self.weight_at(x - k1, o1) * self.weight_at(x - k2, o2)
                    })
                    .sum::<f64>()
                    * half
            })
            .sum()
    }
}

impl fmt::Display for SplineKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            KernelFamily::BSpline => write!(f, "bspline:d={}", self.degree),
            KernelFamily::OMoms => write!(f, "omoms:d={}", self.degree),
        }
    }
}

/// Centered B-spline of degree `n` (or its derivative) by truncated powers.
fn bspline_value(n: usize, x: f64, order: usize) -> f64 {
    if order > n {
        return 0.0;
    }
    let half = 0.5 * (n + 1) as f64;
    if n == 0 {
        return if (-0.5..0.5).contains(&x) { 1.0 } else { 0.0 };
    }
    if x <= -half || x >= half {
        return 0.0;
    }
    let m = n - order;
    let mut sum = 0.0;
    let mut binom = 1.0;
    for k in 0..=n + 1 {
        let t = x + half - k as f64;
        if t >= 0.0 {
            let term = if m == 0 { 1.0 } else { t.powi(m as i32) };
            sum += if k % 2 == 0 { binom * term } else { -binom * term };
        }
        binom = binom * (n + 1 - k) as f64 / (k + 1) as f64;
    }
    sum / factorial(m)
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn all_kernels() -> Vec<SplineKernel> {
        let mut kernels: Vec<_> = (0..=5).map(|d| SplineKernel::bspline(d).unwrap()).collect();
        kernels.push(SplineKernel::omoms3());
        kernels
    }

    #[test]
    fn test_explicit_weights_match_truncated_powers() {
        for kernel in all_kernels() {
            let mut fast = vec![0.0; kernel.size()];
            for step in 0..40 {
                let x = 3.0 + step as f64 * 0.0731;
                let start = kernel.weights(x, 0, &mut fast);
                for (i, &w) in fast.iter().enumerate() {
                    let slow = kernel.weight_at(x - (start + i as isize) as f64, 0);
                    assert_abs_diff_eq!(w, slow, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_cubic_values() {
        let k = SplineKernel::bspline(3).unwrap();
        assert_abs_diff_eq!(k.weight_at(0.0, 0), 2.0 / 3.0, epsilon = 1e-14);
        assert_abs_diff_eq!(k.weight_at(1.0, 0), 1.0 / 6.0, epsilon = 1e-14);
        assert_abs_diff_eq!(k.weight_at(0.5, 0), 23.0 / 48.0, epsilon = 1e-14);
        assert_abs_diff_eq!(k.weight_at(0.0, 2), -2.0, epsilon = 1e-14);
        assert_eq!(k.weight_at(2.0, 0), 0.0);
    }

    #[test]
    fn test_start_index() {
        let cubic = SplineKernel::bspline(3).unwrap();
        assert_eq!(cubic.start_index(2.3), 1);
        let quadratic = SplineKernel::bspline(2).unwrap();
        assert_eq!(quadratic.start_index(2.3), 1);
        assert_eq!(quadratic.start_index(2.6), 2);
    }

    #[test]
    fn test_omoms_interpolation_condition() {
        let k = SplineKernel::omoms3();
        assert_abs_diff_eq!(k.weight_at(0.0, 0), 13.0 / 21.0, epsilon = 1e-14);
        assert_abs_diff_eq!(k.weight_at(1.0, 0), 4.0 / 21.0, epsilon = 1e-14);
    }

    #[test]
    fn test_integrate_cubic_products() {
        let k = SplineKernel::bspline(3).unwrap();
        // ∫ β3(x)^2 dx = β7(0) = 151/315
        assert_abs_diff_eq!(k.integrate(-10.0, 10.0, 0.0, 0.0, 0, 0), 151.0 / 315.0, epsilon = 1e-12);
        // ∫ β3'(x)^2 dx = -β7''(0) = 2/3
        assert_abs_diff_eq!(k.integrate(-10.0, 10.0, 0.0, 0.0, 1, 1), 2.0 / 3.0, epsilon = 1e-12);
        // ∫ β3''(x)^2 dx = β7''''(0) = 8/3
        assert_abs_diff_eq!(k.integrate(-10.0, 10.0, 3.0, 3.0, 2, 2), 8.0 / 3.0, epsilon = 1e-12);
        assert_eq!(k.integrate(-10.0, 10.0, 0.0, 4.0, 0, 0), 0.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!(SplineKernel::parse("bspline:d=2").unwrap().degree(), 2);
        assert_eq!(SplineKernel::parse("omoms:d=3").unwrap().family(), KernelFamily::OMoms);
        assert!(SplineKernel::parse("bspline:d=6").is_err());
        assert!(SplineKernel::parse("omoms:d=2").is_err());
        assert!(SplineKernel::parse("catmull").is_err());
        assert_eq!(SplineKernel::bspline(4).unwrap().to_string(), "bspline:d=4");
    }
}
