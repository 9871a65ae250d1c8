//! Divergence-curl smoothness penalty for spline transformations.
//!
//! The energy
//!
//! ```text
//! E(u) = ∫ wd |∇ div u|² + wr ½ Σ_ab |∇ (∂_a u_b - ∂_b u_a)|² dx
//! ```
//!
//! is a quadratic form in the spline coefficients, `E = Σ_kl c_kᵀ Q(k,l) c_l`.
//! Each block `Q(k,l)` is a sum of products of one-dimensional overlap
//! integrals `∫ β^(o1)(ξ - k) β^(o2)(ξ - l) dξ`, which are tabulated per axis
//! once per coefficient grid.
//!
//! # Reference
//! Suter, "Motion estimation and vector splines", CVPR 1994.

use nalgebra::SMatrix;
use rayon::prelude::*;
use tracing::debug;
use warpkit_core::image::grid::{self, GridIter};
use warpkit_core::{CoreError, SharedKernel, SplinePenalty, Vector};

/// Derivative orders per table entry: 0, 1 and 2.
const ORDERS: usize = 3;

/// Overlap integrals of one axis.
///
/// Rows whose basis support lies inside the integration domain share one
/// class; every other row gets its own.
#[derive(Debug, Clone)]
struct AxisIntegrals {
    support: usize,
    row_class: Vec<usize>,
    classes: Vec<Vec<f64>>,
}

impl AxisIntegrals {
    fn build(kernel: &SharedKernel, csize: usize, scale: f64, shift: usize) -> Self {
        let support = kernel.size();
        let lo = shift as f64;
        let hi = (csize - 1 - shift) as f64;
        let radius = 0.5 * support as f64;
        let is_interior = |k: usize| k as f64 - radius >= lo && k as f64 + radius <= hi;

        let mut row_class = vec![0; csize];
        let mut classes = Vec::new();
        let mut interior_class = None;
        for (k, class) in row_class.iter_mut().enumerate() {
            if is_interior(k) {
                if let Some(c) = interior_class {
                    *class = c;
                    continue;
                }
                interior_class = Some(classes.len());
            }
            *class = classes.len();
            classes.push(Self::row(kernel, k, lo, hi, scale, support));
        }
        Self {
            support,
            row_class,
            classes,
        }
    }

    fn row(kernel: &SharedKernel, k: usize, lo: f64, hi: f64, scale: f64, support: usize) -> Vec<f64> {
        let width = 2 * support - 1;
        let mut row = vec![0.0; width * ORDERS * ORDERS];
        for delta in 0..width {
            let l = k as f64 + delta as f64 - (support - 1) as f64;
            for o1 in 0..ORDERS {
                for o2 in 0..ORDERS {
                    let factor = scale.powi((o1 + o2) as i32) / scale;
                    row[(delta * ORDERS + o1) * ORDERS + o2] =
                        kernel.integrate(lo, hi, k as f64, l, o1, o2) * factor;
                }
            }
        }
        row
    }

    /// Table of all order pairs for the rows `k` and `l`, or `None` when
    /// their supports do not overlap.
    #[inline]
    fn orders(&self, k: usize, l: usize) -> Option<&[f64]> {
        let delta = l as isize - k as isize + (self.support as isize - 1);
        if delta < 0 || delta as usize >= 2 * self.support - 1 {
            return None;
        }
        let class = &self.classes[self.row_class[k]];
        let start = delta as usize * ORDERS * ORDERS;
        Some(&class[start..start + ORDERS * ORDERS])
    }
}

/// One contribution `factor · Π_d T_d[a_d][b_d]` to entry `(row, col)`.
#[derive(Debug, Clone, Copy)]
struct Term<const D: usize> {
    row: usize,
    col: usize,
    factor: f64,
    a: [usize; D],
    b: [usize; D],
}

/// Derivative orders per axis of `∂_p ∂_a`.
fn second_derivative<const D: usize>(p: usize, a: usize) -> [usize; D] {
    std::array::from_fn(|d| (d == p) as usize + (d == a) as usize)
}

fn build_terms<const D: usize>(div: f64, curl: f64) -> Vec<Term<D>> {
    let mut terms = Vec::new();
    for p in 0..D {
        for a in 0..D {
            for b in 0..D {
                let oa = second_derivative::<D>(p, a);
                let ob = second_derivative::<D>(p, b);
                if div != 0.0 {
                    terms.push(Term { row: a, col: b, factor: div, a: oa, b: ob });
                }
                if curl != 0.0 {
                    terms.push(Term { row: b, col: a, factor: -curl, a: oa, b: ob });
                    if a == b {
                        for r in 0..D {
                            terms.push(Term { row: r, col: r, factor: curl, a: oa, b: ob });
                        }
                    }
                }
            }
        }
    }
    terms
}

#[derive(Debug, Clone)]
struct Prepared<const D: usize> {
    size: [usize; D],
    axes: Vec<AxisIntegrals>,
    norm_factor: f64,
}

/// Divergence and curl penalty on a spline coefficient grid.
#[derive(Debug, Clone)]
pub struct DivCurlPenalty<const D: usize> {
    div: f64,
    curl: f64,
    weight: f64,
    normalize: bool,
    terms: Vec<Term<D>>,
    prepared: Option<Prepared<D>>,
}

impl<const D: usize> DivCurlPenalty<D> {
    /// Create a penalty.
    ///
    /// # Arguments
    /// * `div` - Weight of the divergence gradient energy
    /// * `curl` - Weight of the curl gradient energy
    /// * `weight` - Overall weight of the penalty
    /// * `normalize` - Divide the energy by the image domain size
    ///
    /// # Errors
    /// `InvalidArgument` for negative or non-finite weights.
    pub fn new(div: f64, curl: f64, weight: f64, normalize: bool) -> Result<Self, CoreError> {
        for (name, value) in [("div", div), ("curl", curl), ("weight", weight)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CoreError::invalid_argument(format!(
                    "divcurl {} weight must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(Self {
            div,
            curl,
            weight,
            normalize,
            terms: build_terms(div, curl),
            prepared: None,
        })
    }

    pub fn div(&self) -> f64 {
        self.div
    }

    pub fn curl(&self) -> f64 {
        self.curl
    }

    /// The `D x D` block `Q(k, l)` coupling two control points.
    ///
    /// Zero before initialization or for points out of each other's
    /// support.
    pub fn block(&self, k: [usize; D], l: [usize; D]) -> SMatrix<f64, D, D> {
        let mut q = SMatrix::<f64, D, D>::zeros();
        let Some(prepared) = &self.prepared else {
            return q;
        };
        let mut tables: [&[f64]; D] = [&[][..]; D];
        for d in 0..D {
            match prepared.axes[d].orders(k[d], l[d]) {
                Some(t) => tables[d] = t,
                None => return q,
            }
        }
        for term in &self.terms {
            let mut product = term.factor;
            for d in 0..D {
                product *= tables[d][term.a[d] * ORDERS + term.b[d]];
            }
            q[(term.row, term.col)] += product;
        }
        q
    }

    fn gradient_into(&self, prepared: &Prepared<D>, coefficients: &[Vector<D>], gradient: &mut [f64]) {
        let size = prepared.size;
        let strides = grid::strides(size);
        let reach: [usize; D] = std::array::from_fn(|d| prepared.axes[d].support - 1);
        gradient
            .par_chunks_mut(D)
            .enumerate()
            .for_each(|(index, g)| {
                let k = grid::coordinates(size, index);
                let lo: [usize; D] = std::array::from_fn(|d| k[d].saturating_sub(reach[d]));
                let extent: [usize; D] =
                    std::array::from_fn(|d| (k[d] + reach[d]).min(size[d] - 1) - lo[d] + 1);
                let mut sum = Vector::<D>::zeros();
                for offset in GridIter::new(extent) {
                    let l: [usize; D] = std::array::from_fn(|d| lo[d] + offset[d]);
                    let li: usize = (0..D).map(|d| l[d] * strides[d]).sum();
                    sum += self.block(k, l) * coefficients[li];
                }
                for d in 0..D {
                    g[d] = 2.0 * sum[d] * prepared.norm_factor;
                }
            });
    }
}

impl<const D: usize> SplinePenalty<D> for DivCurlPenalty<D> {
    fn initialize(
        &mut self,
        coeff_size: [usize; D],
        range: [f64; D],
        kernel: &SharedKernel,
    ) -> warpkit_core::Result<()> {
        if kernel.degree() < 2 {
            return Err(CoreError::invalid_argument(format!(
                "divcurl needs second derivatives, kernel '{}' has degree {}",
                kernel,
                kernel.degree()
            )));
        }
        let shift = kernel.active_halfrange() - 1;
        let mut axes = Vec::with_capacity(D);
        for d in 0..D {
            if coeff_size[d] < 2 * shift + 2 || range[d] < 2.0 {
                return Err(CoreError::invalid_argument(format!(
                    "divcurl cannot cover range {:?} with {:?} coefficients",
                    range, coeff_size
                )));
            }
            let scale = (coeff_size[d] - 1 - 2 * shift) as f64 / (range[d] - 1.0);
            axes.push(AxisIntegrals::build(kernel, coeff_size[d], scale, shift));
        }
        let norm_factor = if self.normalize {
            1.0 / range.iter().product::<f64>()
        } else {
            1.0
        };
        debug!(
            ?coeff_size,
            classes = ?axes.iter().map(|a| a.classes.len()).collect::<Vec<_>>(),
            "prepared divcurl integrals"
        );
        self.prepared = Some(Prepared {
            size: coeff_size,
            axes,
            norm_factor,
        });
        Ok(())
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn normalize(&self) -> bool {
        self.normalize
    }

    fn do_value(&self, coefficients: &[Vector<D>]) -> f64 {
        let mut gradient = vec![0.0; coefficients.len() * D];
        self.do_value_and_gradient(coefficients, &mut gradient)
    }

    fn do_value_and_gradient(&self, coefficients: &[Vector<D>], gradient: &mut [f64]) -> f64 {
        let Some(prepared) = &self.prepared else {
            gradient.iter_mut().for_each(|g| *g = 0.0);
            return 0.0;
        };
        self.gradient_into(prepared, coefficients, gradient);
        let dot: f64 = coefficients
            .iter()
            .zip(gradient.chunks_exact(D))
            .map(|(c, g)| (0..D).map(|d| c[d] * g[d]).sum::<f64>())
            .sum();
        0.5 * dot
    }

    fn clone_box(&self) -> Box<dyn SplinePenalty<D>> {
        Box::new(self.clone())
    }
}
