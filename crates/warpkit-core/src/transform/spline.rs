//! Spline transformation.
//!
//! The displacement is a tensor-product spline over a regular grid of
//! control points (coefficients):
//!
//! ```text
//! u(x) = Σ_k c_k Π_d β(ξ_d(x) - k_d),   ξ_d(x) = x_d * scale_d + shift
//! ```
//!
//! The grid extends `shift` coefficients beyond the image on every side so
//! that border pixels see a full kernel support. The per-axis weight and
//! index tables for all pixel coordinates are computed when the grid is
//! built and never change afterwards, which keeps every evaluation
//! `&self`-only and safe to share between threads.

use std::fmt;

use rayon::prelude::*;
use tracing::debug;

use super::penalty::SplinePenalty;
use super::trait_::Transform;
use crate::error::{CoreError, Result};
use crate::image::{grid, FVector, VectorField};
use crate::interpolation::bspline::{for_each_tap, AxisTaps};
use crate::interpolation::{prefilter, BoundaryCondition, BoundaryKind, SharedKernel};
use crate::spatial::{Jacobian, Vector};

/// Kernel weights for a list of positions along one axis.
#[derive(Debug, Clone)]
struct AxisTable {
    support: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl AxisTable {
    /// Tabulate the kernel at the coefficient coordinates `positions`.
    fn build(kernel: &SharedKernel, bc: &BoundaryCondition, positions: impl Iterator<Item = f64>) -> Self {
        let support = kernel.size();
        let mut table = Self {
            support,
            indices: Vec::new(),
            values: Vec::new(),
        };
        for xi in positions {
            let value = AxisTaps::new(kernel, bc, xi, 0);
            table.indices.extend_from_slice(&value.indices[..support]);
            table.values.extend_from_slice(&value.weights[..support]);
        }
        table
    }

    fn len(&self) -> usize {
        self.indices.len() / self.support
    }
}

/// Sum coefficients along one axis: `out[p] = Σ_m w[p][m] in[idx[p][m]]`.
fn forward_pass<const D: usize>(
    input: &[Vector<D>],
    shape: [usize; D],
    axis: usize,
    table: &AxisTable,
    weights: &[f64],
) -> Vec<Vector<D>> {
    let stride: usize = shape[..axis].iter().product();
    let n_in = shape[axis];
    let n_out = table.len();
    let outer: usize = shape[axis + 1..].iter().product();
    let support = table.support;

    let mut out = vec![Vector::<D>::zeros(); stride * n_out * outer];
    out.par_chunks_mut(stride * n_out)
        .enumerate()
        .for_each(|(o, chunk)| {
            let base = o * stride * n_in;
            for p in 0..n_out {
                let dst = &mut chunk[p * stride..(p + 1) * stride];
                for m in 0..support {
                    let w = weights[p * support + m];
                    if w == 0.0 {
                        continue;
                    }
                    let k = table.indices[p * support + m];
                    let src = &input[base + k * stride..base + (k + 1) * stride];
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s * w;
                    }
                }
            }
        });
    out
}

/// Adjoint of [`forward_pass`]: scatter `in[p]` back onto `n_out` coefficients.
fn adjoint_pass<const D: usize>(
    input: &[Vector<D>],
    shape: [usize; D],
    axis: usize,
    table: &AxisTable,
    n_out: usize,
) -> Vec<Vector<D>> {
    let stride: usize = shape[..axis].iter().product();
    let n_in = shape[axis];
    let outer: usize = shape[axis + 1..].iter().product();
    let support = table.support;

    let mut out = vec![Vector::<D>::zeros(); stride * n_out * outer];
    out.par_chunks_mut(stride * n_out)
        .enumerate()
        .for_each(|(o, chunk)| {
            let base = o * stride * n_in;
            for p in 0..n_in {
                let src = &input[base + p * stride..base + (p + 1) * stride];
                for m in 0..support {
                    let w = table.values[p * support + m];
                    if w == 0.0 {
                        continue;
                    }
                    let k = table.indices[p * support + m];
                    let dst = &mut chunk[k * stride..(k + 1) * stride];
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += s * w;
                    }
                }
            }
        });
    out
}

/// Tensor-product spline displacement model.
pub struct SplineTransform<const D: usize> {
    range: [usize; D],
    target_rate: [f64; D],
    kernel: SharedKernel,
    boundary: BoundaryKind,
    shift: usize,
    csize: [usize; D],
    scale: [f64; D],
    coefficients: Vec<Vector<D>>,
    boundaries: [BoundaryCondition; D],
    tables: Vec<AxisTable>,
    penalty: Option<Box<dyn SplinePenalty<D>>>,
}

impl<const D: usize> SplineTransform<D> {
    /// Create an identity transformation.
    ///
    /// # Arguments
    /// * `range` - Image size the transformation is defined on
    /// * `rate` - Target distance between control points, in pixels
    /// * `kernel` - Basis kernel
    /// * `boundary` - Boundary condition of the coefficient grid
    ///
    /// # Errors
    /// `InvalidArgument` if an axis has fewer than 2 pixels, a rate is below
    /// 1 or the boundary condition does not support the kernel.
    pub fn new(
        range: [usize; D],
        rate: [f64; D],
        kernel: SharedKernel,
        boundary: BoundaryKind,
    ) -> Result<Self> {
        if range.iter().any(|&r| r < 2) {
            return Err(CoreError::invalid_argument(format!(
                "spline transformation needs at least 2 pixels per axis, got {:?}",
                range
            )));
        }
        if rate.iter().any(|&r| !r.is_finite() || r < 1.0) {
            return Err(CoreError::invalid_argument(format!(
                "coefficient rate must be >= 1, got {:?}",
                rate
            )));
        }
        boundary.ensure_supports(&kernel)?;

        let shift = kernel.active_halfrange() - 1;
        let csize = Self::required_coeff_size(range, rate, &kernel);
        let coefficients = vec![Vector::<D>::zeros(); grid::num_elements(csize)];
        Self::assemble(range, rate, kernel, boundary, shift, csize, coefficients, None)
    }

    /// Create a transformation with given coefficients on a given grid.
    ///
    /// # Errors
    /// As [`new`](Self::new), plus `DimensionMismatch` when the coefficient
    /// count does not match `coeff_size`.
    pub fn with_coefficients(
        range: [usize; D],
        rate: [f64; D],
        kernel: SharedKernel,
        boundary: BoundaryKind,
        coeff_size: [usize; D],
        coefficients: Vec<Vector<D>>,
    ) -> Result<Self> {
        let base = Self::new(range, rate, kernel, boundary)?;
        if coefficients.len() != grid::num_elements(coeff_size) {
            return Err(CoreError::dimension_mismatch(format!(
                "coefficient grid {:?} needs {} vectors, got {}",
                coeff_size,
                grid::num_elements(coeff_size),
                coefficients.len()
            )));
        }
        let enlarge = 2 * base.shift;
        if coeff_size.iter().any(|&c| c < base.kernel.size() || c < enlarge + 2) {
            return Err(CoreError::invalid_argument(format!(
                "coefficient grid {:?} is smaller than the kernel support",
                coeff_size
            )));
        }
        Self::assemble(
            range,
            rate,
            base.kernel,
            boundary,
            base.shift,
            coeff_size,
            coefficients,
            None,
        )
    }

    /// Attach a smoothness penalty. The penalty is initialized for the
    /// current grid.
    pub fn with_penalty(mut self, mut penalty: Box<dyn SplinePenalty<D>>) -> Result<Self> {
        penalty.initialize(self.csize, self.range_f64(), &self.kernel)?;
        self.penalty = Some(penalty);
        Ok(self)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        range: [usize; D],
        target_rate: [f64; D],
        kernel: SharedKernel,
        boundary: BoundaryKind,
        shift: usize,
        csize: [usize; D],
        coefficients: Vec<Vector<D>>,
        penalty: Option<Box<dyn SplinePenalty<D>>>,
    ) -> Result<Self> {
        let enlarge = 2 * shift;
        let scale: [f64; D] =
            std::array::from_fn(|d| (csize[d] - 1 - enlarge) as f64 / (range[d] - 1) as f64);

        let mut boundaries = [BoundaryCondition::new(boundary, 1)?; D];
        let mut tables = Vec::with_capacity(D);
        for d in 0..D {
            boundaries[d] = BoundaryCondition::new(boundary, csize[d])?;
            let positions = (0..range[d]).map(|x| x as f64 * scale[d] + shift as f64);
            tables.push(AxisTable::build(&kernel, &boundaries[d], positions));
        }

        let mut transform = Self {
            range,
            target_rate,
            kernel,
            boundary,
            shift,
            csize,
            scale,
            coefficients,
            boundaries,
            tables,
            penalty: None,
        };
        if let Some(mut penalty) = penalty {
            penalty.initialize(csize, transform.range_f64(), &transform.kernel)?;
            transform.penalty = Some(penalty);
        }
        Ok(transform)
    }

    fn required_coeff_size(range: [usize; D], rate: [f64; D], kernel: &SharedKernel) -> [usize; D] {
        let enlarge = 2 * (kernel.active_halfrange() - 1);
        std::array::from_fn(|d| {
            let inner = ((range[d] as f64 + rate[d] - 1.0) / rate[d]).floor() as usize;
            (inner + enlarge).max(kernel.size()).max(enlarge + 2)
        })
    }

    fn range_f64(&self) -> [f64; D] {
        std::array::from_fn(|d| self.range[d] as f64)
    }

    pub fn kernel(&self) -> &SharedKernel {
        &self.kernel
    }

    pub fn boundary(&self) -> BoundaryKind {
        self.boundary
    }

    /// Image size the transformation covers.
    pub fn range(&self) -> [usize; D] {
        self.range
    }

    /// Target control point distance in pixels.
    pub fn target_rate(&self) -> [f64; D] {
        self.target_rate
    }

    /// Size of the coefficient grid.
    pub fn coefficient_size(&self) -> [usize; D] {
        self.csize
    }

    /// Pixel-to-coefficient scale per axis.
    pub fn scale(&self) -> [f64; D] {
        self.scale
    }

    /// Offset between pixel 0 and coefficient 0.
    pub fn shift(&self) -> usize {
        self.shift
    }

    pub fn coefficients(&self) -> &[Vector<D>] {
        &self.coefficients
    }

    pub fn penalty(&self) -> Option<&dyn SplinePenalty<D>> {
        self.penalty.as_deref()
    }

    /// Number of scalar parameters.
    pub fn degrees_of_freedom(&self) -> usize {
        self.coefficients.len() * D
    }

    /// Reset to the identity.
    pub fn set_identity(&mut self) {
        self.coefficients
            .iter_mut()
            .for_each(|c| *c = Vector::<D>::zeros());
    }

    /// Largest coefficient norm.
    pub fn max_coefficient_norm(&self) -> f64 {
        self.coefficients.iter().map(|c| c.norm()).fold(0.0, f64::max)
    }

    /// Coefficients as an interleaved parameter vector.
    pub fn get_parameters(&self) -> Vec<f64> {
        self.coefficients
            .iter()
            .flat_map(|c| c.iter().copied())
            .collect()
    }

    /// Set the coefficients from an interleaved parameter vector.
    ///
    /// # Errors
    /// `InvalidArgument` on a length mismatch.
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        if params.len() != self.degrees_of_freedom() {
            return Err(CoreError::invalid_argument(format!(
                "expected {} parameters, got {}",
                self.degrees_of_freedom(),
                params.len()
            )));
        }
        for (c, chunk) in self.coefficients.iter_mut().zip(params.chunks_exact(D)) {
            *c = Vector::<D>::from_column_slice(chunk);
        }
        Ok(())
    }

    /// Continuous coefficient coordinate of a pixel coordinate.
    #[inline]
    fn xi(&self, d: usize, x: f64) -> f64 {
        x * self.scale[d] + self.shift as f64
    }

    fn taps(&self, point: [f64; D], derivative_axis: Option<usize>) -> [AxisTaps; D] {
        std::array::from_fn(|d| {
            let order = usize::from(derivative_axis == Some(d));
            AxisTaps::new(&self.kernel, &self.boundaries[d], self.xi(d, point[d]), order)
        })
    }

    fn sum_taps(&self, taps: &[AxisTaps; D]) -> Vector<D> {
        let strides = grid::strides(self.csize);
        let mut sum = Vector::<D>::zeros();
        for_each_tap(taps, strides, |o, w| sum += self.coefficients[o] * w);
        sum
    }

    /// Project a force field onto the coefficients.
    ///
    /// Computes `g_k = Σ_x w_k(x) f(x)`, the exact adjoint of
    /// [`displacement_field`](Transform::displacement_field). The result is
    /// written interleaved into `gradient`, overwriting it.
    ///
    /// # Errors
    /// `ShapeMismatch` when the field is not on the transformation grid,
    /// `InvalidArgument` when the gradient length is wrong.
    pub fn translate(&self, force: &VectorField<D>, gradient: &mut [f64]) -> Result<()> {
        if force.size() != self.range {
            return Err(CoreError::shape_mismatch(&self.range, &force.size()));
        }
        if gradient.len() != self.degrees_of_freedom() {
            return Err(CoreError::invalid_argument(format!(
                "gradient needs {} entries, got {}",
                self.degrees_of_freedom(),
                gradient.len()
            )));
        }
        let mut data: Vec<Vector<D>> = force
            .data()
            .par_iter()
            .map(|f| f.map(|v| v as f64))
            .collect();
        let mut shape = self.range;
        for axis in 0..D {
            data = adjoint_pass(&data, shape, axis, &self.tables[axis], self.csize[axis]);
            shape[axis] = self.csize[axis];
        }
        for (g, v) in gradient.chunks_exact_mut(D).zip(data.iter()) {
            g.copy_from_slice(v.as_slice());
        }
        Ok(())
    }

    /// Weighted penalty energy, zero without a penalty.
    pub fn penalty_value(&self) -> f64 {
        self.penalty
            .as_ref()
            .map_or(0.0, |p| p.value(&self.coefficients))
    }

    /// Weighted penalty energy and gradient. Without a penalty the gradient
    /// is zeroed.
    pub fn penalty_value_and_gradient(&self, gradient: &mut [f64]) -> f64 {
        match &self.penalty {
            Some(p) => p.value_and_gradient(&self.coefficients, gradient),
            None => {
                gradient.iter_mut().for_each(|g| *g = 0.0);
                0.0
            }
        }
    }

    /// Transfer the transformation to a new image size.
    ///
    /// The coefficient grid is kept and the coefficients are rescaled by
    /// `(new - 1) / (old - 1)` per axis, so the displacement is represented
    /// exactly in relative coordinates. Call [`refine`](Self::refine)
    /// afterwards to reach the target coefficient rate.
    pub fn upscale(&self, new_range: [usize; D]) -> Result<Self> {
        if new_range.iter().any(|&r| r < 2) {
            return Err(CoreError::invalid_argument(format!(
                "spline transformation needs at least 2 pixels per axis, got {:?}",
                new_range
            )));
        }
        let factor: Vector<D> = Vector::<D>::from_fn(|d, _| {
            (new_range[d] - 1) as f64 / (self.range[d] - 1) as f64
        });
        let coefficients = self
            .coefficients
            .iter()
            .map(|c| c.component_mul(&factor))
            .collect();
        debug!(from = ?self.range, to = ?new_range, "upscaling spline transformation");
        Self::assemble(
            new_range,
            self.target_rate,
            self.kernel.clone(),
            self.boundary,
            self.shift,
            self.csize,
            coefficients,
            self.penalty.clone(),
        )
    }

    /// Grow the coefficient grid to the target rate for the current range.
    ///
    /// The current displacement is sampled at the new control point
    /// positions and prefiltered, so the refined spline interpolates the
    /// old one there.
    ///
    /// # Returns
    /// `true` if the grid changed
    pub fn refine(&mut self) -> Result<bool> {
        let new_csize = Self::required_coeff_size(self.range, self.target_rate, &self.kernel);
        if new_csize == self.csize {
            return Ok(false);
        }
        let enlarge = 2 * self.shift;
        let shift = self.shift as f64;

        let mut data = self.coefficients.clone();
        let mut shape = self.csize;
        for axis in 0..D {
            let new_scale = (new_csize[axis] - 1 - enlarge) as f64 / (self.range[axis] - 1) as f64;
            let dx = self.scale[axis] / new_scale;
            let positions = (0..new_csize[axis]).map(|j| dx * (j as f64 - shift) + shift);
            let table = AxisTable::build(&self.kernel, &self.boundaries[axis], positions);
            data = forward_pass(&data, shape, axis, &table, &table.values);
            shape[axis] = new_csize[axis];
        }

        for component in 0..D {
            let mut line: Vec<f64> = data.iter().map(|v| v[component]).collect();
            prefilter(&mut line, new_csize, self.boundary, &self.kernel)?;
            for (v, c) in data.iter_mut().zip(line) {
                v[component] = c;
            }
        }

        debug!(from = ?self.csize, to = ?new_csize, "refining coefficient grid");
        *self = Self::assemble(
            self.range,
            self.target_rate,
            self.kernel.clone(),
            self.boundary,
            self.shift,
            new_csize,
            data,
            self.penalty.take(),
        )?;
        Ok(true)
    }
}

impl<const D: usize> Transform<D> for SplineTransform<D> {
    fn size(&self) -> [usize; D] {
        self.range
    }

    fn displacement_at(&self, point: [f64; D]) -> Vector<D> {
        self.sum_taps(&self.taps(point, None))
    }

    fn jacobian_at(&self, point: [f64; D]) -> Jacobian<D> {
        let mut jacobian = Jacobian::<D>::zeros();
        for j in 0..D {
            let column = self.sum_taps(&self.taps(point, Some(j))) * self.scale[j];
            jacobian.set_column(j, &column);
        }
        jacobian
    }

    fn displacement_field(&self) -> VectorField<D> {
        let mut data = self.coefficients.clone();
        let mut shape = self.csize;
        for axis in 0..D {
            let table = &self.tables[axis];
            data = forward_pass(&data, shape, axis, table, &table.values);
            shape[axis] = self.range[axis];
        }
        let field: Vec<FVector<D>> = data.par_iter().map(|v| v.map(|x| x as f32)).collect();
        VectorField::from_parts(self.range, field)
    }
}

impl<const D: usize> Clone for SplineTransform<D> {
    fn clone(&self) -> Self {
        Self {
            range: self.range,
            target_rate: self.target_rate,
            kernel: self.kernel.clone(),
            boundary: self.boundary,
            shift: self.shift,
            csize: self.csize,
            scale: self.scale,
            coefficients: self.coefficients.clone(),
            boundaries: self.boundaries,
            tables: self.tables.clone(),
            penalty: self.penalty.clone(),
        }
    }
}

impl<const D: usize> fmt::Debug for SplineTransform<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplineTransform")
            .field("range", &self.range)
            .field("coefficient_size", &self.csize)
            .field("kernel", &self.kernel.to_string())
            .field("boundary", &self.boundary)
            .field("penalty", &self.penalty)
            .finish()
    }
}
