//! Boundary conditions for spline coefficient grids.
//!
//! A boundary condition decides which coefficient an out-of-range index
//! refers to and provides the initial values of the recursive prefilter
//! that turns samples into spline coefficients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::kernel::SplineKernel;
use crate::error::{CoreError, Result};

/// Boundary handling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Reflect at the first and last sample.
    #[default]
    Mirror,
    /// Treat everything outside as zero.
    Zero,
    /// Repeat the edge sample.
    Repeat,
}

impl BoundaryKind {
    /// Whether this mode can prefilter coefficients for `kernel`.
    ///
    /// Zero and repeat only provide closed-form initial values for
    /// single-pole kernels.
    pub fn supports(&self, kernel: &SplineKernel) -> bool {
        match self {
            BoundaryKind::Mirror => true,
            BoundaryKind::Zero | BoundaryKind::Repeat => kernel.poles().len() <= 1,
        }
    }

    /// Like [`supports`](Self::supports) but as an error.
    pub fn ensure_supports(&self, kernel: &SplineKernel) -> Result<()> {
        if !self.supports(kernel) {
            return Err(CoreError::invalid_argument(format!(
                "boundary condition '{}' is not supported for kernel '{}' with {} poles",
                self,
                kernel,
                kernel.poles().len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoundaryKind::Mirror => "mirror",
            BoundaryKind::Zero => "zero",
            BoundaryKind::Repeat => "repeat",
        })
    }
}

impl FromStr for BoundaryKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mirror" => Ok(BoundaryKind::Mirror),
            "zero" => Ok(BoundaryKind::Zero),
            "repeat" => Ok(BoundaryKind::Repeat),
            other => Err(CoreError::invalid_argument(format!(
                "unknown boundary condition '{}'",
                other
            ))),
        }
    }
}

/// A boundary condition bound to one axis width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryCondition {
    kind: BoundaryKind,
    width: usize,
}

impl BoundaryCondition {
    /// # Errors
    /// `InvalidArgument` for a zero width.
    pub fn new(kind: BoundaryKind, width: usize) -> Result<Self> {
        if width == 0 {
            return Err(CoreError::invalid_argument("boundary width must be positive"));
        }
        Ok(Self { kind, width })
    }

    pub fn kind(&self) -> BoundaryKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Map a possibly out-of-range index into `0..width`.
    ///
    /// # Returns
    /// The mapped index and whether the coefficient contributes at all
    #[inline]
    pub fn map_index(&self, index: isize) -> (usize, bool) {
        let w = self.width as isize;
        if (0..w).contains(&index) {
            return (index as usize, true);
        }
        match self.kind {
            BoundaryKind::Mirror => {
                if w == 1 {
                    return (0, true);
                }
                let period = 2 * w - 2;
                let mut i = index.abs() % period;
                if i >= w {
                    i = period - i;
                }
                (i as usize, true)
            }
            BoundaryKind::Zero => (0, false),
            BoundaryKind::Repeat => (index.clamp(0, w - 1) as usize, true),
        }
    }

    /// Remap the indices of a weight vector in place.
    ///
    /// # Arguments
    /// * `start` - Index of the first weight as returned by the kernel
    /// * `indices` - Output indices, one per weight
    /// * `weights` - Weights; zeroed where the coefficient does not exist
    pub fn apply(&self, start: isize, indices: &mut [usize], weights: &mut [f64]) {
        for (i, (index, weight)) in indices.iter_mut().zip(weights.iter_mut()).enumerate() {
            let (mapped, valid) = self.map_index(start + i as isize);
            *index = mapped;
            if !valid {
                *weight = 0.0;
            }
        }
    }

    /// Convert samples into spline coefficients in place.
    ///
    /// Applies the recursive causal/anticausal filter pair of every pole.
    /// Lines with fewer than two samples are left unchanged.
    ///
    /// # Errors
    /// `InvalidArgument` when the mode does not support the number of poles.
    pub fn filter_line(&self, coeffs: &mut [f64], poles: &[f64]) -> Result<()> {
        if coeffs.len() < 2 || poles.is_empty() {
            return Ok(());
        }
        if self.kind != BoundaryKind::Mirror && poles.len() > 1 {
            return Err(CoreError::invalid_argument(format!(
                "boundary condition '{}' supports at most one pole, got {}",
                self.kind,
                poles.len()
            )));
        }

        let gain: f64 = poles.iter().map(|&z| (1.0 - z) * (1.0 - 1.0 / z)).product();
        coeffs.iter_mut().for_each(|c| *c *= gain);

        let n = coeffs.len();
        for &z in poles {
            coeffs[0] = self.initial_causal(coeffs, z);
            for k in 1..n {
                coeffs[k] += z * coeffs[k - 1];
            }
            coeffs[n - 1] = self.initial_anticausal(coeffs, z);
            for k in (0..n - 1).rev() {
                coeffs[k] = z * (coeffs[k + 1] - coeffs[k]);
            }
        }
        Ok(())
    }

    fn initial_causal(&self, c: &[f64], z: f64) -> f64 {
        let n = c.len();
        match self.kind {
            BoundaryKind::Mirror => {
                let iz = 1.0 / z;
                let mut zn = z;
                let mut z2n = z.powi(n as i32 - 1);
                let mut sum = c[0] + z2n * c[n - 1];
                z2n *= z2n * iz;
                for &ck in &c[1..n - 1] {
                    sum += (zn + z2n) * ck;
                    zn *= z;
                    z2n *= iz;
                }
                sum / (1.0 - zn * zn)
            }
            BoundaryKind::Zero => {
                let ip = 1.0 / z;
                let mut zn = z * z;
                let mut z2n = z.powi(2 * n as i32 + 2);
                let mut sum = 0.0;
                for &ck in &c[..n - 1] {
                    sum -= (zn + z2n) * ck;
                    zn *= z;
                    z2n *= ip;
                }
                sum -= zn * c[n - 1];
                c[0] + sum / (1.0 - zn * zn)
            }
            BoundaryKind::Repeat => {
                let iz = 1.0 / z;
                let mut zn = z;
                let mut z2n = z.powi(2 * n as i32);
                let mut sum = 0.0;
                for &ck in c {
                    sum += (zn + z2n) * ck;
                    zn *= z;
                    z2n *= iz;
                }
                c[0] + sum / (1.0 - zn * zn)
            }
        }
    }

    fn initial_anticausal(&self, c: &[f64], z: f64) -> f64 {
        let n = c.len();
        match self.kind {
            BoundaryKind::Mirror => (z / (z * z - 1.0)) * (z * c[n - 2] + c[n - 1]),
            BoundaryKind::Zero => -c[n - 1] * z,
            BoundaryKind::Repeat => -z / (1.0 - z) * c[n - 1],
        }
    }
}
