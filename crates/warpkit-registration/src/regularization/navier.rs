//! Navier-Lamé PDE solver for fluid registration.
//!
//! Solves `μ Δv + (λ + μ) ∇(∇·v) = -f` on the image grid with fixed
//! (Dirichlet) border voxels by successive over-relaxation. Sweeps run as
//! zebra slices over the last axis: even slices in parallel, then odd
//! slices, each slice in Gauss-Seidel order. After the first sweep only
//! voxels whose residual, or a neighbour's residual, was large enough are
//! visited again.

use rayon::prelude::*;
use tracing::{debug, warn};
use warpkit_core::image::grid;
use warpkit_core::{FVector, VectorField};

use crate::error::{RegistrationError, Result};

/// Outcome of a [`NavierSolver::solve`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Number of sweeps run.
    pub iterations: usize,
    /// Sum of the update magnitudes of the first sweep.
    pub initial_residual: f64,
    /// Sum of the update magnitudes of the last sweep.
    pub final_residual: f64,
    /// Whether the relative residual dropped below epsilon.
    pub converged: bool,
}

/// Stencil weights for one dimensionality.
#[derive(Debug, Clone, Copy)]
struct Stencil {
    c: f32,
    a_b: f32,
    a_c: f32,
    b_4: f32,
    omega: f32,
}

/// SOR solver of the Navier-Lamé equation.
#[derive(Debug, Clone, PartialEq)]
pub struct NavierSolver {
    mu: f64,
    lambda: f64,
    omega: f64,
    epsilon: f64,
    max_iter: usize,
}

impl Default for NavierSolver {
    fn default() -> Self {
        Self {
            mu: 1.0,
            lambda: 1.0,
            omega: 1.0,
            epsilon: 1e-4,
            max_iter: 100,
        }
    }
}

impl NavierSolver {
    /// Create a solver.
    ///
    /// # Arguments
    /// * `mu` - Shear modulus, positive
    /// * `lambda` - Lamé's first parameter, non-negative
    /// * `omega` - Relaxation factor in `[0.1, 10]`
    /// * `epsilon` - Relative residual at which the solver stops
    /// * `max_iter` - Maximum number of sweeps, at least 1
    ///
    /// # Errors
    /// `InvalidArgument` for parameters outside these ranges.
    pub fn new(mu: f64, lambda: f64, omega: f64, epsilon: f64, max_iter: usize) -> Result<Self> {
        if !(mu > 0.0 && mu.is_finite()) {
            return Err(RegistrationError::invalid_argument(format!("navier mu must be positive, got {}", mu)));
        }
        if !(lambda >= 0.0 && lambda.is_finite()) {
            return Err(RegistrationError::invalid_argument(format!(
                "navier lambda must be non-negative, got {}",
                lambda
            )));
        }
        if !(0.1..=10.0).contains(&omega) {
            return Err(RegistrationError::invalid_argument(format!(
                "navier omega must be in [0.1, 10], got {}",
                omega
            )));
        }
        if !(epsilon > 0.0) || max_iter == 0 {
            return Err(RegistrationError::invalid_argument(format!(
                "navier needs epsilon > 0 and iter >= 1, got {} and {}",
                epsilon, max_iter
            )));
        }
        Ok(Self {
            mu,
            lambda,
            omega,
            epsilon,
            max_iter,
        })
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    fn stencil(&self, dims: usize) -> Stencil {
        let a = self.mu;
        let b = self.lambda + self.mu;
        let c = 1.0 / (2.0 * (a + b) + 2.0 * a * (dims as f64 - 1.0));
        Stencil {
            c: c as f32,
            a_b: ((a + b) * c) as f32,
            a_c: (a * c) as f32,
            b_4: (b * c / 4.0) as f32,
            omega: self.omega as f32,
        }
    }

    /// Relax one voxel.
    ///
    /// # Arguments
    /// * `velocity` - Field updated in place
    /// * `b` - Right hand side, already multiplied by the stencil constant
    /// * `coords` - Voxel to update, not on the border
    ///
    /// # Returns
    /// The magnitude of the update
    pub fn solve_at<const D: usize>(
        &self,
        velocity: &mut VectorField<D>,
        b: FVector<D>,
        coords: [usize; D],
    ) -> Result<f32> {
        let size = velocity.size();
        if (0..D).any(|d| coords[d] == 0 || coords[d] + 1 >= size[d]) {
            return Err(RegistrationError::invalid_argument(format!(
                "voxel {:?} is not inside {:?}",
                coords, size
            )));
        }
        let strides = signed_strides(size);
        let index = grid::linear_index(size, coords);
        let data = velocity.data_mut();
        let delta = relax(&self.stencil(D), &b, &data[index], strides, |offset| {
            data[(index as isize + offset) as usize]
        });
        data[index] += delta;
        Ok(delta.norm())
    }

    /// Solve for the velocity driven by `force`.
    ///
    /// `velocity` holds the initial guess, its border is kept fixed.
    ///
    /// # Errors
    /// `InvalidArgument` when the fields differ in size.
    pub fn solve<const D: usize>(
        &self,
        force: &VectorField<D>,
        velocity: &mut VectorField<D>,
    ) -> Result<SolveReport> {
        if force.size() != velocity.size() {
            return Err(RegistrationError::shape_mismatch(&force.size(), &velocity.size()));
        }
        let size = force.size();
        if size.iter().any(|&s| s < 3) {
            return Ok(SolveReport {
                iterations: 0,
                initial_residual: 0.0,
                final_residual: 0.0,
                converged: true,
            });
        }
        let stencil = self.stencil(D);
        let rhs: Vec<FVector<D>> = force.data().par_iter().map(|f| f * stencil.c).collect();
        let n = rhs.len();
        let mut active = vec![true; n];
        let mut residual = vec![0.0f32; n];

        let r0 = sweep(&stencil, &rhs, velocity.data_mut(), size, &active, &mut residual);
        let mut r = r0;
        let mut iterations = 1;
        let mut converged = r0 == 0.0;
        while !converged && iterations < self.max_iter {
            let thresh = (r * r / (r0 * n as f64 * iterations as f64)) as f32;
            mark_active(&residual, size, thresh, &mut active);
            r = sweep(&stencil, &rhs, velocity.data_mut(), size, &active, &mut residual);
            iterations += 1;
            converged = r < self.epsilon * r0 || r == 0.0;
        }
        if converged {
            debug!(iterations, r0, r, "navier solver converged");
        } else {
            warn!(iterations, r0, r, "navier solver hit the iteration limit");
        }
        Ok(SolveReport {
            iterations,
            initial_residual: r0,
            final_residual: r,
            converged,
        })
    }
}

fn signed_strides<const D: usize>(size: [usize; D]) -> [isize; D] {
    let strides = grid::strides(size);
    std::array::from_fn(|d| strides[d] as isize)
}

/// SOR update of one voxel; `at` returns the velocity at a linear offset.
#[inline]
fn relax<const D: usize, F>(
    st: &Stencil,
    b: &FVector<D>,
    v: &FVector<D>,
    strides: [isize; D],
    at: F,
) -> FVector<D>
where
    F: Fn(isize) -> FVector<D>,
{
    let mut delta = FVector::<D>::zeros();
    for i in 0..D {
        let si = strides[i];
        let mut p = b[i] + st.a_b * (at(-si)[i] + at(si)[i]);
        let mut q = 0.0;
        for (j, &sj) in strides.iter().enumerate() {
            if j == i {
                continue;
            }
            p += st.a_c * (at(-sj)[i] + at(sj)[i]);
            q += at(-si - sj)[j] + at(si + sj)[j] - at(-si + sj)[j] - at(si - sj)[j];
        }
        delta[i] = st.omega * (p + st.b_4 * q - v[i]);
    }
    delta
}

/// One zebra sweep. Returns the summed update magnitude.
fn sweep<const D: usize>(
    st: &Stencil,
    rhs: &[FVector<D>],
    velocity: &mut [FVector<D>],
    size: [usize; D],
    active: &[bool],
    residual: &mut [f32],
) -> f64 {
    let slices = size[D - 1];
    let slice_len = velocity.len() / slices;
    let strides = signed_strides(size);
    residual.iter_mut().for_each(|r| *r = 0.0);

    let mut total = 0.0;
    for parity in 0..2 {
        // slices of the other parity are only read during this phase
        let mut neighbours: Vec<Option<&[FVector<D>]>> = vec![None; slices];
        let mut updated = Vec::with_capacity(slices / 2);
        for (z, (chunk, res)) in velocity
            .chunks_mut(slice_len)
            .zip(residual.chunks_mut(slice_len))
            .enumerate()
        {
            if z % 2 != parity {
                let shared: &[FVector<D>] = chunk;
                neighbours[z] = Some(shared);
            } else if z > 0 && z + 1 < slices {
                updated.push((z, chunk, res));
            }
        }
        let neighbours = &neighbours;
        let sums: Vec<f64> = updated
            .into_par_iter()
            .map(|(z, chunk, res)| {
                let base = z * slice_len;
                let mut sum = 0.0;
                for local in 0..slice_len {
                    let index = base + local;
                    if !active[index] {
                        continue;
                    }
                    let coords = grid::coordinates(size, index);
                    if (0..D - 1).any(|d| coords[d] == 0 || coords[d] + 1 == size[d]) {
                        continue;
                    }
                    let delta = {
                        let chunk = &*chunk;
                        relax(st, &rhs[index], &chunk[local], strides, |offset| {
                            let n = (index as isize + offset) as usize;
                            if (base..base + slice_len).contains(&n) {
                                chunk[n - base]
                            } else {
                                neighbours[n / slice_len].map_or_else(FVector::<D>::zeros, |s| s[n % slice_len])
                            }
                        })
                    };
                    chunk[local] += delta;
                    let magnitude = delta.norm();
                    res[local] = magnitude;
                    sum += magnitude as f64;
                }
                sum
            })
            .collect();
        total += sums.into_iter().sum::<f64>();
    }
    total
}

/// Flag every voxel whose own or axial neighbour's residual exceeds
/// `thresh`.
fn mark_active<const D: usize>(residual: &[f32], size: [usize; D], thresh: f32, active: &mut [bool]) {
    let strides = grid::strides(size);
    active.par_iter_mut().enumerate().for_each(|(index, flag)| {
        if residual[index] > thresh {
            *flag = true;
            return;
        }
        let coords = grid::coordinates(size, index);
        *flag = (0..D).any(|d| {
            (coords[d] > 0 && residual[index - strides[d]] > thresh)
                || (coords[d] + 1 < size[d] && residual[index + strides[d]] > thresh)
        });
    });
}

/// Apply the convective term: `v -= ½ J_u v`.
///
/// Derivatives of `u` are central differences, zero on the border.
///
/// # Returns
/// The largest squared magnitude of the updated `v`
pub fn perturbation<const D: usize>(u: &VectorField<D>, v: &mut VectorField<D>) -> Result<f32> {
    if u.size() != v.size() {
        return Err(RegistrationError::shape_mismatch(&u.size(), &v.size()));
    }
    let size = u.size();
    let strides = grid::strides(size);
    let (ud, old) = (u.data(), v.data().to_vec());
    let max = v
        .data_mut()
        .par_iter_mut()
        .enumerate()
        .map(|(index, out)| {
            let coords = grid::coordinates(size, index);
            let vi = old[index];
            let mut jv = FVector::<D>::zeros();
            for j in 0..D {
                if coords[j] == 0 || coords[j] + 1 >= size[j] {
                    continue;
                }
                let du = (ud[index + strides[j]] - ud[index - strides[j]]) * 0.5;
                jv += du * vi[j];
            }
            *out = vi - jv * 0.5;
            out.norm_squared()
        })
        .reduce(|| 0.0f32, f32::max);
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rejects_parameters() {
        assert!(NavierSolver::new(0.0, 1.0, 1.0, 1e-4, 10).is_err());
        assert!(NavierSolver::new(1.0, -1.0, 1.0, 1e-4, 10).is_err());
        assert!(NavierSolver::new(1.0, 1.0, 11.0, 1e-4, 10).is_err());
        assert!(NavierSolver::new(1.0, 1.0, 1.0, 1e-4, 0).is_err());
        assert!(NavierSolver::new(1.0, 1.0, 1.0, 1e-4, 10).is_ok());
    }

    #[test]
    fn test_sweep_matches_voxelwise_relaxation() {
        let size = [5, 6, 7];
        let force = VectorField::from_fn(size, |[x, y, z]| {
            FVector::<3>::new((x as f32 * 0.9).sin(), (y as f32 * 0.4).cos(), (x + z) as f32 * 0.1)
        });
        let solver = NavierSolver::new(1.0, 2.0, 1.2, 1e-4, 1).unwrap();
        let mut swept = VectorField::zeros(size);
        let report = solver.solve(&force, &mut swept).unwrap();
        assert_eq!(report.iterations, 1);

        // even slices, then odd slices, each in memory order
        let c = solver.stencil(3).c;
        let mut relaxed = VectorField::zeros(size);
        for parity in 0..2 {
            for coords in grid::GridIter::new(size) {
                let interior = (0..3).all(|d| coords[d] > 0 && coords[d] + 1 < size[d]);
                if interior && coords[2] % 2 == parity {
                    solver.solve_at(&mut relaxed, force.get(coords) * c, coords).unwrap();
                }
            }
        }
        assert_eq!(swept.data(), relaxed.data());
        assert!(swept.max_norm() > 0.0);
    }

    #[test]
    fn test_kernel_at_center() {
        let solver = NavierSolver::new(1.0, 2.0, 2.0, 1e-4, 10).unwrap();
        let mut v = VectorField::from_fn([3, 3, 3], |[x, y, z]| {
            FVector::<3>::new((y * x) as f32, (2 * z * y) as f32, (3 * x * z) as f32)
        });
        let residual = solver
            .solve_at(&mut v, FVector::<3>::new(1.0, 2.0, 3.0), [1, 1, 1])
            .unwrap();
        let center = v.get([1, 1, 1]);
        assert_abs_diff_eq!(center[0], 4.5, epsilon = 1e-5);
        assert_abs_diff_eq!(center[1], 6.5, epsilon = 1e-5);
        assert_abs_diff_eq!(center[2], 10.0, epsilon = 1e-5);
        let expected = (3.5f32 * 3.5 + 4.5 * 4.5 + 7.0 * 7.0).sqrt();
        assert_abs_diff_eq!(residual, expected, epsilon = 1e-4);
        assert!(solver.solve_at(&mut v, FVector::<3>::zeros(), [0, 1, 1]).is_err());
    }

    #[test]
    fn test_zero_force_keeps_zero_field() {
        let solver = NavierSolver::default();
        let force = VectorField::<2>::zeros([8, 8]);
        let mut v = VectorField::zeros([8, 8]);
        let report = solver.solve(&force, &mut v).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(v.max_norm(), 0.0);
    }

    #[test]
    fn test_zero_force_relaxes_to_zero() {
        let solver = NavierSolver::new(1.0, 1.0, 1.0, 1e-4, 2000).unwrap();
        let force = VectorField::<2>::zeros([12, 12]);
        let mut v = VectorField::from_fn([12, 12], |[x, y]| {
            if x == 0 || y == 0 || x == 11 || y == 11 {
                FVector::<2>::zeros()
            } else {
                FVector::<2>::new(1.0, -1.0)
            }
        });
        let report = solver.solve(&force, &mut v).unwrap();
        assert!(report.converged, "{:?}", report);
        assert!(report.final_residual < report.initial_residual);
        assert!(v.max_norm() < 0.1);
    }

    #[test]
    fn test_point_force_pushes_along_force() {
        let solver = NavierSolver::new(1.0, 1.0, 1.0, 1e-5, 500).unwrap();
        let mut force = VectorField::<2>::zeros([9, 9]);
        force.set([4, 4], FVector::<2>::new(1.0, 0.0));
        let mut v = VectorField::zeros([9, 9]);
        solver.solve(&force, &mut v).unwrap();
        assert!(v.get([4, 4])[0] > 0.0);
        assert_abs_diff_eq!(v.get([4, 4])[1], 0.0, epsilon = 1e-3);
        assert_eq!(v.get([0, 4]), FVector::<2>::zeros());
    }

    #[test]
    fn test_perturbation() {
        // u = (x, 0): J_u v = (v_x, 0)
        let u = VectorField::from_fn([5, 5], |[x, _]| FVector::<2>::new(x as f32, 0.0));
        let mut v = VectorField::from_fn([5, 5], |_| FVector::<2>::new(2.0, 1.0));
        let max = perturbation(&u, &mut v).unwrap();
        assert_eq!(v.get([2, 2]), FVector::<2>::new(1.0, 1.0));
        assert_eq!(v.get([0, 2]), FVector::<2>::new(2.0, 1.0));
        assert_abs_diff_eq!(max, 5.0);
    }
}
