//! Dense vector fields on image grids.

use nalgebra::SVector;
use rayon::prelude::*;

use super::grid::{self, GridIter};
use crate::error::{CoreError, Result};

/// Single-precision vector stored in fields.
pub type FVector<const D: usize> = SVector<f32, D>;

/// A vector per grid point, x fastest.
///
/// Used for displacement fields, velocity fields and the force fields cost
/// functions produce.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField<const D: usize> {
    size: [usize; D],
    data: Vec<FVector<D>>,
}

impl<const D: usize> VectorField<D> {
    /// Create a field from a size and a buffer.
    ///
    /// # Errors
    /// `DimensionMismatch` when the buffer length differs from the grid size.
    pub fn new(size: [usize; D], data: Vec<FVector<D>>) -> Result<Self> {
        let expected = grid::num_elements(size);
        if data.len() != expected {
            return Err(CoreError::dimension_mismatch(format!(
                "field of size {:?} needs {} vectors, got {}",
                size,
                expected,
                data.len()
            )));
        }
        Ok(Self { size, data })
    }

    pub(crate) fn from_parts(size: [usize; D], data: Vec<FVector<D>>) -> Self {
        debug_assert_eq!(data.len(), grid::num_elements(size));
        Self { size, data }
    }

    /// Zero field.
    pub fn zeros(size: [usize; D]) -> Self {
        Self {
            size,
            data: vec![FVector::<D>::zeros(); grid::num_elements(size)],
        }
    }

    /// Create a field by evaluating `f` at every grid coordinate.
    pub fn from_fn<F>(size: [usize; D], f: F) -> Self
    where
        F: Fn([usize; D]) -> FVector<D>,
    {
        let data = GridIter::new(size).map(f).collect();
        Self { size, data }
    }

    pub fn size(&self) -> [usize; D] {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[FVector<D>] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [FVector<D>] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, coords: [usize; D]) -> FVector<D> {
        self.data[grid::linear_index(self.size, coords)]
    }

    #[inline]
    pub fn set(&mut self, coords: [usize; D], value: FVector<D>) {
        let index = grid::linear_index(self.size, coords);
        self.data[index] = value;
    }

    /// Reset every vector to zero.
    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = FVector::<D>::zeros());
    }

    /// Largest vector norm in the field.
    pub fn max_norm(&self) -> f32 {
        self.data
            .par_iter()
            .map(|v| v.norm())
            .reduce(|| 0.0, f32::max)
    }

    /// Multiply every vector by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.data.par_iter_mut().for_each(|v| *v *= factor);
    }

    /// `self += factor * other`.
    ///
    /// # Errors
    /// `ShapeMismatch` when the grids differ.
    pub fn add_scaled(&mut self, other: &VectorField<D>, factor: f32) -> Result<()> {
        if self.size != other.size {
            return Err(CoreError::shape_mismatch(&self.size, &other.size));
        }
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(a, b)| *a += b * factor);
        Ok(())
    }
}
