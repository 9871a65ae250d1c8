//! Image cost trait.
//!
//! A cost compares a (warped) moving image against a reference image of the
//! same size. Besides the scalar value it provides a force field: the
//! derivative of the cost with respect to a virtual displacement at every
//! pixel, `∂C/∂W(x) · ∇W(x)`. Forces point uphill; optimizers step against
//! them.

use warpkit_core::{Image, VectorField};

use crate::error::{RegistrationError, Result};

/// Similarity measure between two images.
///
/// Lower values indicate better alignment.
///
/// # Type Parameters
/// * `D` - The spatial dimensionality (2 or 3)
pub trait ImageCost<const D: usize>: Send + Sync {
    /// Short name used in descriptors and logs.
    fn name(&self) -> &'static str;

    /// Prepare per-reference caches.
    ///
    /// Called whenever the reference image changes, e.g. at every pyramid
    /// level.
    fn set_reference(&mut self, _reference: &Image<D>) -> Result<()> {
        Ok(())
    }

    /// Cost value.
    ///
    /// # Errors
    /// `InvalidArgument` when the image sizes differ.
    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64>;

    /// Cost value and force field.
    ///
    /// The force buffer is overwritten.
    ///
    /// # Errors
    /// `InvalidArgument` when the image or force sizes differ.
    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64>;
}

/// Check that a moving and a reference image share a grid.
pub fn check_sizes<const D: usize>(moving: &Image<D>, reference: &Image<D>) -> Result<()> {
    if moving.size() != reference.size() {
        return Err(RegistrationError::invalid_argument(format!(
            "moving image size {:?} differs from reference size {:?}",
            moving.size(),
            reference.size()
        )));
    }
    Ok(())
}

/// Like [`check_sizes`], including the force field.
pub fn check_force_sizes<const D: usize>(
    moving: &Image<D>,
    reference: &Image<D>,
    force: &VectorField<D>,
) -> Result<()> {
    check_sizes(moving, reference)?;
    if force.size() != moving.size() {
        return Err(RegistrationError::invalid_argument(format!(
            "force field size {:?} differs from image size {:?}",
            force.size(),
            moving.size()
        )));
    }
    Ok(())
}
