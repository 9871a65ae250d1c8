//! Interpolator trait for sampling images at continuous coordinates.

/// Samples a grid at continuous pixel coordinates.
///
/// # Type Parameters
/// * `D` - The spatial dimensionality (2 or 3)
pub trait Interpolator<const D: usize>: Send + Sync {
    /// Interpolated value at `point`, given as `[x, y(, z)]` in pixel units.
    fn evaluate(&self, point: [f64; D]) -> f64;

    /// Size of the sampled grid.
    fn size(&self) -> [usize; D];
}
