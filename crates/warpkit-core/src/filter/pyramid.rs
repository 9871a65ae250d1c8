//! Multi-resolution image pyramid.

use super::downsample::block_reduce;
use crate::error::{CoreError, Result};
use crate::image::Image;

/// Multi-resolution image pyramid.
///
/// Level `shift` holds the input reduced by blocks of `2^shift` pixels per
/// axis; level 0 is the input itself.
#[derive(Debug, Clone)]
pub struct Pyramid<const D: usize> {
    levels: Vec<Image<D>>,
}

impl<const D: usize> Pyramid<D> {
    /// Build `levels` levels from `input`.
    ///
    /// Every level is reduced from the full-resolution image, not from the
    /// previous level.
    ///
    /// # Errors
    /// `InvalidArgument` when `levels` is zero.
    pub fn new(input: &Image<D>, levels: usize) -> Result<Self> {
        if levels == 0 {
            return Err(CoreError::invalid_argument("a pyramid needs at least one level"));
        }
        let levels = (0..levels)
            .map(|shift| block_reduce(input, [Self::block(shift); D]))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { levels })
    }

    /// Block size of a level.
    pub fn block(shift: usize) -> usize {
        1usize << shift
    }

    /// Image at level `shift`, `None` beyond the coarsest level.
    pub fn level(&self, shift: usize) -> Option<&Image<D>> {
        self.levels.get(shift)
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
