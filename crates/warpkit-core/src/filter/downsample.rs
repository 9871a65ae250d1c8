//! Block-average reduction.

use rayon::prelude::*;

use crate::error::{CoreError, Result};
use crate::image::{grid, Image};

/// Output size of a block reduction: `ceil(size / block)` per axis.
pub fn reduced_size<const D: usize>(size: [usize; D], block: [usize; D]) -> [usize; D] {
    std::array::from_fn(|d| size[d].div_ceil(block[d].max(1)))
}

/// Average an image over blocks.
///
/// Blocks at the upper border are clipped to the image, so every output
/// pixel is the mean of the input pixels it covers.
///
/// # Errors
/// `InvalidArgument` for a zero block size.
pub fn block_reduce<const D: usize>(image: &Image<D>, block: [usize; D]) -> Result<Image<D>> {
    if block.iter().any(|&b| b == 0) {
        return Err(CoreError::invalid_argument(format!(
            "block size must be positive, got {:?}",
            block
        )));
    }
    if block.iter().all(|&b| b == 1) {
        return Ok(image.clone());
    }

    let size = image.size();
    let out_size = reduced_size(size, block);
    let data: Vec<f32> = (0..grid::num_elements(out_size))
        .into_par_iter()
        .map(|index| {
            let out = grid::coordinates(out_size, index);
            let lo: [usize; D] = std::array::from_fn(|d| out[d] * block[d]);
            let extent: [usize; D] =
                std::array::from_fn(|d| (lo[d] + block[d]).min(size[d]) - lo[d]);
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for offset in grid::GridIter::new(extent) {
                let coords: [usize; D] = std::array::from_fn(|d| lo[d] + offset[d]);
                sum += image.get(coords) as f64;
                count += 1;
            }
            (sum / count as f64) as f32
        })
        .collect();
    Ok(Image::from_parts(out_size, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reduce_with_clipped_border() {
        let image = Image::from_fn([5, 3], |[x, y]| (x + 5 * y) as f32);
        let reduced = block_reduce(&image, [2, 2]).unwrap();
        assert_eq!(reduced.size(), [3, 2]);
        // pixels 0, 1, 5, 6
        assert_abs_diff_eq!(reduced.get([0, 0]), 3.0);
        // clipped column: pixels 4, 9
        assert_abs_diff_eq!(reduced.get([2, 0]), 6.5);
        // clipped row: pixels 12, 13
        assert_abs_diff_eq!(reduced.get([1, 1]), 12.5);
        assert_abs_diff_eq!(reduced.get([2, 1]), 14.0);
    }

    #[test]
    fn test_unit_block_and_zero_block() {
        let image = Image::from_fn([3, 3], |[x, y]| (x * y) as f32);
        assert_eq!(block_reduce(&image, [1, 1]).unwrap(), image);
        assert!(block_reduce(&image, [0, 2]).is_err());
        assert_eq!(reduced_size([9, 16, 1], [4, 4, 4]), [3, 4, 1]);
    }
}
