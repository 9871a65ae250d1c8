//! Median filter.

use rayon::prelude::*;

use crate::image::{grid, Image};

/// Median over a `(2 * half_width + 1)^D` window clipped to the image.
///
/// For windows with an even number of pixels the upper median (element
/// `n / 2` of the sorted window) is taken.
pub fn median<const D: usize>(image: &Image<D>, half_width: usize) -> Image<D> {
    if half_width == 0 {
        return image.clone();
    }
    let size = image.size();
    let data: Vec<f32> = (0..image.len())
        .into_par_iter()
        .map_init(Vec::new, |window, index| {
            let center = grid::coordinates(size, index);
            let lo: [usize; D] = std::array::from_fn(|d| center[d].saturating_sub(half_width));
            let extent: [usize; D] =
                std::array::from_fn(|d| (center[d] + half_width + 1).min(size[d]) - lo[d]);
            window.clear();
            for offset in grid::GridIter::new(extent) {
                let coords: [usize; D] = std::array::from_fn(|d| lo[d] + offset[d]);
                window.push(image.get(coords));
            }
            let mid = window.len() / 2;
            *window.select_nth_unstable_by(mid, f32::total_cmp).1
        })
        .collect();
    Image::from_parts(size, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_3x3() {
        let image = Image::from_fn([5, 7], |[x, y]| ((x * 7 + y * 3) % 11) as f32);
        let expected: [[f32; 5]; 7] = [
            [7.0, 6.0, 7.0, 6.0, 9.0],
            [6.0, 6.0, 6.0, 6.0, 6.0],
            [6.0, 6.0, 5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0, 4.0, 5.0],
            [5.0, 4.0, 4.0, 4.0, 7.0],
            [4.0, 4.0, 4.0, 6.0, 6.0],
            [4.0, 7.0, 6.0, 7.0, 6.0],
        ];
        let filtered = median(&image, 1);
        for (y, row) in expected.iter().enumerate() {
            for (x, &value) in row.iter().enumerate() {
                assert_eq!(filtered.get([x, y]), value, "at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_zero_width_is_identity() {
        let image = Image::from_fn([3, 2], |[x, y]| (x * 2 + y) as f32);
        assert_eq!(median(&image, 0), image);
    }
}
