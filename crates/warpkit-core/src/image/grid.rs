//! Index arithmetic for x-fastest grids.
//!
//! Images, vector fields and coefficient grids all store their elements with
//! the first axis varying fastest. These helpers translate between linear
//! offsets and `[x, y(, z)]` coordinates.

/// Number of elements in a grid of the given size.
#[inline]
pub fn num_elements<const D: usize>(size: [usize; D]) -> usize {
    size.iter().product()
}

/// Linear strides of a grid.
///
/// # Arguments
/// * `size` - Grid size `[x, y(, z)]`
///
/// # Returns
/// The offset between neighbours along each axis (`strides[0] == 1`)
#[inline]
pub fn strides<const D: usize>(size: [usize; D]) -> [usize; D] {
    let mut strides = [1usize; D];
    for d in 1..D {
        strides[d] = strides[d - 1] * size[d - 1];
    }
    strides
}

/// Linear offset of a coordinate.
#[inline]
pub fn linear_index<const D: usize>(size: [usize; D], coords: [usize; D]) -> usize {
    let mut index = 0;
    for d in (0..D).rev() {
        index = index * size[d] + coords[d];
    }
    index
}

/// Coordinate of a linear offset.
#[inline]
pub fn coordinates<const D: usize>(size: [usize; D], mut index: usize) -> [usize; D] {
    let mut coords = [0usize; D];
    for d in 0..D {
        coords[d] = index % size[d];
        index /= size[d];
    }
    coords
}

/// Iterator over all coordinates of a grid in memory order.
#[derive(Debug, Clone)]
pub struct GridIter<const D: usize> {
    size: [usize; D],
    current: Option<[usize; D]>,
}

impl<const D: usize> GridIter<D> {
    /// Create an iterator over `size`. An empty grid yields nothing.
    pub fn new(size: [usize; D]) -> Self {
        let current = if size.iter().all(|&s| s > 0) {
            Some([0; D])
        } else {
            None
        };
        Self { size, current }
    }
}

impl<const D: usize> Iterator for GridIter<D> {
    type Item = [usize; D];

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        let mut next = current;
        let mut axis = 0;
        loop {
            if axis == D {
                self.current = None;
                break;
            }
            next[axis] += 1;
            if next[axis] < self.size[axis] {
                self.current = Some(next);
                break;
            }
            next[axis] = 0;
            axis += 1;
        }
        Some(current)
    }
}
