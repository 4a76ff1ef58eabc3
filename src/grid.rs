//! Fine-grained blocked/free tile map the navmesh is built from.

use bevy::prelude::Component;

/// Blocked/free bitmap of `width * height` fine tiles, stored row by row.
///
/// Tile `(x, y)` covers the square `[x, x + 1] x [y, y + 1]` in tile units.
/// Anything outside the grid reads as blocked.
#[derive(Component, Clone, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    blocked: Vec<bool>,
}

impl TileGrid {
    /// An all-open grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            blocked: vec![false; width * height],
        }
    }

    /// Wraps an existing row-major bitmap. Returns `None` if the bitmap length
    /// doesn't match the dimensions.
    pub fn from_bitmap(width: usize, height: usize, blocked: Vec<bool>) -> Option<Self> {
        (blocked.len() == width * height).then_some(Self {
            width,
            height,
            blocked,
        })
    }

    /// Builds a grid by evaluating `blocked(x, y)` for every tile.
    pub fn from_fn(width: usize, height: usize, blocked: impl Fn(usize, usize) -> bool) -> Self {
        let mut grid = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                grid.blocked[x + y * width] = blocked(x, y);
            }
        }
        grid
    }

    /// Parses rows of `#` (blocked) and anything else (free). The first line is
    /// row `y = 0`. Short rows are padded with blocked tiles.
    pub fn from_ascii(map: &str) -> Self {
        let rows = map
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();
        let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let height = rows.len();
        Self::from_fn(width, height, |x, y| {
            rows[y].as_bytes().get(x).is_none_or(|tile| *tile == b'#')
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_blocked(&self, x: isize, y: isize) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return true;
        }
        self.blocked[x as usize + y as usize * self.width]
    }

    pub fn set_blocked(&mut self, x: usize, y: usize, blocked: bool) {
        if x < self.width && y < self.height {
            self.blocked[x + y * self.width] = blocked;
        }
    }

    /// Blocks every tile in the inclusive rectangle.
    pub fn block_rect(&mut self, min: (usize, usize), max: (usize, usize)) {
        for y in min.1..=max.1 {
            for x in min.0..=max.0 {
                self.set_blocked(x, y, true);
            }
        }
    }

    /// `true` for tiles on the outermost ring, which the plate extractor always
    /// treats as blocked.
    #[inline]
    pub(crate) fn is_border(&self, x: usize, y: usize) -> bool {
        x == 0 || y == 0 || x + 1 >= self.width || y + 1 >= self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_rows_map_to_increasing_y() {
        let grid = TileGrid::from_ascii(
            "
            ##.
            ...
            ",
        );
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert!(grid.is_blocked(0, 0));
        assert!(grid.is_blocked(1, 0));
        assert!(!grid.is_blocked(2, 0));
        assert!(!grid.is_blocked(0, 1));
    }

    #[test]
    fn outside_reads_blocked() {
        let grid = TileGrid::new(4, 4);
        assert!(grid.is_blocked(-1, 0));
        assert!(grid.is_blocked(0, 4));
        assert!(!grid.is_blocked(3, 3));
    }

    #[test]
    fn bitmap_length_must_match() {
        assert!(TileGrid::from_bitmap(3, 3, vec![false; 8]).is_none());
        assert!(TileGrid::from_bitmap(3, 3, vec![false; 9]).is_some());
    }
}
