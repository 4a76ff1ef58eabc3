//! Flood fill of the tile grid into plates (connected passable regions) and
//! the holes they enclose.

use crate::grid::TileGrid;

/// Tile coordinate on the fine grid.
pub type Tile = (usize, usize);

/// A maximal 4-connected passable region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plate {
    /// First tile of the plate in scan order (lowest row, then leftmost).
    pub start: Tile,
    /// First tile, in scan order, of every blocked component enclosed by this plate.
    pub holes: Vec<Tile>,
    /// Number of tiles in the plate.
    pub area: usize,
}

/// Plates found on a grid, plus the per-tile plate label map.
#[derive(Debug, Clone)]
pub struct Plates {
    width: usize,
    height: usize,
    labels: Vec<Option<u32>>,
    pub plates: Vec<Plate>,
}

impl Plates {
    /// Plate owning tile `(x, y)`, if any.
    #[inline]
    pub fn plate_at(&self, x: isize, y: isize) -> Option<u32> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        self.labels[x as usize + y as usize * self.width]
    }

    #[inline]
    pub fn belongs_to(&self, plate: u32, x: isize, y: isize) -> bool {
        self.plate_at(x, y) == Some(plate)
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }
}

/// Iterative 4-connected flood fill from `start` over tiles for which `open`
/// holds, marking them in `visited`. Calls `visit` once per filled tile.
fn flood_fill(
    grid: &TileGrid,
    start: Tile,
    visited: &mut [bool],
    open: impl Fn(usize, usize) -> bool,
    mut visit: impl FnMut(usize, usize),
) {
    let width = grid.width();
    let mut stack = vec![start];
    while let Some((x, y)) = stack.pop() {
        let index = x + y * width;
        if visited[index] || !open(x, y) {
            continue;
        }
        visited[index] = true;
        visit(x, y);
        if x > 0 {
            stack.push((x - 1, y));
        }
        if x + 1 < width {
            stack.push((x + 1, y));
        }
        if y > 0 {
            stack.push((x, y - 1));
        }
        if y + 1 < grid.height() {
            stack.push((x, y + 1));
        }
    }
}

/// Enumerates plates and attributes each enclosed blocked component to the
/// plate surrounding it. Border tiles count as blocked.
pub fn extract_plates(grid: &TileGrid) -> Plates {
    let (width, height) = (grid.width(), grid.height());
    let mut labels = vec![None; width * height];
    let mut plates = Vec::new();

    let passable = |x: usize, y: usize| !grid.is_border(x, y) && !grid.is_blocked(x as isize, y as isize);

    let mut visited = vec![false; width * height];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            if visited[x + y * width] || !passable(x, y) {
                continue;
            }
            let id = plates.len() as u32;
            let mut area = 0;
            flood_fill(grid, (x, y), &mut visited, passable, |tx, ty| {
                labels[tx + ty * width] = Some(id);
                area += 1;
            });
            plates.push(Plate {
                start: (x, y),
                holes: Vec::new(),
                area,
            });
        }
    }

    let mut plates = Plates {
        width,
        height,
        labels,
        plates,
    };

    // Blocked components, border included in the fill so anything touching it
    // is never a hole.
    let blocked = |x: usize, y: usize| grid.is_border(x, y) || grid.is_blocked(x as isize, y as isize);
    let mut visited = vec![false; width * height];
    for y in 0..height {
        for x in 0..width {
            if visited[x + y * width] || !blocked(x, y) {
                continue;
            }
            let mut touches_border = false;
            flood_fill(grid, (x, y), &mut visited, blocked, |tx, ty| {
                touches_border |= grid.is_border(tx, ty);
            });
            if touches_border {
                continue;
            }
            let (sx, sy) = (x as isize, y as isize);
            let owner = plates
                .plate_at(sx - 1, sy - 1)
                .or_else(|| plates.plate_at(sx, sy - 1));
            match owner {
                Some(owner) => plates.plates[owner as usize].holes.push((x, y)),
                None => log::warn!("blocked component at ({x}, {y}) has no surrounding plate"),
            }
        }
    }

    plates
}
