//! Wall-follower contour tracing of plates into simplified polygon loops.
//!
//! Loops run along tile corners with the plate interior on their left: the
//! outer boundary of a plate comes out counter-clockwise, hole boundaries
//! clockwise. Every emitted vertex is linked to its predecessor and successor
//! in the loop; those links are the mandatory constraint edges of the
//! triangulation.
//!
//! A corner where two plate tiles touch only diagonally is passed twice.
//! Each pass is emitted a quarter tile into the walkable tile on its own side,
//! so outlines are expressed in quarter tiles and never repeat a vertex.

use std::collections::HashSet;

use bevy::math::{I64Vec2, Vec2};

use crate::plates::{Plate, Plates};

/// Direction of the trace cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Heading {
    East,
    North,
    West,
    South,
}

impl Heading {
    fn step(self) -> I64Vec2 {
        match self {
            Heading::East => I64Vec2::new(1, 0),
            Heading::North => I64Vec2::new(0, 1),
            Heading::West => I64Vec2::new(-1, 0),
            Heading::South => I64Vec2::new(0, -1),
        }
    }

    fn left(self) -> Self {
        match self {
            Heading::East => Heading::North,
            Heading::North => Heading::West,
            Heading::West => Heading::South,
            Heading::South => Heading::East,
        }
    }

    fn right(self) -> Self {
        match self {
            Heading::East => Heading::South,
            Heading::North => Heading::East,
            Heading::West => Heading::North,
            Heading::South => Heading::West,
        }
    }

    /// The two tiles in front of a corner, as `(left, right)` of the heading.
    fn ahead(self, corner: I64Vec2) -> ((i64, i64), (i64, i64)) {
        let (x, y) = (corner.x, corner.y);
        match self {
            Heading::East => ((x, y), (x, y - 1)),
            Heading::North => ((x - 1, y), (x, y)),
            Heading::West => ((x - 1, y - 1), (x - 1, y)),
            Heading::South => ((x, y - 1), (x - 1, y - 1)),
        }
    }
}

/// Outline coordinate units per tile.
pub const OUTLINE_UNITS: i64 = 4;

/// Tuning of the collinear-run merge.
#[derive(Debug, Clone, Copy)]
pub struct Simplification {
    /// A vertex is emitted once `|perp(average) . chord|` exceeds this.
    pub tolerance: f32,
    /// Steps that must be taken since the last vertex before a new one may be emitted.
    pub min_run: usize,
}

impl Simplification {
    /// Keeps every corner of the boundary.
    pub const EXACT: Self = Self {
        tolerance: 0.0,
        min_run: 0,
    };
}

impl Default for Simplification {
    fn default() -> Self {
        Self {
            tolerance: 4.0,
            min_run: 3,
        }
    }
}

/// Polygon loops of one plate, in [`OUTLINE_UNITS`] per tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    pub vertices: Vec<I64Vec2>,
    /// `[predecessor, successor]` of each vertex within its loop.
    pub links: Vec<[u32; 2]>,
}

impl Outline {
    fn push_loop(&mut self, points: &[I64Vec2]) {
        let first = self.vertices.len() as u32;
        let count = points.len() as u32;
        self.vertices.extend_from_slice(points);
        self.links.extend((0..count).map(|i| {
            [
                first + (i + count - 1) % count,
                first + (i + 1) % count,
            ]
        }));
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Outline vertex for a pass through `corner` arriving with `heading`.
///
/// When only diagonally opposite tiles around the corner are inside, the
/// trace always turns left there, and the vertex moves into the inside tile
/// left of and behind the cursor.
fn outline_vertex(corner: I64Vec2, heading: Heading, inside: &impl Fn(i64, i64) -> bool) -> I64Vec2 {
    let (x, y) = (corner.x, corner.y);
    let [below_left, below_right, above_left, above_right] =
        [(x - 1, y - 1), (x, y - 1), (x - 1, y), (x, y)].map(|(tx, ty)| inside(tx, ty));
    let pinched = below_left == above_right && below_right == above_left && below_left != below_right;
    let shift = if pinched {
        heading.left().step() - heading.step()
    } else {
        I64Vec2::ZERO
    };
    corner * OUTLINE_UNITS + shift
}

/// Follows the boundary starting at `start` with `heading`, with the tiles for
/// which `inside` holds kept on the left. Returns the simplified loop.
pub(crate) fn trace_loop(
    start: I64Vec2,
    start_heading: Heading,
    inside: impl Fn(i64, i64) -> bool,
    simplification: Simplification,
    traced: &mut HashSet<(i64, i64, Heading)>,
    max_steps: usize,
) -> Vec<I64Vec2> {
    let perp = |v: Vec2| Vec2::new(v.y, -v.x);

    // a loop starting on a pinch arrived there turning left
    let mut arrival = outline_vertex(start, start_heading.right(), &inside);
    let mut vertices = vec![arrival];
    let mut anchor = start;
    let mut corner = start;
    let mut heading = start_heading;
    let mut average = Vec2::ZERO;
    let mut chord = heading.step().as_vec2();
    let mut run = 0usize;

    for _ in 0..max_steps {
        traced.insert((corner.x, corner.y, heading));
        let moved = heading;
        corner += moved.step();

        let (left, right) = moved.ahead(corner);
        heading = if !inside(left.0, left.1) {
            moved.left()
        } else if inside(right.0, right.1) {
            moved.right()
        } else {
            moved
        };

        run += 1;
        average = (perp(chord) + average * (run - 1) as f32) / run as f32;
        chord = (corner - anchor).as_vec2();
        if run > simplification.min_run && average.dot(chord).abs() > simplification.tolerance {
            anchor = corner - moved.step();
            vertices.push(arrival);
            chord = (corner - anchor).as_vec2();
            average = Vec2::ZERO;
            run = 0;
        }
        arrival = outline_vertex(corner, moved, &inside);

        if corner == start && heading == start_heading {
            return vertices;
        }
    }

    log::warn!("contour starting at {start} did not close after {max_steps} steps");
    debug_assert!(false, "unclosed contour");
    vertices
}

/// Traces the outer boundary of plate `id` and each of its holes.
///
/// Loops with fewer than three vertices are dropped: a plate whose outer loop
/// is that small yields an empty outline, a hole that small is left walkable.
pub fn trace_plate(plates: &Plates, id: u32, plate: &Plate, simplification: Simplification) -> Outline {
    let inside = |x: i64, y: i64| plates.belongs_to(id, x as isize, y as isize);
    let max_steps = 4 * (plate.area + 1) + 8;
    let mut traced = HashSet::new();
    let mut outline = Outline::default();

    let start = I64Vec2::new(plate.start.0 as i64, plate.start.1 as i64);
    let outer = trace_loop(start, Heading::East, inside, simplification, &mut traced, max_steps);
    if outer.len() < 3 {
        log::debug!("plate {id} too small to outline ({} vertices)", outer.len());
        return outline;
    }
    outline.push_loop(&outer);

    for &(hx, hy) in &plate.holes {
        let start = I64Vec2::new(hx as i64, hy as i64);
        if traced.contains(&(start.x, start.y, Heading::North)) {
            continue;
        }
        let hole = trace_loop(start, Heading::North, inside, simplification, &mut traced, max_steps);
        if hole.len() >= 3 {
            outline.push_loop(&hole);
        } else {
            log::debug!("hole at ({hx}, {hy}) of plate {id} too small to outline");
        }
    }

    outline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grid::TileGrid, plates::extract_plates};

    fn signed_area(points: &[I64Vec2]) -> i64 {
        points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum()
    }

    /// Tile corners in outline units.
    fn corners(points: &[(i64, i64)]) -> Vec<I64Vec2> {
        points
            .iter()
            .map(|(x, y)| I64Vec2::new(*x, *y) * OUTLINE_UNITS)
            .collect()
    }

    fn outline_of(grid: &TileGrid) -> Vec<Outline> {
        let plates = extract_plates(grid);
        plates
            .plates
            .iter()
            .enumerate()
            .map(|(id, plate)| trace_plate(&plates, id as u32, plate, Simplification::default()))
            .collect()
    }

    #[test]
    fn rectangle_outline_keeps_only_corners() {
        let outlines = outline_of(&TileGrid::new(40, 24));
        assert_eq!(outlines.len(), 1);
        assert_eq!(
            outlines[0].vertices,
            corners(&[(1, 1), (39, 1), (39, 23), (1, 23)])
        );
        assert!(signed_area(&outlines[0].vertices) > 0, "outer loop must be counter-clockwise");
    }

    #[test]
    fn hole_is_traced_clockwise() {
        let mut grid = TileGrid::new(80, 80);
        grid.block_rect((32, 32), (47, 47));
        let outline = &outline_of(&grid)[0];
        assert_eq!(outline.len(), 8);
        let hole = &outline.vertices[4..];
        assert_eq!(
            hole.to_vec(),
            corners(&[(32, 32), (32, 48), (48, 48), (48, 32)])
        );
        assert!(signed_area(hole) < 0, "hole loop must be clockwise");
    }

    #[test]
    fn links_form_closed_cycles() {
        let mut grid = TileGrid::new(80, 80);
        grid.block_rect((32, 32), (47, 47));
        let outline = &outline_of(&grid)[0];
        for (index, [prev, next]) in outline.links.iter().enumerate() {
            assert_eq!(outline.links[*next as usize][0], index as u32);
            assert_eq!(outline.links[*prev as usize][1], index as u32);
        }
        let mut current = 0;
        for _ in 0..4 {
            current = outline.links[current][1] as usize;
        }
        assert_eq!(current, 0);
    }

    #[test]
    fn tiny_plate_has_no_outline() {
        let grid = TileGrid::from_ascii(
            "
            #####
            #.###
            #####
            ",
        );
        let outlines = outline_of(&grid);
        assert_eq!(outlines.len(), 1);
        assert!(outlines[0].is_empty());
    }

    #[test]
    fn every_vertex_lies_on_the_plate_boundary() {
        let mut grid = TileGrid::new(64, 48);
        grid.block_rect((10, 10), (20, 14));
        grid.block_rect((30, 1), (34, 30));
        grid.block_rect((40, 20), (55, 35));
        let plates = extract_plates(&grid);
        for (id, plate) in plates.plates.iter().enumerate() {
            let outline = trace_plate(&plates, id as u32, plate, Simplification::default());
            for vertex in &outline.vertices {
                let corner = *vertex / OUTLINE_UNITS;
                assert_eq!(corner * OUTLINE_UNITS, *vertex, "plain corner {vertex} off the tile lattice");
                let (x, y) = (corner.x as isize, corner.y as isize);
                let around = [(x - 1, y - 1), (x, y - 1), (x - 1, y), (x, y)]
                    .iter()
                    .filter(|(tx, ty)| plates.belongs_to(id as u32, *tx, *ty))
                    .count();
                assert!(
                    (1..4).contains(&around),
                    "vertex {vertex} of plate {id} is not on its boundary"
                );
            }
        }
    }

    #[test]
    fn corner_touching_blocks_get_one_vertex_per_pass() {
        let mut grid = TileGrid::new(80, 80);
        grid.block_rect((16, 16), (23, 23));
        grid.block_rect((24, 24), (31, 31));
        let outlines = outline_of(&grid);
        assert_eq!(outlines.len(), 1);
        let outline = &outlines[0];
        // both blocks come out as one clockwise loop through the shared corner
        let hole = &outline.vertices[4..];
        assert_eq!(hole.len(), 8);
        assert!(signed_area(hole) < 0);
        let unique = outline.vertices.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), outline.len());

        // the two passes sit in the two free tiles around the corner (24, 24)
        let shared = I64Vec2::new(24, 24) * OUTLINE_UNITS;
        assert!(hole.contains(&(shared + I64Vec2::new(-1, 1))));
        assert!(hole.contains(&(shared + I64Vec2::new(1, -1))));
    }

    #[test]
    fn exact_simplification_keeps_every_corner() {
        let grid = TileGrid::from_ascii(
            "
            ########
            #......#
            #......#
            #..##..#
            #...#..#
            #......#
            ########
            ",
        );
        let plates = extract_plates(&grid);
        let outline = trace_plate(&plates, 0, &plates.plates[0], Simplification::EXACT);
        // the rectangle, then the L-shaped hole with its six corners
        assert_eq!(outline.len(), 10);
        assert_eq!(
            outline.vertices[4..].to_vec(),
            corners(&[(3, 3), (3, 4), (4, 4), (4, 5), (5, 5), (5, 3)])
        );
    }
}
