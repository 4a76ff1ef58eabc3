//! Constrained Delaunay triangulation of a plate outline.
//!
//! The unconstrained triangulation comes from [`delaunay`]. Boundary edges
//! missing from it are then forced in by removing the edges they cross and
//! re-triangulating the two chains on either side; edges leaving the plate at a
//! vertex are pruned by the vertex's own constraint directions; triangles are
//! finally read off the remaining neighbor lists by polar order.

mod delaunay;

use std::{collections::HashMap, fmt};

use bevy::math::I64Vec2;
use itertools::Itertools;

use crate::{
    contour::Outline,
    geometry::{in_ccw_sweep, in_circle, orient, polar_angle, segments_cross},
};
use delaunay::delaunay_neighbors;

/// A counter-clockwise triangle over plate-local vertex ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTriangle {
    pub indices: [u32; 3],
    /// `neighbors[k]` shares edge `indices[k] -> indices[(k + 1) % 3]`.
    pub neighbors: [Option<u32>; 3],
}

/// Why an outline could not be triangulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriangulationError {
    /// Two outline vertices share coordinates.
    RepeatedVertex,
    /// A boundary edge runs through another outline vertex.
    ConstraintThroughVertex { from: u32, to: u32, vertex: u32 },
    /// Two boundary edges cross.
    CrossingConstraints { edge: [u32; 2], other: [u32; 2] },
    /// A boundary edge could not be followed across the triangulation.
    LostCorridor { from: u32, to: u32 },
}

impl fmt::Display for TriangulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriangulationError::RepeatedVertex => write!(f, "outline repeats a vertex"),
            TriangulationError::ConstraintThroughVertex { from, to, vertex } => {
                write!(f, "boundary edge {from}-{to} runs through vertex {vertex}")
            }
            TriangulationError::CrossingConstraints { edge, other } => {
                write!(f, "boundary edges {edge:?} and {other:?} cross")
            }
            TriangulationError::LostCorridor { from, to } => {
                write!(f, "lost the triangles along boundary edge {from}-{to}")
            }
        }
    }
}

impl std::error::Error for TriangulationError {}

/// Per-vertex neighbor lists, kept symmetric.
#[derive(Debug, Clone)]
struct Connections {
    lists: Vec<Vec<usize>>,
}

impl Connections {
    fn is_connected(&self, a: usize, b: usize) -> bool {
        self.lists[a].contains(&b)
    }

    fn connect(&mut self, a: usize, b: usize) {
        if a != b && !self.is_connected(a, b) {
            self.lists[a].push(b);
            self.lists[b].push(a);
        }
    }

    fn disconnect(&mut self, a: usize, b: usize) {
        self.lists[a].retain(|n| *n != b);
        self.lists[b].retain(|n| *n != a);
    }
}

struct Triangulator<'a> {
    points: &'a [I64Vec2],
    links: &'a [[u32; 2]],
    connections: Connections,
}

impl Triangulator<'_> {
    fn is_constraint(&self, a: usize, b: usize) -> bool {
        let [prev, next] = self.links[a];
        prev as usize == b || next as usize == b
    }

    /// The vertex across edge `l-r` from `last`: the neighbor of `l` angularly
    /// closest to `r` on the far side, provided it is also connected to `r`.
    fn across(&self, l: usize, r: usize, last: usize) -> Option<usize> {
        let p = self.points;
        let side = orient(p[l], p[r], p[last]).signum();
        let base = p[r] - p[l];
        self.connections.lists[l]
            .iter()
            .copied()
            .filter(|&w| w != r && orient(p[l], p[r], p[w]).signum() == -side)
            .min_by(|&w1, &w2| {
                let angle = |w: usize| {
                    let v = p[w] - p[l];
                    (base.perp_dot(v).abs() as f64).atan2(base.dot(v) as f64)
                };
                angle(w1).total_cmp(&angle(w2))
            })
            .filter(|&w| self.connections.is_connected(r, w))
    }

    /// Forces the segment `u-v` into the triangulation.
    fn insert_constraint(&mut self, u: usize, v: usize) -> Result<(), TriangulationError> {
        if self.connections.is_connected(u, v) {
            return Ok(());
        }
        let through = |w: usize| TriangulationError::ConstraintThroughVertex {
            from: u as u32,
            to: v as u32,
            vertex: w as u32,
        };
        let lost = TriangulationError::LostCorridor {
            from: u as u32,
            to: v as u32,
        };
        let p = self.points;
        let direction = p[v] - p[u];

        let mut first_left: Option<(f64, usize)> = None;
        let mut first_right: Option<(f64, usize)> = None;
        for &w in &self.connections.lists[u] {
            let offset = p[w] - p[u];
            let cross = direction.perp_dot(offset);
            let dot = direction.dot(offset);
            if cross == 0 && dot > 0 {
                return Err(through(w));
            }
            let angle = (cross as f64).atan2(dot as f64);
            if cross > 0 && first_left.is_none_or(|(best, _)| angle < best) {
                first_left = Some((angle, w));
            } else if cross < 0 && first_right.is_none_or(|(best, _)| angle > best) {
                first_right = Some((angle, w));
            }
        }
        let (Some((_, mut l)), Some((_, mut r))) = (first_left, first_right) else {
            return Err(lost);
        };
        if !self.connections.is_connected(l, r) {
            return Err(lost);
        }

        let mut left_side = vec![l];
        let mut right_side = vec![r];
        let mut last = u;
        for _ in 0..=p.len() {
            let Some(w) = self.across(l, r, last) else {
                return Err(lost);
            };
            if w == v {
                break;
            }
            match orient(p[u], p[v], p[w]).signum() {
                1 => {
                    last = l;
                    l = w;
                    left_side.push(w);
                }
                -1 => {
                    last = r;
                    r = w;
                    right_side.push(w);
                }
                _ => return Err(through(w)),
            }
        }

        let crossed = left_side
            .iter()
            .cartesian_product(&right_side)
            .filter(|&(&a, &b)| self.connections.is_connected(a, b) && segments_cross(p[u], p[v], p[a], p[b]))
            .map(|(&a, &b)| (a, b))
            .collect::<Vec<_>>();
        if let Some(&(a, b)) = crossed.iter().find(|&&(a, b)| self.is_constraint(a, b)) {
            return Err(TriangulationError::CrossingConstraints {
                edge: [u as u32, v as u32],
                other: [a as u32, b as u32],
            });
        }
        for (a, b) in crossed {
            self.connections.disconnect(a, b);
        }

        self.connections.connect(u, v);
        self.retriangulate(u, v, &left_side);
        right_side.reverse();
        self.retriangulate(v, u, &right_side);
        Ok(())
    }

    /// Fills the pseudo-polygon formed by `a -> b` and `chain` (running from
    /// `a` to `b`, left of `a -> b`) by splitting at the chain vertex whose
    /// triangle with `a-b` sees the widest angle.
    fn retriangulate(&mut self, a: usize, b: usize, chain: &[usize]) {
        let Some(&first) = chain.first() else {
            return;
        };
        let p = self.points;
        let mut split = 0;
        let mut apex = first;
        for (i, &c) in chain.iter().enumerate().skip(1) {
            if in_circle(p[a], p[b], p[apex], p[c]) > 0 {
                split = i;
                apex = c;
            }
        }
        self.connections.connect(a, apex);
        self.connections.connect(apex, b);
        self.retriangulate(a, apex, &chain[..split]);
        self.retriangulate(apex, b, &chain[split + 1..]);
    }

    /// Drops edges at each vertex that leave the counter-clockwise sweep from
    /// its successor to its predecessor, i.e. that point out of the plate.
    fn remove_outside_edges(&mut self) {
        let p = self.points;
        for v in 0..p.len() {
            let [prev, next] = self.links[v];
            let from = p[next as usize] - p[v];
            let to = p[prev as usize] - p[v];
            let outside = self.connections.lists[v]
                .iter()
                .copied()
                .filter(|&w| !in_ccw_sweep(from, to, p[w] - p[v]))
                .collect::<Vec<_>>();
            for w in outside {
                self.connections.disconnect(v, w);
            }
        }
    }

    /// Reads triangles off the neighbor lists. A triangle is emitted once, at
    /// its lowest vertex, when its three corners see each other as angularly
    /// adjacent neighbors.
    fn list_triangles(&self) -> Vec<[u32; 3]> {
        let p = self.points;
        let order = self
            .connections
            .lists
            .iter()
            .enumerate()
            .map(|(v, list)| {
                let mut list = list.clone();
                list.sort_by(|a, b| polar_angle(p[*a] - p[v]).total_cmp(&polar_angle(p[*b] - p[v])));
                list
            })
            .collect::<Vec<_>>();
        let next_ccw = |v: usize, after: usize| -> Option<usize> {
            let list = &order[v];
            let i = list.iter().position(|n| *n == after)?;
            Some(list[(i + 1) % list.len()])
        };

        let mut triangles = Vec::new();
        for (n, list) in order.iter().enumerate() {
            if list.len() < 2 {
                continue;
            }
            for (&a, &b) in list.iter().circular_tuple_windows() {
                if a < n || b < n || orient(p[n], p[a], p[b]) <= 0 {
                    continue;
                }
                let [prev, next] = self.links[n];
                if prev as usize == a && next as usize == b {
                    // the gap outside the plate
                    continue;
                }
                if next_ccw(a, b) == Some(n) && next_ccw(b, n) == Some(a) {
                    triangles.push([n as u32, a as u32, b as u32]);
                }
            }
        }
        triangles
    }
}

/// Links triangles sharing an edge.
pub fn link_triangles(triangles: &[[u32; 3]]) -> Vec<LocalTriangle> {
    let mut linked = triangles
        .iter()
        .map(|indices| LocalTriangle {
            indices: *indices,
            neighbors: [None; 3],
        })
        .collect::<Vec<_>>();
    let mut open_edges: HashMap<(u32, u32), (usize, usize)> = HashMap::new();
    for (t, indices) in triangles.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (indices[k], indices[(k + 1) % 3]);
            let key = (a.min(b), a.max(b));
            if let Some((other, other_k)) = open_edges.remove(&key) {
                linked[t].neighbors[k] = Some(other as u32);
                linked[other].neighbors[other_k] = Some(t as u32);
            } else {
                open_edges.insert(key, (t, k));
            }
        }
    }
    linked
}

/// Triangulates an outline. Outlines with fewer than three vertices produce
/// no triangles.
pub fn triangulate(outline: &Outline) -> Result<Vec<LocalTriangle>, TriangulationError> {
    let points = &outline.vertices;
    if points.len() < 3 {
        return Ok(Vec::new());
    }
    if points.iter().duplicates().next().is_some() {
        return Err(TriangulationError::RepeatedVertex);
    }

    let mut triangulator = Triangulator {
        points,
        links: &outline.links,
        connections: Connections {
            lists: delaunay_neighbors(points),
        },
    };
    for v in 0..points.len() {
        let next = outline.links[v][1] as usize;
        triangulator.insert_constraint(v, next)?;
    }
    triangulator.remove_outside_edges();
    Ok(link_triangles(&triangulator.list_triangles()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(loops: &[&[(i64, i64)]]) -> Outline {
        let mut outline = Outline::default();
        for points in loops {
            let first = outline.vertices.len() as u32;
            let count = points.len() as u32;
            outline
                .vertices
                .extend(points.iter().map(|(x, y)| I64Vec2::new(*x, *y)));
            outline.links.extend(
                (0..count).map(|i| [first + (i + count - 1) % count, first + (i + 1) % count]),
            );
        }
        outline
    }

    fn area2(outline: &Outline, triangles: &[LocalTriangle]) -> i64 {
        triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.indices.map(|i| outline.vertices[i as usize]);
                orient(a, b, c)
            })
            .sum()
    }

    fn assert_symmetric(triangles: &[LocalTriangle]) {
        for (t, triangle) in triangles.iter().enumerate() {
            for n in triangle.neighbors.iter().flatten() {
                assert!(
                    triangles[*n as usize].neighbors.contains(&Some(t as u32)),
                    "triangle {t} links {n} but not back"
                );
            }
        }
    }

    #[test]
    fn square_splits_in_two() {
        let outline = outline(&[&[(0, 0), (8, 0), (8, 8), (0, 8)]]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(triangles.len(), 2);
        assert_eq!(area2(&outline, &triangles), 128);
        assert_symmetric(&triangles);
        assert!(triangles.iter().all(|t| t.neighbors.iter().flatten().count() == 1));
    }

    #[test]
    fn concave_outline_keeps_the_notch_open() {
        // U shape: the notch between x = 4 and x = 8 above y = 4 is outside
        let outline = outline(&[&[
            (0, 0),
            (12, 0),
            (12, 12),
            (8, 12),
            (8, 4),
            (4, 4),
            (4, 12),
            (0, 12),
        ]]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(triangles.len(), 6);
        assert_eq!(area2(&outline, &triangles), 2 * (12 * 12 - 4 * 8));
        assert_symmetric(&triangles);
    }

    #[test]
    fn hole_is_left_empty() {
        let outline = outline(&[
            &[(0, 0), (40, 0), (40, 40), (0, 40)],
            &[(16, 16), (16, 24), (24, 24), (24, 16)],
        ]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(triangles.len(), 8);
        assert_eq!(area2(&outline, &triangles), 2 * (40 * 40 - 8 * 8));
        assert_symmetric(&triangles);
    }

    #[test]
    fn missing_boundary_edge_is_forced_in() {
        // No empty circle passes through (5, 20) and (35, 20) with (20, 21)
        // just above them, so that hole edge is not Delaunay.
        let outline = outline(&[
            &[(0, 0), (40, 0), (40, 40), (0, 40)],
            &[(5, 20), (20, 21), (35, 20)],
        ]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(triangles.len(), 7);
        assert_eq!(area2(&outline, &triangles), 2 * 1600 - 30);
        assert_symmetric(&triangles);
        for t in &triangles {
            let [a, b, c] = t.indices.map(|i| outline.vertices[i as usize]);
            assert!(orient(a, b, c) > 0, "triangle {:?} is not counter-clockwise", t.indices);
        }
        for (v, [_, next]) in outline.links.iter().enumerate() {
            let edge_used = triangles.iter().any(|t| {
                (0..3).any(|k| t.indices[k] == v as u32 && t.indices[(k + 1) % 3] == *next)
            });
            assert!(edge_used, "boundary edge {v}-{next} is not a triangle side");
        }
    }

    #[test]
    fn thin_notch_keeps_boundary_edges() {
        let outline = outline(&[&[(0, 0), (10, 0), (10, 10), (6, 10), (5, 1), (4, 10), (0, 10)]]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(triangles.len(), 5);
        assert_eq!(area2(&outline, &triangles), 182);
    }

    #[test]
    fn triangular_hole_is_not_a_triangle() {
        let outline = outline(&[
            &[(0, 0), (30, 0), (30, 30), (0, 30)],
            &[(10, 10), (15, 20), (20, 10)],
        ]);
        let triangles = triangulate(&outline).unwrap();
        assert_eq!(area2(&outline, &triangles), 2 * 900 - 100);
        assert_eq!(triangles.len(), 7);
    }

    #[test]
    fn repeated_vertex_is_rejected() {
        let outline = outline(&[&[(0, 0), (8, 0), (4, 4), (8, 8), (0, 8), (4, 4)]]);
        assert_eq!(triangulate(&outline), Err(TriangulationError::RepeatedVertex));
    }

    #[test]
    fn crossing_boundary_edges_are_reported() {
        let outline = outline(&[&[(0, 0), (8, 8), (8, 0), (0, 8)]]);
        assert!(matches!(
            triangulate(&outline),
            Err(TriangulationError::CrossingConstraints { .. })
        ));
    }

    #[test]
    fn boundary_edge_through_a_vertex_is_reported() {
        let outline = outline(&[&[(0, 0), (8, 0), (8, 8), (0, 8)], &[(4, 0), (3, 2), (5, 2)]]);
        assert_eq!(
            triangulate(&outline),
            Err(TriangulationError::ConstraintThroughVertex { from: 0, to: 1, vertex: 4 })
        );
    }
}
