//! Divide-and-conquer Delaunay triangulation on a quad-edge arena.
//!
//! Edges live in groups of four directed records (`e`, `rot e`, `sym e`,
//! `rot⁻¹ e`) addressed by index, so the structure needs no pointers. Only
//! primal records carry an origin vertex.

use bevy::math::I64Vec2;

use crate::geometry::{in_circle, orient};

type EdgeRef = usize;

const NO_VERTEX: usize = usize::MAX;

#[inline]
fn rot(e: EdgeRef) -> EdgeRef {
    (e & !3) | ((e + 1) & 3)
}

#[inline]
fn sym(e: EdgeRef) -> EdgeRef {
    (e & !3) | ((e + 2) & 3)
}

#[inline]
fn inv_rot(e: EdgeRef) -> EdgeRef {
    (e & !3) | ((e + 3) & 3)
}

struct QuadEdges<'a> {
    points: &'a [I64Vec2],
    next: Vec<EdgeRef>,
    origin: Vec<usize>,
    alive: Vec<bool>,
}

impl<'a> QuadEdges<'a> {
    fn onext(&self, e: EdgeRef) -> EdgeRef {
        self.next[e]
    }

    fn oprev(&self, e: EdgeRef) -> EdgeRef {
        rot(self.onext(rot(e)))
    }

    fn lnext(&self, e: EdgeRef) -> EdgeRef {
        rot(self.onext(inv_rot(e)))
    }

    fn rprev(&self, e: EdgeRef) -> EdgeRef {
        self.onext(sym(e))
    }

    fn org(&self, e: EdgeRef) -> usize {
        self.origin[e]
    }

    fn dest(&self, e: EdgeRef) -> usize {
        self.origin[sym(e)]
    }

    fn point(&self, v: usize) -> I64Vec2 {
        self.points[v]
    }

    fn make_edge(&mut self, org: usize, dest: usize) -> EdgeRef {
        let e = self.next.len();
        self.next.extend([e, e + 3, e + 2, e + 1]);
        self.origin.extend([org, NO_VERTEX, dest, NO_VERTEX]);
        self.alive.push(true);
        e
    }

    fn splice(&mut self, a: EdgeRef, b: EdgeRef) {
        let alpha = rot(self.onext(a));
        let beta = rot(self.onext(b));
        self.next.swap(a, b);
        self.next.swap(alpha, beta);
    }

    fn connect(&mut self, a: EdgeRef, b: EdgeRef) -> EdgeRef {
        let e = self.make_edge(self.dest(a), self.org(b));
        let lnext = self.lnext(a);
        self.splice(e, lnext);
        self.splice(sym(e), b);
        e
    }

    fn delete(&mut self, e: EdgeRef) {
        let oprev = self.oprev(e);
        self.splice(e, oprev);
        let oprev = self.oprev(sym(e));
        self.splice(sym(e), oprev);
        self.alive[e / 4] = false;
    }

    fn ccw(&self, a: usize, b: usize, c: usize) -> bool {
        orient(self.point(a), self.point(b), self.point(c)) > 0
    }

    fn right_of(&self, v: usize, e: EdgeRef) -> bool {
        self.ccw(v, self.dest(e), self.org(e))
    }

    fn left_of(&self, v: usize, e: EdgeRef) -> bool {
        self.ccw(v, self.org(e), self.dest(e))
    }

    fn in_circle(&self, a: usize, b: usize, c: usize, d: usize) -> bool {
        in_circle(self.point(a), self.point(b), self.point(c), self.point(d)) > 0
    }

    /// Triangulates the sorted vertex ids in `ids`, returning the
    /// counter-clockwise hull edge leaving the leftmost vertex and the
    /// clockwise hull edge leaving the rightmost one.
    fn triangulate(&mut self, ids: &[usize]) -> (EdgeRef, EdgeRef) {
        match ids.len() {
            2 => {
                let a = self.make_edge(ids[0], ids[1]);
                (a, sym(a))
            }
            3 => {
                let (s1, s2, s3) = (ids[0], ids[1], ids[2]);
                let a = self.make_edge(s1, s2);
                let b = self.make_edge(s2, s3);
                self.splice(sym(a), b);
                if self.ccw(s1, s2, s3) {
                    self.connect(b, a);
                    (a, sym(b))
                } else if self.ccw(s1, s3, s2) {
                    let c = self.connect(b, a);
                    (sym(c), c)
                } else {
                    // collinear: left as a chain
                    (a, sym(b))
                }
            }
            n => {
                let (left, right) = ids.split_at(n / 2);
                let (mut ldo, mut ldi) = self.triangulate(left);
                let (mut rdi, mut rdo) = self.triangulate(right);
                self.merge(&mut ldo, &mut ldi, &mut rdi, &mut rdo);
                (ldo, rdo)
            }
        }
    }

    fn merge(&mut self, ldo: &mut EdgeRef, ldi: &mut EdgeRef, rdi: &mut EdgeRef, rdo: &mut EdgeRef) {
        // lower common tangent of the two hulls
        loop {
            if self.left_of(self.org(*rdi), *ldi) {
                *ldi = self.lnext(*ldi);
            } else if self.right_of(self.org(*ldi), *rdi) {
                *rdi = self.rprev(*rdi);
            } else {
                break;
            }
        }

        let mut basel = self.connect(sym(*rdi), *ldi);
        if self.org(*ldi) == self.org(*ldo) {
            *ldo = sym(basel);
        }
        if self.org(*rdi) == self.org(*rdo) {
            *rdo = basel;
        }

        // sew upward, dropping candidates that fail the empty-circle test
        loop {
            let mut lcand = self.onext(sym(basel));
            if self.valid(lcand, basel) {
                while self.in_circle(
                    self.dest(basel),
                    self.org(basel),
                    self.dest(lcand),
                    self.dest(self.onext(lcand)),
                ) {
                    let t = self.onext(lcand);
                    self.delete(lcand);
                    lcand = t;
                }
            }

            let mut rcand = self.oprev(basel);
            if self.valid(rcand, basel) {
                while self.in_circle(
                    self.dest(basel),
                    self.org(basel),
                    self.dest(rcand),
                    self.dest(self.oprev(rcand)),
                ) {
                    let t = self.oprev(rcand);
                    self.delete(rcand);
                    rcand = t;
                }
            }

            let lvalid = self.valid(lcand, basel);
            let rvalid = self.valid(rcand, basel);
            if !lvalid && !rvalid {
                break;
            }
            basel = if !lvalid
                || (rvalid
                    && self.in_circle(
                        self.dest(lcand),
                        self.org(lcand),
                        self.org(rcand),
                        self.dest(rcand),
                    )) {
                self.connect(rcand, sym(basel))
            } else {
                self.connect(sym(basel), sym(lcand))
            };
        }
    }

    fn valid(&self, e: EdgeRef, basel: EdgeRef) -> bool {
        self.right_of(self.dest(e), basel)
    }
}

/// Delaunay triangulation of `points`, returned as symmetric neighbor lists.
///
/// Points must be pairwise distinct. Fewer than two points give no edges.
pub fn delaunay_neighbors(points: &[I64Vec2]) -> Vec<Vec<usize>> {
    let mut neighbors = vec![Vec::new(); points.len()];
    if points.len() < 2 {
        return neighbors;
    }

    let mut sorted = (0..points.len()).collect::<Vec<_>>();
    sorted.sort_by_key(|&i| (points[i].x, points[i].y));

    let mut edges = QuadEdges {
        points,
        next: Vec::with_capacity(points.len() * 12),
        origin: Vec::with_capacity(points.len() * 12),
        alive: Vec::with_capacity(points.len() * 3),
    };
    edges.triangulate(&sorted);

    for (quad, alive) in edges.alive.iter().enumerate() {
        if *alive {
            let e = quad * 4;
            let (a, b) = (edges.org(e), edges.dest(e));
            neighbors[a].push(b);
            neighbors[b].push(a);
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge_count(neighbors: &[Vec<usize>]) -> usize {
        neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    #[test]
    fn square_gets_five_edges() {
        let points = [
            I64Vec2::new(0, 0),
            I64Vec2::new(4, 0),
            I64Vec2::new(4, 4),
            I64Vec2::new(0, 4),
        ];
        let neighbors = delaunay_neighbors(&points);
        assert_eq!(edge_count(&neighbors), 5);
        for (v, list) in neighbors.iter().enumerate() {
            for n in list {
                assert!(neighbors[*n].contains(&v), "asymmetric edge {v}-{n}");
            }
        }
    }

    #[test]
    fn collinear_points_form_a_chain() {
        let points = [
            I64Vec2::new(0, 0),
            I64Vec2::new(0, 1),
            I64Vec2::new(0, 2),
            I64Vec2::new(0, 3),
            I64Vec2::new(0, 4),
        ];
        let neighbors = delaunay_neighbors(&points);
        assert_eq!(edge_count(&neighbors), 4);
        assert_eq!(neighbors[2].len(), 2);
    }

    #[test]
    fn edge_count_matches_euler_formula() {
        // 3n - 3 - h edges for n points with h of them on the hull
        let mut points = Vec::new();
        for (x, y) in [(0, 0), (10, 0), (10, 10), (0, 10)] {
            points.push(I64Vec2::new(x, y));
        }
        for (x, y) in [(3, 2), (7, 3), (5, 6), (2, 7), (8, 8), (4, 4)] {
            points.push(I64Vec2::new(x, y));
        }
        let neighbors = delaunay_neighbors(&points);
        assert_eq!(edge_count(&neighbors), 3 * points.len() - 3 - 4);
    }

    #[test]
    fn result_is_delaunay() {
        let points = [(0, 0), (9, 1), (13, 7), (6, 12), (1, 8), (5, 5), (8, 4), (3, 3)]
            .map(|(x, y)| I64Vec2::new(x, y));
        let neighbors = delaunay_neighbors(&points);
        for a in 0..points.len() {
            for &b in &neighbors[a] {
                for &c in &neighbors[b] {
                    if c == a || !neighbors[c].contains(&a) {
                        continue;
                    }
                    if orient(points[a], points[b], points[c]) <= 0 {
                        continue;
                    }
                    let (pa, pb, pc) = (points[a], points[b], points[c]);
                    let strictly_inside = |p: I64Vec2| {
                        orient(pa, pb, p) > 0 && orient(pb, pc, p) > 0 && orient(pc, pa, p) > 0
                    };
                    if points.iter().any(|p| strictly_inside(*p)) {
                        // separating cycle, not a face
                        continue;
                    }
                    for (d, point) in points.iter().enumerate() {
                        if d == a || d == b || d == c {
                            continue;
                        }
                        assert!(
                            in_circle(pa, pb, pc, *point) <= 0,
                            "point {d} inside circumcircle of face {a}-{b}-{c}"
                        );
                    }
                }
            }
        }
    }
}
