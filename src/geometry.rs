//! Geometric predicates.
//!
//! Construction works on integer tile corners so orientation and in-circle
//! tests are exact; queries work on `Vec2` in world units.

use bevy::math::{I64Vec2, Vec2};

/// Twice the signed area of `abc`: positive when counter-clockwise.
#[inline]
pub fn orient(a: I64Vec2, b: I64Vec2, c: I64Vec2) -> i64 {
    (b - a).perp_dot(c - a)
}

/// Positive when `d` lies strictly inside the circumcircle of the
/// counter-clockwise triangle `abc`, zero when cocircular.
pub fn in_circle(a: I64Vec2, b: I64Vec2, c: I64Vec2, d: I64Vec2) -> i128 {
    let (adx, ady) = ((a.x - d.x) as i128, (a.y - d.y) as i128);
    let (bdx, bdy) = ((b.x - d.x) as i128, (b.y - d.y) as i128);
    let (cdx, cdy) = ((c.x - d.x) as i128, (c.y - d.y) as i128);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    ad * (bdx * cdy - cdx * bdy) + bd * (cdx * ady - adx * cdy) + cd * (adx * bdy - bdx * ady)
}

/// `true` when the open segments `ab` and `cd` cross at a single interior point.
pub fn segments_cross(a: I64Vec2, b: I64Vec2, c: I64Vec2, d: I64Vec2) -> bool {
    let o1 = orient(a, b, c).signum();
    let o2 = orient(a, b, d).signum();
    let o3 = orient(c, d, a).signum();
    let o4 = orient(c, d, b).signum();
    o1 * o2 < 0 && o3 * o4 < 0
}

/// Whether direction `c` lies in the counter-clockwise sweep from direction
/// `from` to direction `to`, all taken from the same origin. Both bounds are
/// included.
pub fn in_ccw_sweep(from: I64Vec2, to: I64Vec2, c: I64Vec2) -> bool {
    let turn = from.perp_dot(to);
    if turn > 0 {
        from.perp_dot(c) >= 0 && c.perp_dot(to) >= 0
    } else if turn == 0 && from.dot(to) < 0 {
        from.perp_dot(c) >= 0
    } else if turn == 0 {
        // Zero-width sweep reads as the full turn.
        true
    } else {
        !(to.perp_dot(c) > 0 && c.perp_dot(from) > 0)
    }
}

/// Polar angle of `v`, used to order neighbors around a vertex.
#[inline]
pub fn polar_angle(v: I64Vec2) -> f64 {
    (v.y as f64).atan2(v.x as f64)
}

/// Point-in-triangle test with boundary points counting as inside.
pub fn triangle_contains(a: Vec2, b: Vec2, c: Vec2, p: Vec2) -> bool {
    let d1 = (b - a).perp_dot(p - a);
    let d2 = (c - b).perp_dot(p - b);
    let d3 = (a - c).perp_dot(p - c);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Axis-aligned rectangle, `min` inclusive and `max` inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect2 {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Whether the rectangles overlap or touch.
    pub fn overlaps(&self, other: &Rect2) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// Square of half-size `half` centered on `center`.
    pub fn around(center: Vec2, half: f32) -> Self {
        Self {
            min: center - Vec2::splat(half),
            max: center + Vec2::splat(half),
        }
    }

    fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

/// Separating-axis overlap of a triangle and a rectangle. Touching counts.
pub fn triangle_intersects_rect(tri: [Vec2; 3], rect: &Rect2) -> bool {
    let min = tri[0].min(tri[1]).min(tri[2]);
    let max = tri[0].max(tri[1]).max(tri[2]);
    if min.x > rect.max.x || max.x < rect.min.x || min.y > rect.max.y || max.y < rect.min.y {
        return false;
    }
    let corners = rect.corners();
    for i in 0..3 {
        let (a, b, opposite) = (tri[i], tri[(i + 1) % 3], tri[(i + 2) % 3]);
        let edge = b - a;
        let side = edge.perp_dot(opposite - a);
        if side == 0.0 {
            continue;
        }
        if corners.iter().all(|corner| edge.perp_dot(*corner - a) * side < 0.0) {
            return false;
        }
    }
    true
}

/// Closest point to `p` on the segment `ab`.
pub fn closest_on_segment(a: Vec2, b: Vec2, p: Vec2) -> Vec2 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared == 0.0 {
        return a;
    }
    let ratio = ((p - a).dot(ab) / length_squared).clamp(0.0, 1.0);
    a + ab * ratio
}

/// Distance from `p` to the closed triangle `abc`, zero inside.
pub fn distance_to_triangle(tri: [Vec2; 3], p: Vec2) -> f32 {
    if triangle_contains(tri[0], tri[1], tri[2], p) {
        return 0.0;
    }
    (0..3)
        .map(|k| closest_on_segment(tri[k], tri[(k + 1) % 3], p).distance(p))
        .fold(f32::INFINITY, f32::min)
}
