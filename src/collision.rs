//! Clipping of points that left the mesh back onto the last valid triangle.

use bevy::math::Vec2;

use crate::NavMesh;

/// Searched around a last valid point that is not itself on the mesh.
const FALLBACK_RANGE: f32 = 2.0;
const FALLBACK_STEP: f32 = 0.25;

/// Clips `point` onto the counter-clockwise triangle `corners`.
///
/// Edges are tried in winding order. The first edge `point` lies outside of
/// with its projection falling within the edge gives the projection; when
/// every such projection misses its edge the point is clamped to the corner
/// it ran past. Points inside the triangle are returned unchanged.
pub fn clip_to_triangle(corners: [Vec2; 3], point: Vec2) -> Vec2 {
    let mut corner = None;
    for k in 0..3 {
        let (a, b) = (corners[k], corners[(k + 1) % 3]);
        let edge = b - a;
        if edge.perp_dot(point - a) >= 0.0 {
            continue;
        }
        let length_squared = edge.length_squared();
        if length_squared == 0.0 {
            continue;
        }
        let ratio = edge.dot(point - a) / length_squared;
        if ratio < 0.0 {
            corner = corner.or(Some(a));
        } else if ratio > 1.0 {
            corner = corner.or(Some(b));
        } else {
            return a + edge * ratio;
        }
    }
    corner.unwrap_or(point)
}

/// Moves `point` back inside the triangle holding `last`.
///
/// When `last` is not on the mesh either, the triangle nearest to it is used;
/// with no triangle around, `point` is left as it is.
pub(crate) fn push_in(mesh: &NavMesh, point: Vec2, last: Vec2) -> Vec2 {
    let triangle = mesh.triangle_at(last).or_else(|| {
        log::debug!("last position {last} is outside the navmesh");
        mesh.nearest_triangle(last, FALLBACK_RANGE, FALLBACK_STEP)
    });
    match triangle {
        Some(triangle) => clip_to_triangle(mesh.corners(triangle), point),
        None => point,
    }
}
