//! Full navmesh construction: plates are outlined and triangulated in
//! parallel, then flattened into the global arrays queried at runtime.

use bevy::math::Vec2;
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    NavMesh, NavMeshError, PlateRange, Triangle,
    contour::{OUTLINE_UNITS, Outline, Simplification, trace_plate},
    grid::TileGrid,
    plates::{Plate, Plates, extract_plates},
    quadtree::{IndexShape, TriangleIndex},
    triangulation::{LocalTriangle, triangulate},
    updater::NavMeshSettings,
};

fn validate(grid: &TileGrid, settings: &NavMeshSettings) -> Result<(), NavMeshError> {
    if grid.width() < 3 || grid.height() < 3 {
        return Err(NavMeshError::GridTooSmall {
            width: grid.width(),
            height: grid.height(),
        });
    }
    let invalid = if settings.tiles_per_unit <= 0.0 || !settings.tiles_per_unit.is_finite() {
        Some("tiles_per_unit must be positive")
    } else if settings.cost_scale <= 0.0 || !settings.cost_scale.is_finite() {
        Some("cost_scale must be positive")
    } else if settings.index_cell_size <= 0.0 || !settings.index_cell_size.is_finite() {
        Some("index_cell_size must be positive")
    } else if !(0.0..1.0).contains(&settings.destination_pull) {
        Some("destination_pull must be in [0, 1)")
    } else {
        None
    };
    match invalid {
        Some(reason) => Err(NavMeshError::InvalidSettings(reason)),
        None => Ok(()),
    }
}

/// Costs and centroid of a triangle from its world-space corners.
fn measure(corners: [Vec2; 3], cost_scale: f32) -> ([u32; 3], Vec2) {
    let midpoints = [0, 1, 2].map(|k| (corners[k] + corners[(k + 1) % 3]) / 2.0);
    let dists = [0, 1, 2].map(|k| (midpoints[k].distance(midpoints[(k + 1) % 3]) * cost_scale) as u32);
    let centroid = (midpoints[0] + midpoints[1] + midpoints[2]) / 3.0;
    (dists, centroid)
}

/// Outlines and triangulates one plate. A simplified outline that cannot be
/// triangulated is traced again corner by corner.
fn triangulate_plate(
    plates: &Plates,
    id: u32,
    plate: &Plate,
    simplification: Simplification,
) -> (Outline, Vec<LocalTriangle>) {
    let outline = trace_plate(plates, id, plate, simplification);
    let err = match triangulate(&outline) {
        Ok(triangles) => return (outline, triangles),
        Err(err) => err,
    };
    log::debug!("plate {id}: {err}, retracing without simplification");
    let exact = trace_plate(plates, id, plate, Simplification::EXACT);
    match triangulate(&exact) {
        Ok(triangles) => (exact, triangles),
        Err(err) => {
            log::warn!("plate {id} left untriangulated: {err}");
            (exact, Vec::new())
        }
    }
}

#[cfg_attr(feature = "tracing", instrument(skip_all))]
pub(crate) fn build(grid: &TileGrid, settings: &NavMeshSettings) -> Result<NavMesh, NavMeshError> {
    validate(grid, settings)?;

    let plates = extract_plates(grid);
    let simplification = Simplification {
        tolerance: settings.simplify_tolerance,
        min_run: settings.simplify_min_run,
    };
    let pieces: Vec<(Outline, Vec<LocalTriangle>)> = plates
        .plates
        .par_iter()
        .enumerate()
        .map(|(id, plate)| triangulate_plate(&plates, id as u32, plate, simplification))
        .collect();

    let scale = settings.tiles_per_unit;
    let outline_scale = scale * OUTLINE_UNITS as f32;
    let mut vertices = Vec::with_capacity(pieces.iter().map(|(o, _)| o.len()).sum());
    let mut vertex_links = Vec::with_capacity(vertices.capacity());
    let mut triangles = Vec::with_capacity(pieces.iter().map(|(_, t)| t.len()).sum());
    let mut ranges = Vec::with_capacity(pieces.len());

    for (outline, local) in pieces {
        let vertex_offset = vertices.len() as u32;
        let triangle_offset = triangles.len() as u32;
        vertices.extend(outline.vertices.iter().map(|v| v.as_vec2() / outline_scale));
        vertex_links.extend(
            outline
                .links
                .iter()
                .map(|link| link.map(|v| v + vertex_offset)),
        );
        for triangle in local {
            let indices = triangle.indices.map(|v| v + vertex_offset);
            let corners = indices.map(|v| vertices[v as usize]);
            let (dists, centroid) = measure(corners, settings.cost_scale);
            triangles.push(Triangle {
                indices,
                neighbors: triangle.neighbors.map(|n| n.map(|n| n + triangle_offset)),
                dists,
                centroid,
            });
        }
        ranges.push(PlateRange {
            vertices: vertex_offset..vertices.len() as u32,
            triangles: triangle_offset..triangles.len() as u32,
        });
    }

    let size = Vec2::new(grid.width() as f32, grid.height() as f32) / scale;
    let corners = triangles
        .iter()
        .map(|t: &Triangle| t.indices.map(|v| vertices[v as usize]))
        .collect();
    let index = TriangleIndex::build(
        corners,
        size,
        IndexShape {
            cell_size: settings.index_cell_size,
            capacity: settings.index_node_capacity.max(1),
            max_depth: settings.index_max_depth,
        },
    );

    log::debug!(
        "built navmesh: {} plates, {} vertices, {} triangles",
        ranges.len(),
        vertices.len(),
        triangles.len()
    );

    Ok(NavMesh {
        vertices,
        vertex_links,
        triangles,
        plates: ranges,
        index,
        size,
        settings: settings.clone(),
    })
}
