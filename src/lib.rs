//! Navigation meshes for tile-based worlds.
//!
//! A blocked/free [`TileGrid`] is split into plates (connected walkable
//! regions), whose outlines are triangulated into a [`NavMesh`]. The mesh
//! answers point-location, path and collision queries; [`world::NavWorld`]
//! wraps one mesh and the pool of waypoint chains handed out to agents, and
//! [`updater::TileNavigatorPlugin`] rebuilds meshes of grid entities in Bevy.

#![warn(missing_debug_implementations)]

use std::{fmt, ops::Range};

#[cfg(feature = "tracing")]
use tracing::instrument;

use bevy::{
    asset::RenderAssetUsages,
    prelude::*,
    render::mesh::{Indices, PrimitiveTopology},
};

mod builder;
pub mod collision;
mod contour;
pub mod geometry;
pub mod grid;
mod path;
pub mod plates;
pub mod pool;
pub mod quadtree;
mod triangulation;
pub mod updater;
pub mod world;

use geometry::{Rect2, distance_to_triangle};
use grid::TileGrid;
pub use path::PathScratch;
use quadtree::TriangleIndex;
use updater::NavMeshSettings;

/// Commonly used types.
pub mod prelude {
    pub use crate::grid::TileGrid;
    pub use crate::pool::{PathNode, PathNodeId, PathPool};
    pub use crate::updater::{
        ManagedNavMesh, NavMeshBundle, NavMeshSettings, NavMeshStatus, NavMeshUpdateMode,
        TileNavigatorPlugin,
    };
    pub use crate::world::NavWorld;
    pub use crate::{NavMesh, NavMeshError, PathScratch, Triangle};
}

/// Index of a triangle in a [`NavMesh`].
pub type TriangleId = u32;

/// A triangle of the navmesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// Vertex ids, counter-clockwise.
    pub indices: [u32; 3],
    /// Triangle across edge `indices[k] -> indices[(k + 1) % 3]`.
    pub neighbors: [Option<TriangleId>; 3],
    /// Fixed-point distance between the midpoints of edge `k` and edge `k + 1`.
    pub dists: [u32; 3],
    /// Mean of the edge midpoints.
    pub centroid: Vec2,
}

/// Where a plate's vertices and triangles sit in the global arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRange {
    pub vertices: Range<u32>,
    pub triangles: Range<TriangleId>,
}

/// Errors building a [`NavMesh`].
#[derive(Debug, Clone, PartialEq)]
pub enum NavMeshError {
    /// The grid cannot hold anything inside its always-blocked border.
    GridTooSmall { width: usize, height: usize },
    /// The blocked bitmap does not have `width * height` entries.
    BitmapSize { expected: usize, actual: usize },
    /// A setting is out of its valid range.
    InvalidSettings(&'static str),
}

impl fmt::Display for NavMeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavMeshError::GridTooSmall { width, height } => {
                write!(f, "grid of {width}x{height} tiles is too small for a navmesh")
            }
            NavMeshError::BitmapSize { expected, actual } => {
                write!(f, "blocked bitmap has {actual} tiles, expected {expected}")
            }
            NavMeshError::InvalidSettings(reason) => write!(f, "invalid navmesh settings: {reason}"),
        }
    }
}

impl std::error::Error for NavMeshError {}

/// Triangulated walkable area of a tile grid, in world units.
#[derive(Asset, TypePath, Debug, Clone)]
pub struct NavMesh {
    pub(crate) vertices: Vec<Vec2>,
    /// `[predecessor, successor]` of each vertex along its boundary loop.
    pub(crate) vertex_links: Vec<[u32; 2]>,
    pub(crate) triangles: Vec<Triangle>,
    pub(crate) plates: Vec<PlateRange>,
    pub(crate) index: TriangleIndex,
    pub(crate) size: Vec2,
    pub(crate) settings: NavMeshSettings,
}

impl NavMesh {
    /// Builds the navmesh of `grid`. Any previous mesh is meant to be replaced
    /// as a whole by the result.
    pub fn build(grid: &TileGrid, settings: &NavMeshSettings) -> Result<NavMesh, NavMeshError> {
        builder::build(grid, settings)
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    /// Boundary loop neighbors of each vertex, as `[predecessor, successor]`.
    pub fn vertex_links(&self) -> &[[u32; 2]] {
        &self.vertex_links
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn plates(&self) -> &[PlateRange] {
        &self.plates
    }

    pub fn settings(&self) -> &NavMeshSettings {
        &self.settings
    }

    /// Extent of the mesh area, from the origin.
    pub fn size(&self) -> Vec2 {
        self.size
    }

    /// Corners of a triangle.
    pub fn corners(&self, triangle: TriangleId) -> [Vec2; 3] {
        self.triangles[triangle as usize]
            .indices
            .map(|v| self.vertices[v as usize])
    }

    /// Plate a triangle belongs to.
    pub fn plate_of(&self, triangle: TriangleId) -> Option<usize> {
        let plate = self.plates.partition_point(|range| range.triangles.end <= triangle);
        self.plates
            .get(plate)
            .filter(|range| range.triangles.contains(&triangle))
            .map(|_| plate)
    }

    /// Triangle containing `point`.
    #[inline]
    pub fn triangle_at(&self, point: Vec2) -> Option<TriangleId> {
        self.index.locate(point)
    }

    pub fn is_in_mesh(&self, point: Vec2) -> bool {
        self.triangle_at(point).is_some()
    }

    /// Triangle containing `point` or, failing that, the closest triangle
    /// touching a square around it. The square grows by `step` up to a
    /// half-size of `range`.
    pub fn nearest_triangle(&self, point: Vec2, range: f32, step: f32) -> Option<TriangleId> {
        if let Some(triangle) = self.triangle_at(point) {
            return Some(triangle);
        }
        let step = if step > 0.0 { step } else { range };
        let mut half = step;
        while half <= range {
            let region = Rect2::around(point, half);
            if self.index.any_intersecting(&region).is_none() {
                half += step;
                continue;
            }
            let closest = self
                .index
                .intersecting(&region)
                .into_iter()
                .map(|t| (t, distance_to_triangle(self.corners(t), point)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((triangle, _)) = closest {
                return Some(triangle);
            }
            half += step;
        }
        None
    }

    /// Waypoints from `from` to `to`, excluding `from`. The last one is `to`,
    /// or a substitute inside the start's plate when `to` is not reachable.
    #[cfg_attr(feature = "tracing", instrument(skip(self)))]
    pub fn path(&self, from: Vec2, to: Vec2) -> Option<Vec<Vec2>> {
        path::plan(self, from, to).map(|plan| plan.waypoints)
    }

    /// Same as [`NavMesh::path`], planning in `scratch` instead of allocating.
    /// The waypoints stay readable from `scratch` until its next query.
    pub fn path_with<'s>(&self, scratch: &'s mut PathScratch, from: Vec2, to: Vec2) -> Option<&'s [Vec2]> {
        path::plan_with(self, scratch, from, to)
    }

    /// `point` clipped onto the triangle holding `last`.
    pub fn push_in(&self, point: Vec2, last: Vec2) -> Vec2 {
        collision::push_in(self, point, last)
    }

    /// Raw vertex positions and triangle indices, for visualization.
    pub fn debug_buffers(&self) -> (Vec<[f32; 2]>, Vec<u32>) {
        (
            self.vertices.iter().map(|v| v.to_array()).collect(),
            self.triangles.iter().flat_map(|t| t.indices).collect(),
        )
    }

    /// Exports the mesh as a Bevy [`Mesh`] in the `z = 0` plane.
    pub fn to_mesh(&self) -> Mesh {
        let mut new_mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
        new_mesh.insert_attribute(
            Mesh::ATTRIBUTE_POSITION,
            self.vertices
                .iter()
                .map(|v| [v.x, v.y, 0.0])
                .collect::<Vec<[f32; 3]>>(),
        );
        new_mesh.insert_indices(Indices::U32(
            self.triangles.iter().flat_map(|t| t.indices).collect(),
        ));
        new_mesh.insert_attribute(
            Mesh::ATTRIBUTE_NORMAL,
            (0..self.vertices.len())
                .map(|_| [0.0, 0.0, 1.0])
                .collect::<Vec<[f32; 3]>>(),
        );
        new_mesh.insert_attribute(
            Mesh::ATTRIBUTE_UV_0,
            self.vertices
                .iter()
                .map(|v| [v.x, v.y])
                .collect::<Vec<[f32; 2]>>(),
        );
        new_mesh
    }
}
