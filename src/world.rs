//! Single-mesh facade for game simulation code.

use bevy::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    NavMesh, NavMeshError, PathScratch,
    grid::TileGrid,
    pool::{PathNode, PathNodeId, PathPool},
    updater::NavMeshSettings,
};

/// The navmesh of the world and the waypoint chains handed out for it.
///
/// Rebuilding replaces the mesh as a whole. Chains already handed out stay
/// valid in the pool but describe the old mesh.
#[derive(Resource, Debug, Default)]
pub struct NavWorld {
    settings: NavMeshSettings,
    mesh: Option<NavMesh>,
    pool: PathPool,
    scratch: PathScratch,
}

impl NavWorld {
    pub fn new(settings: NavMeshSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Rebuilds the mesh from a `width` by `height` blocked bitmap, row by row
    /// from `y = 0`. On error the previous mesh is kept.
    #[cfg_attr(feature = "tracing", instrument(skip(self, blocked)))]
    pub fn setup_nav_mesh(&mut self, width: usize, height: usize, blocked: &[bool]) -> Result<(), NavMeshError> {
        let grid = TileGrid::from_bitmap(width, height, blocked.to_vec()).ok_or(NavMeshError::BitmapSize {
            expected: width * height,
            actual: blocked.len(),
        })?;
        self.mesh = Some(NavMesh::build(&grid, &self.settings)?);
        Ok(())
    }

    /// Drops the mesh. Queries then find no path and nothing blocked.
    pub fn delete_nav_mesh(&mut self) {
        self.mesh = None;
    }

    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.mesh.as_ref()
    }

    /// Plans a path and hands its waypoint chain to the caller, head first.
    /// The start point itself is not part of the chain.
    pub fn find_path(&mut self, start_x: f32, start_y: f32, dest_x: f32, dest_y: f32) -> Option<PathNodeId> {
        let mesh = self.mesh.as_ref()?;
        let waypoints = mesh.path_with(&mut self.scratch, Vec2::new(start_x, start_y), Vec2::new(dest_x, dest_y))?;
        self.pool.chain(waypoints)
    }

    /// Whether `(x, y)` is outside every triangle of the mesh.
    pub fn is_blocked(&self, x: f32, y: f32) -> bool {
        self.mesh
            .as_ref()
            .is_some_and(|mesh| !mesh.is_in_mesh(Vec2::new(x, y)))
    }

    /// Clips `(x, y)` in place onto the triangle holding `(last_x, last_y)`.
    pub fn push_in(&self, x: &mut f32, y: &mut f32, last_x: f32, last_y: f32) {
        let Some(mesh) = &self.mesh else {
            return;
        };
        let point = mesh.push_in(Vec2::new(*x, *y), Vec2::new(last_x, last_y));
        (*x, *y) = (point.x, point.y);
    }

    pub fn node(&self, id: PathNodeId) -> Option<&PathNode> {
        self.pool.get(id)
    }

    /// Frees the head of a chain and returns the rest of it.
    pub fn advance(&mut self, head: PathNodeId) -> Option<PathNodeId> {
        self.pool.advance(head)
    }

    pub fn pool(&self) -> &PathPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PathPool {
        &mut self.pool
    }
}
