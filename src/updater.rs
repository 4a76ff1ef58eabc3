use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

use bevy::prelude::*;

use crate::{NavMesh, NavMeshError, grid::TileGrid, world::NavWorld};

/// Bundle for preparing an auto updated navmesh. To use with plugin [`TileNavigatorPlugin`].
#[derive(Bundle, Debug)]
pub struct NavMeshBundle {
    /// Blocked/free tiles the navmesh is built from.
    pub grid: TileGrid,
    /// Settings for this navmesh updates.
    pub settings: NavMeshSettings,
    /// Status of the last navmesh update.
    pub status: NavMeshStatus,
    /// Handle to the navmesh.
    pub handle: ManagedNavMesh,
    /// How to trigger navmesh updates.
    pub update_mode: NavMeshUpdateMode,
}

impl NavMeshBundle {
    /// Bundle for `grid` with default settings, rebuilt on every change.
    pub fn new(grid: TileGrid) -> Self {
        Self {
            grid,
            settings: NavMeshSettings::default(),
            status: NavMeshStatus::Building,
            handle: ManagedNavMesh::default(),
            update_mode: NavMeshUpdateMode::Direct,
        }
    }
}

/// Settings for nav mesh generation.
#[derive(Component, Clone, Debug, PartialEq)]
pub struct NavMeshSettings {
    /// Grid tiles per world unit.
    pub tiles_per_unit: f32,
    /// Deviation from the running direction of a boundary before a vertex is kept.
    pub simplify_tolerance: f32,
    /// Boundary steps since the last vertex before a new one may be kept.
    pub simplify_min_run: usize,
    /// Fixed-point units per world unit used for path costs.
    pub cost_scale: f32,
    /// Side of the top-level cells of the point-location index, in world units.
    pub index_cell_size: f32,
    /// Triangles an index node holds before it splits.
    pub index_node_capacity: usize,
    /// Maximum split depth of an index cell.
    pub index_max_depth: usize,
    /// How far waypoints are moved away from the corners they go around.
    pub waypoint_clearance: f32,
    /// Fraction of the distance kept each step while pulling an unreachable
    /// destination towards a triangle of the start plate.
    pub destination_pull: f32,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            tiles_per_unit: 8.0,
            simplify_tolerance: 4.0,
            simplify_min_run: 3,
            cost_scale: 100.0,
            index_cell_size: 16.0,
            index_node_capacity: 8,
            index_max_depth: 8,
            waypoint_clearance: 0.25,
            destination_pull: 0.8,
        }
    }
}

/// Status of the navmesh generation
#[derive(Component, Debug, Copy, Clone, PartialEq, Eq)]
pub enum NavMeshStatus {
    /// Not yet built
    Building,
    /// Built and ready to use
    Built,
    /// Last build command failed. The mesh may still be available from a previous build, but it will be out of date.
    Failed,
}

/// Control when to update the navmesh
#[derive(Component, Debug, Copy, Clone, PartialEq)]
pub enum NavMeshUpdateMode {
    /// On every change
    Direct,
    /// On every debounced change, at maximum every `f32` seconds
    Debounced(f32),
    /// On demand, set it to `true` to trigger an update
    OnDemand(bool),
}

/// Handle to the navmesh built for an entity.
#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct ManagedNavMesh(pub Handle<NavMesh>);

#[cfg_attr(feature = "tracing", instrument(skip_all))]
fn build_navmesh(grid: &TileGrid, settings: &NavMeshSettings) -> Result<NavMesh, NavMeshError> {
    NavMesh::build(grid, settings)
}

fn update_navmesh(
    mut commands: Commands,
    mut navmeshes: Query<(
        Entity,
        Ref<TileGrid>,
        Ref<NavMeshSettings>,
        &NavMeshUpdateMode,
        &mut ManagedNavMesh,
        &mut NavMeshStatus,
    )>,
    mut assets: ResMut<Assets<NavMesh>>,
    time: Res<Time>,
    mut ready_to_update: Local<HashMap<Entity, (f32, bool)>>,
) {
    let mut retrigger = vec![];
    ready_to_update.retain(|entity, (remaining, pending)| {
        *remaining -= time.delta_secs();
        if *remaining < 0.0 {
            if *pending {
                retrigger.push(*entity);
            }
            false
        } else {
            true
        }
    });

    let mut to_check = navmeshes
        .iter()
        .filter_map(|(entity, grid, settings, mode, _, _)| {
            (grid.is_changed() || settings.is_changed() || matches!(mode, NavMeshUpdateMode::OnDemand(true)))
                .then_some(entity)
        })
        .chain(retrigger)
        .collect::<Vec<_>>();
    to_check.sort_unstable();
    to_check.dedup();

    for entity in to_check {
        let Ok((entity, grid, settings, update_mode, mut handle, mut status)) = navmeshes.get_mut(entity) else {
            continue;
        };
        if let Some(val) = ready_to_update.get_mut(&entity) {
            val.1 = true;
            continue;
        }
        match *update_mode {
            NavMeshUpdateMode::Debounced(seconds) => {
                ready_to_update.insert(entity, (seconds, false));
            }
            NavMeshUpdateMode::OnDemand(false) => {
                continue;
            }
            NavMeshUpdateMode::OnDemand(true) => {
                commands.entity(entity).insert(NavMeshUpdateMode::OnDemand(false));
            }
            NavMeshUpdateMode::Direct => (),
        };

        match build_navmesh(&grid, &settings) {
            Ok(navmesh) => {
                debug!("navmesh built for {entity}");
                if let Some(existing) = assets.get_mut(&handle.0) {
                    *existing = navmesh;
                } else {
                    handle.0 = assets.add(navmesh);
                }
                *status = NavMeshStatus::Built;
            }
            Err(err) => {
                warn!("navmesh build failed for {entity}: {err}");
                *status = NavMeshStatus::Failed;
            }
        }
    }
}

/// Plugin registering the [`NavMesh`] asset, the [`NavWorld`] resource and
/// the automatic rebuild of entities spawned with a [`NavMeshBundle`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TileNavigatorPlugin;

impl Plugin for TileNavigatorPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<NavMesh>()
            .init_resource::<NavWorld>()
            .add_systems(PostUpdate, update_navmesh);
    }
}
