//! A* over the triangle adjacency graph followed by funnel smoothing.

use std::{cmp::Reverse, collections::BinaryHeap};

use bevy::math::Vec2;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{NavMesh, geometry::triangle_contains};

/// Bound on the steps taken pulling a substituted destination into its triangle.
const MAX_PULL_STEPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unused,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct SearchNode {
    visit: Visit,
    cost: u64,
    previous: Option<u32>,
    /// Edge of this triangle it was entered through.
    entry: Option<usize>,
}

const UNUSED: SearchNode = SearchNode {
    visit: Visit::Unused,
    cost: 0,
    previous: None,
    entry: None,
};

/// Buffers of path queries, kept between queries so a warm context plans
/// without allocating. Works with any mesh; node state is reset lazily.
#[derive(Debug, Default)]
pub struct PathScratch {
    nodes: Vec<SearchNode>,
    /// Triangles whose node left the unused state since the last reset.
    touched: Vec<u32>,
    open: BinaryHeap<Reverse<(u64, u64, u32)>>,
    portals: Vec<(Vec2, Vec2)>,
    corridor: Vec<u32>,
    waypoints: Vec<Vec2>,
}

impl PathScratch {
    fn reset(&mut self, triangles: usize) {
        for triangle in self.touched.drain(..) {
            if let Some(node) = self.nodes.get_mut(triangle as usize) {
                *node = UNUSED;
            }
        }
        self.nodes.resize(triangles, UNUSED);
        self.open.clear();
        self.portals.clear();
        self.corridor.clear();
        self.waypoints.clear();
    }

    /// Triangles crossed by the last planned path, start first.
    pub fn corridor(&self) -> &[u32] {
        &self.corridor
    }

    /// Waypoints of the last planned path.
    pub fn waypoints(&self) -> &[Vec2] {
        &self.waypoints
    }
}

/// Result of a query: the triangle corridor and the smoothed waypoints, the
/// latter ordered from the first point to walk to up to the destination.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub corridor: Vec<u32>,
    pub waypoints: Vec<Vec2>,
}

/// Signed angle from `a` to `b`.
fn angle_between(a: Vec2, b: Vec2) -> f32 {
    a.perp_dot(b).atan2(a.dot(b))
}

/// Replaces a destination the start's plate cannot reach with a point inside
/// the plate, near the plate's closest boundary vertex.
fn substitute_destination(mesh: &NavMesh, plate: usize, to: Vec2) -> Option<(u32, Vec2)> {
    let range = mesh.plates.get(plate)?;
    let vertex = range.vertices.clone().min_by(|a, b| {
        let da = mesh.vertices[*a as usize].distance_squared(to);
        let db = mesh.vertices[*b as usize].distance_squared(to);
        da.total_cmp(&db)
    })?;
    let origin = mesh.vertices[vertex as usize];
    let [prev, next] = mesh.vertex_links[vertex as usize];
    let target = to - origin;

    // the triangle on the boundary edge facing the destination
    let (a, b) = if angle_between(target, mesh.vertices[next as usize] - origin).abs()
        <= angle_between(target, mesh.vertices[prev as usize] - origin).abs()
    {
        (vertex, next)
    } else {
        (prev, vertex)
    };
    let triangles = range.triangles.clone();
    let triangle = triangles
        .clone()
        .find(|t| {
            let indices = mesh.triangles[*t as usize].indices;
            (0..3).any(|k| indices[k] == a && indices[(k + 1) % 3] == b)
        })
        .or_else(|| triangles.clone().find(|t| mesh.triangles[*t as usize].indices.contains(&vertex)))
        .or_else(|| triangles.clone().next())?;

    let [c0, c1, c2] = mesh.corners(triangle);
    let centroid = mesh.triangles[triangle as usize].centroid;
    let pull = mesh.settings.destination_pull;
    let mut point = to;
    for _ in 0..MAX_PULL_STEPS {
        if triangle_contains(c0, c1, c2, point) {
            return Some((triangle, point));
        }
        point = point * pull + centroid * (1.0 - pull);
    }
    Some((triangle, centroid))
}

struct Search<'a> {
    mesh: &'a NavMesh,
    from: Vec2,
    start: u32,
    scratch: &'a mut PathScratch,
}

impl Search<'_> {
    fn scaled(&self, distance: f32) -> u64 {
        (distance * self.mesh.settings.cost_scale) as u64
    }

    /// Cost of leaving `triangle` through `exit`, from the point it was entered at.
    fn leave_cost(&self, triangle: u32, exit: usize) -> u64 {
        let node = &self.scratch.nodes[triangle as usize];
        let data = &self.mesh.triangles[triangle as usize];
        match node.entry {
            None => {
                let [a, b] = [exit, (exit + 1) % 3].map(|k| self.mesh.vertices[data.indices[k] as usize]);
                self.scaled(self.from.distance((a + b) / 2.0))
            }
            Some(entry) if (entry + 1) % 3 == exit => data.dists[entry] as u64,
            Some(_) => data.dists[exit] as u64,
        }
    }

    /// Edge of `triangle` shared with `neighbor`.
    fn shared_edge(&self, triangle: u32, neighbor: u32) -> Option<usize> {
        self.mesh.triangles[triangle as usize]
            .neighbors
            .iter()
            .position(|n| *n == Some(neighbor))
    }

    fn heuristic(&self, triangle: u32, goal: Vec2) -> u64 {
        self.scaled(self.mesh.triangles[triangle as usize].centroid.distance(goal))
    }

    fn open(&mut self, triangle: u32, node: SearchNode) {
        if self.scratch.nodes[triangle as usize].visit == Visit::Unused {
            self.scratch.touched.push(triangle);
        }
        self.scratch.nodes[triangle as usize] = node;
    }

    /// Before closing `triangle`, reroutes it through any closed neighbor
    /// that reaches it more cheaply than its current predecessor.
    fn tighten(&mut self, triangle: u32) {
        if triangle == self.start {
            return;
        }
        for neighbor in self.mesh.triangles[triangle as usize].neighbors.into_iter().flatten() {
            let candidate = self.scratch.nodes[neighbor as usize];
            if candidate.visit != Visit::Closed || self.scratch.nodes[triangle as usize].previous == Some(neighbor) {
                continue;
            }
            let (Some(exit), Some(entry)) = (self.shared_edge(neighbor, triangle), self.shared_edge(triangle, neighbor))
            else {
                continue;
            };
            let cost = candidate.cost + self.leave_cost(neighbor, exit);
            let node = &mut self.scratch.nodes[triangle as usize];
            if cost < node.cost {
                node.cost = cost;
                node.previous = Some(neighbor);
                node.entry = Some(entry);
            }
        }
    }

    fn run(&mut self, goal: u32) -> bool {
        let goal_centroid = self.mesh.triangles[goal as usize].centroid;
        self.open(
            self.start,
            SearchNode {
                visit: Visit::Open,
                cost: 0,
                previous: None,
                entry: None,
            },
        );
        let first = Reverse((self.heuristic(self.start, goal_centroid), 0u64, self.start));
        self.scratch.open.push(first);

        while let Some(Reverse((_, cost, triangle))) = self.scratch.open.pop() {
            let node = self.scratch.nodes[triangle as usize];
            if node.visit == Visit::Closed || node.cost != cost {
                continue;
            }
            self.tighten(triangle);
            self.scratch.nodes[triangle as usize].visit = Visit::Closed;
            if triangle == goal {
                return true;
            }

            let cost = self.scratch.nodes[triangle as usize].cost;
            for (exit, neighbor) in self.mesh.triangles[triangle as usize].neighbors.into_iter().enumerate() {
                let Some(neighbor) = neighbor else {
                    continue;
                };
                let next = self.scratch.nodes[neighbor as usize];
                if next.visit == Visit::Closed {
                    continue;
                }
                let Some(entry) = self.shared_edge(neighbor, triangle) else {
                    continue;
                };
                let reached = cost + self.leave_cost(triangle, exit);
                if next.visit == Visit::Unused || reached < next.cost {
                    self.open(
                        neighbor,
                        SearchNode {
                            visit: Visit::Open,
                            cost: reached,
                            previous: Some(triangle),
                            entry: Some(entry),
                        },
                    );
                    let estimate = reached + self.heuristic(neighbor, goal_centroid);
                    self.scratch.open.push(Reverse((estimate, reached, neighbor)));
                }
            }
        }
        false
    }

    /// Triangles from start to `goal`, following back-pointers.
    fn corridor(&mut self, goal: u32) {
        let PathScratch { nodes, corridor, .. } = &mut *self.scratch;
        corridor.push(goal);
        let mut current = goal;
        while let Some(previous) = nodes[current as usize].previous {
            corridor.push(previous);
            current = previous;
            if corridor.len() > nodes.len() {
                break;
            }
        }
        corridor.reverse();
    }
}

/// Fills `portals` with the edges crossed walking `corridor` back from `to`,
/// as `(left, right)` points in that walking direction, framed by `to` and
/// `from` as zero-width portals.
fn reversed_portals(mesh: &NavMesh, corridor: &[u32], from: Vec2, to: Vec2, portals: &mut Vec<(Vec2, Vec2)>) {
    portals.push((to, to));
    for pair in corridor.windows(2).rev() {
        let triangle = &mesh.triangles[pair[0] as usize];
        let Some(k) = triangle.neighbors.iter().position(|n| *n == Some(pair[1])) else {
            continue;
        };
        // edge `a -> b` runs counter-clockwise around the triangle walked out
        // of, so `a` is on the left when walking back into it
        let (a, b) = (triangle.indices[k], triangle.indices[(k + 1) % 3]);
        portals.push((mesh.vertices[a as usize], mesh.vertices[b as usize]));
    }
    portals.push((from, from));
}

/// String-pulls a path through `portals` (given as points, `(left, right)`
/// in walking order). The first portal is the starting point, the last one
/// the end point. Pushes the committed corners (nudged off the walls by
/// `clearance`) in walking order, without either end.
fn funnel(portals: &[(Vec2, Vec2)], clearance: f32, committed: &mut Vec<Vec2>) {
    let cross = |a: Vec2, b: Vec2, c: Vec2| (b - a).perp_dot(c - a);
    let nudge = |corner: Vec2, partner: Vec2| {
        let offset = partner - corner;
        let width = offset.length();
        if width > 0.0 {
            corner + offset / width * clearance.min(width / 2.0)
        } else {
            corner
        }
    };

    let Some(&(first, _)) = portals.first() else {
        return;
    };
    let last = portals.len() - 1;
    let (mut apex, mut left, mut right) = (first, first, first);
    let (mut apex_i, mut left_i, mut right_i) = (0, 0, 0);
    let mut i = 1;
    while i < portals.len() {
        let (portal_left, portal_right) = portals[i];

        if cross(apex, right, portal_right) >= 0.0 {
            if apex == right || cross(apex, left, portal_right) < 0.0 {
                right = portal_right;
                right_i = i;
            } else {
                if left_i > apex_i && left_i < last && left != apex {
                    committed.push(nudge(left, portals[left_i].1));
                }
                apex = left;
                apex_i = left_i;
                (left, right) = (apex, apex);
                (left_i, right_i) = (apex_i, apex_i);
                i = apex_i + 1;
                continue;
            }
        }

        if cross(apex, left, portal_left) <= 0.0 {
            if apex == left || cross(apex, right, portal_left) > 0.0 {
                left = portal_left;
                left_i = i;
            } else {
                if right_i > apex_i && right_i < last && right != apex {
                    committed.push(nudge(right, portals[right_i].0));
                }
                apex = right;
                apex_i = right_i;
                (left, right) = (apex, apex);
                (left_i, right_i) = (apex_i, apex_i);
                i = apex_i + 1;
                continue;
            }
        }

        i += 1;
    }
}

/// Drops the waypoint where the path turns least. The last waypoint stays.
fn merge_flattest_bend(from: Vec2, waypoints: &mut Vec<Vec2>) {
    let flattest = (0..waypoints.len().saturating_sub(1))
        .map(|i| {
            let previous = if i == 0 { from } else { waypoints[i - 1] };
            let turn = angle_between(waypoints[i] - previous, waypoints[i + 1] - waypoints[i]);
            (i, turn.abs())
        })
        .min_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((i, _)) = flattest {
        waypoints.remove(i);
    }
}

/// Plans a path from `from` to `to` into `scratch`, returning its waypoints.
///
/// `None` when `from` is outside the mesh. A destination outside the start's
/// plate is replaced by a reachable point near it. There are never more
/// waypoints than triangle edges crossed, except for the single waypoint of a
/// path that stays in one triangle.
#[cfg_attr(feature = "tracing", instrument(skip(mesh, scratch)))]
pub(crate) fn plan_with<'s>(mesh: &NavMesh, scratch: &'s mut PathScratch, from: Vec2, to: Vec2) -> Option<&'s [Vec2]> {
    scratch.reset(mesh.triangles.len());
    let Some(start) = mesh.triangle_at(from) else {
        log::debug!("no path: start {from} is outside the navmesh");
        return None;
    };
    let plate = mesh.plate_of(start)?;
    let (goal, to) = match mesh.triangle_at(to) {
        Some(goal) if mesh.plate_of(goal) == Some(plate) => (goal, to),
        _ => {
            let substitute = substitute_destination(mesh, plate, to)?;
            log::debug!("destination {to} unreachable from {from}, heading to {} instead", substitute.1);
            substitute
        }
    };

    if start == goal {
        scratch.corridor.push(start);
        scratch.waypoints.push(to);
        return Some(scratch.waypoints.as_slice());
    }

    let mut search = Search {
        mesh,
        from,
        start,
        scratch: &mut *scratch,
    };
    if !search.run(goal) {
        log::warn!("no corridor between triangles {start} and {goal} of plate {plate}");
        return None;
    }
    search.corridor(goal);

    // walked from the destination back to the start
    reversed_portals(mesh, &scratch.corridor, from, to, &mut scratch.portals);
    funnel(&scratch.portals, mesh.settings.waypoint_clearance, &mut scratch.waypoints);
    scratch.waypoints.reverse();
    scratch.waypoints.push(to);
    let crossed = scratch.corridor.len() - 1;
    while scratch.waypoints.len() > crossed.max(1) {
        merge_flattest_bend(from, &mut scratch.waypoints);
    }
    Some(scratch.waypoints.as_slice())
}

/// Plans a path from `from` to `to` with fresh buffers.
pub(crate) fn plan(mesh: &NavMesh, from: Vec2, to: Vec2) -> Option<Plan> {
    let mut scratch = PathScratch::default();
    plan_with(mesh, &mut scratch, from, to)?;
    Some(Plan {
        corridor: scratch.corridor,
        waypoints: scratch.waypoints,
    })
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{grid::TileGrid, updater::NavMeshSettings};

    fn mesh(grid: &TileGrid) -> NavMesh {
        NavMesh::build(grid, &NavMeshSettings::default()).unwrap()
    }

    /// 10x10 world units with a 2x2 block in the middle.
    fn blocked_center() -> NavMesh {
        let mut grid = TileGrid::new(80, 80);
        grid.block_rect((32, 32), (47, 47));
        mesh(&grid)
    }

    fn strictly_in_block(point: Vec2) -> bool {
        point.x > 4.0 && point.x < 6.0 && point.y > 4.0 && point.y < 6.0
    }

    #[test]
    fn path_goes_around_the_hole() {
        let mesh = blocked_center();
        let from = Vec2::new(0.5, 0.5);
        let to = Vec2::new(9.5, 9.5);
        let plan = plan(&mesh, from, to).unwrap();
        assert_eq!(plan.waypoints.last(), Some(&to));
        assert!(plan.waypoints.len() >= 2, "a straight line would cross the hole");

        let mut previous = from;
        for waypoint in &plan.waypoints {
            assert!(!strictly_in_block(*waypoint), "waypoint {waypoint} is inside the block");
            for step in 0..=100 {
                let point = previous.lerp(*waypoint, step as f32 / 100.0);
                assert!(!strictly_in_block(point), "segment {previous} -> {waypoint} crosses the block at {point}");
            }
            previous = *waypoint;
        }
    }

    #[test]
    fn same_point_gives_one_waypoint() {
        let mesh = blocked_center();
        let point = Vec2::new(2.0, 7.5);
        let plan = plan(&mesh, point, point).unwrap();
        assert_eq!(plan.waypoints, vec![point]);
    }

    #[test]
    fn visible_destination_is_reached_directly() {
        let mesh = mesh(&TileGrid::new(80, 80));
        let to = Vec2::new(8.0, 8.0);
        let plan = plan(&mesh, Vec2::new(1.0, 1.2), to).unwrap();
        assert_eq!(plan.waypoints, vec![to]);
    }

    #[test]
    fn start_outside_the_mesh_has_no_path() {
        let mesh = blocked_center();
        assert!(plan(&mesh, Vec2::new(0.05, 0.05), Vec2::new(2.0, 2.0)).is_none());
        assert!(plan(&mesh, Vec2::new(5.0, 5.0), Vec2::new(2.0, 2.0)).is_none());
    }

    #[test]
    fn destination_across_a_wall_is_approximated() {
        // world of 12x8 units, wall from x = 5 to x = 6
        let mut grid = TileGrid::new(96, 64);
        grid.block_rect((40, 0), (47, 63));
        let mesh = mesh(&grid);
        let from = Vec2::new(1.0, 4.0);
        let to = Vec2::new(10.0, 4.0);
        let plan = plan(&mesh, from, to).unwrap();
        let end = *plan.waypoints.last().unwrap();
        assert_ne!(end, to);
        assert!(end.x < 5.0, "ended at {end}, past the wall");
        let start_plate = mesh.plate_of(mesh.triangle_at(from).unwrap());
        assert_eq!(mesh.triangle_at(end).and_then(|t| mesh.plate_of(t)), start_plate);
    }

    #[test]
    fn bends_never_exceed_crossed_edges() {
        let mut grid = TileGrid::new(160, 80);
        grid.block_rect((24, 0), (31, 60));
        grid.block_rect((56, 20), (63, 79));
        grid.block_rect((88, 0), (95, 60));
        grid.block_rect((120, 30), (135, 45));
        let mesh = mesh(&grid);
        let queries = [
            (Vec2::new(1.0, 1.0), Vec2::new(19.0, 9.0)),
            (Vec2::new(1.0, 9.0), Vec2::new(19.0, 1.0)),
            (Vec2::new(5.0, 5.0), Vec2::new(13.0, 2.0)),
        ];
        for (from, to) in queries {
            let plan = plan(&mesh, from, to).unwrap();
            assert_eq!(plan.waypoints.last(), Some(&to));
            assert!(
                plan.waypoints.len() <= plan.corridor.len() - 1,
                "{} waypoints for {} crossed edges",
                plan.waypoints.len(),
                plan.corridor.len() - 1
            );
            for waypoint in &plan.waypoints {
                assert!(mesh.is_in_mesh(*waypoint), "waypoint {waypoint} left the mesh");
            }
        }
    }

    #[test]
    fn funnel_commits_the_inner_corner() {
        // walking north through a gap, then east: the corner at (1, 1) is kept
        let portals = [
            (Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0)),
            (Vec2::new(-1.0, 1.0), Vec2::new(1.0, 1.0)),
            (Vec2::new(5.0, 3.0), Vec2::new(5.0, 1.0)),
            (Vec2::new(6.0, 2.0), Vec2::new(6.0, 2.0)),
        ];
        let mut committed = Vec::new();
        funnel(&portals, 0.0, &mut committed);
        assert_eq!(committed, vec![Vec2::new(1.0, 1.0)]);

        let mut nudged = Vec::new();
        funnel(&portals, 0.25, &mut nudged);
        assert_eq!(nudged.len(), 1);
        assert!((nudged[0] - Vec2::new(0.75, 1.0)).length() < 1e-6);
    }

    #[test]
    fn flattest_bend_is_merged() {
        let mut waypoints = vec![Vec2::new(1.0, 0.1), Vec2::new(2.0, 0.0), Vec2::new(3.0, 3.0)];
        merge_flattest_bend(Vec2::ZERO, &mut waypoints);
        assert_eq!(waypoints, vec![Vec2::new(2.0, 0.0), Vec2::new(3.0, 3.0)]);

        let mut waypoints = vec![Vec2::new(0.0, 4.0), Vec2::new(4.0, 4.0), Vec2::new(8.0, 4.1)];
        merge_flattest_bend(Vec2::ZERO, &mut waypoints);
        assert_eq!(waypoints, vec![Vec2::new(0.0, 4.0), Vec2::new(8.0, 4.1)]);

        let mut single = vec![Vec2::new(1.0, 1.0)];
        merge_flattest_bend(Vec2::ZERO, &mut single);
        assert_eq!(single, vec![Vec2::new(1.0, 1.0)]);
    }

    fn scattered_blocks(rng: &mut StdRng) -> TileGrid {
        let mut grid = TileGrid::new(160, 120);
        for _ in 0..rng.random_range(4..=16) {
            let (x, y) = (rng.random_range(0..150), rng.random_range(0..110));
            let (w, h) = (rng.random_range(2..=32), rng.random_range(2..=32));
            grid.block_rect((x, y), (x + w - 1, y + h - 1));
        }
        grid
    }

    fn random_point(rng: &mut StdRng) -> Vec2 {
        Vec2::new(rng.random_range(0.0..20.0), rng.random_range(0.0..15.0))
    }

    #[test]
    fn random_paths_bend_at_most_once_per_crossed_edge() {
        for seed in 0..30 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mesh = mesh(&scattered_blocks(&mut rng));
            for _ in 0..40 {
                let (from, to) = (random_point(&mut rng), random_point(&mut rng));
                let Some(plan) = plan(&mesh, from, to) else {
                    assert!(!mesh.is_in_mesh(from), "seed {seed}: no path from {from} inside the mesh");
                    continue;
                };
                assert_eq!(plan.corridor.first().copied(), mesh.triangle_at(from));
                if plan.corridor.len() == 1 {
                    assert_eq!(plan.waypoints.len(), 1);
                } else {
                    assert!(
                        plan.waypoints.len() <= plan.corridor.len() - 1,
                        "seed {seed}, {from} -> {to}: {} waypoints for {} crossed edges",
                        plan.waypoints.len(),
                        plan.corridor.len() - 1
                    );
                }
            }
        }
    }

    #[test]
    fn reused_scratch_matches_fresh_plans() {
        let mut rng = StdRng::seed_from_u64(7);
        let meshes = [mesh(&scattered_blocks(&mut rng)), blocked_center()];
        let mut scratch = PathScratch::default();
        for _ in 0..3 {
            for mesh in &meshes {
                for _ in 0..20 {
                    let (from, to) = (random_point(&mut rng), random_point(&mut rng));
                    let fresh = plan(mesh, from, to);
                    let reused = plan_with(mesh, &mut scratch, from, to).map(<[Vec2]>::to_vec);
                    assert_eq!(reused, fresh.as_ref().map(|plan| plan.waypoints.clone()));
                    if let Some(fresh) = fresh {
                        assert_eq!(scratch.corridor(), fresh.corridor.as_slice());
                        assert_eq!(scratch.waypoints(), fresh.waypoints.as_slice());
                    }
                }
            }
        }
    }
}
