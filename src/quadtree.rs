//! Point-location index over triangles.
//!
//! The world is cut into fixed-size square cells, each the root of a
//! quadtree. A node holding more than `capacity` triangles splits into four
//! children until `max_depth`; nodes at the maximum depth keep everything in a
//! growable bulk list instead. A triangle is stored in every node it touches.

use bevy::math::Vec2;

use crate::geometry::{Rect2, triangle_contains, triangle_intersects_rect};

#[derive(Debug, Clone)]
enum Content {
    Leaf(Vec<u32>),
    Divided([usize; 4]),
    Bulk(Vec<u32>),
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Rect2,
    depth: usize,
    content: Content,
}

/// Shape of a [`TriangleIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexShape {
    /// Side of the top-level cells, in world units.
    pub cell_size: f32,
    /// Triangles a node holds before splitting.
    pub capacity: usize,
    /// Depth below a top-level cell at which nodes stop splitting.
    pub max_depth: usize,
}

/// Quadtree forest of triangle ids.
#[derive(Debug, Clone)]
pub struct TriangleIndex {
    shape: IndexShape,
    columns: usize,
    rows: usize,
    corners: Vec<[Vec2; 3]>,
    nodes: Vec<Node>,
}

impl TriangleIndex {
    /// Indexes `corners` (one entry per triangle) over `[0, size]`.
    pub fn build(corners: Vec<[Vec2; 3]>, size: Vec2, shape: IndexShape) -> Self {
        let columns = ((size.x / shape.cell_size).ceil() as usize).max(1);
        let rows = ((size.y / shape.cell_size).ceil() as usize).max(1);
        let mut index = TriangleIndex {
            shape,
            columns,
            rows,
            corners,
            nodes: Vec::with_capacity(columns * rows),
        };
        for row in 0..rows {
            for column in 0..columns {
                let min = Vec2::new(column as f32, row as f32) * shape.cell_size;
                index.nodes.push(Node {
                    bounds: Rect2::new(min, min + Vec2::splat(shape.cell_size)),
                    depth: 0,
                    content: Content::Leaf(Vec::new()),
                });
            }
        }

        for triangle in 0..index.corners.len() {
            let tri = index.corners[triangle];
            let min = tri[0].min(tri[1]).min(tri[2]);
            let max = tri[0].max(tri[1]).max(tri[2]);
            let (c0, r0) = index.cell_of(min);
            let (c1, r1) = index.cell_of(max);
            for row in r0..=r1 {
                for column in c0..=c1 {
                    index.insert(row * columns + column, triangle as u32);
                }
            }
        }
        index
    }

    /// Cell containing `point`, clamped into the grid of cells.
    fn cell_of(&self, point: Vec2) -> (usize, usize) {
        let cell = (point / self.shape.cell_size).floor().max(Vec2::ZERO);
        (
            (cell.x as usize).min(self.columns - 1),
            (cell.y as usize).min(self.rows - 1),
        )
    }

    fn insert(&mut self, node: usize, triangle: u32) {
        let tri = self.corners[triangle as usize];
        if !triangle_intersects_rect(tri, &self.nodes[node].bounds) {
            return;
        }
        let depth = self.nodes[node].depth;
        match &mut self.nodes[node].content {
            Content::Divided(children) => {
                for child in *children {
                    self.insert(child, triangle);
                }
            }
            Content::Bulk(items) => items.push(triangle),
            Content::Leaf(items) => {
                items.push(triangle);
                if items.len() > self.shape.capacity {
                    if depth < self.shape.max_depth {
                        self.split(node);
                    } else {
                        let items = std::mem::take(items);
                        self.nodes[node].content = Content::Bulk(items);
                    }
                }
            }
        }
    }

    fn split(&mut self, node: usize) {
        let Node { bounds, depth, .. } = self.nodes[node];
        let center = bounds.center();
        let first = self.nodes.len();
        for quadrant in 0..4 {
            let (x_high, y_high) = (quadrant & 1 == 1, quadrant & 2 == 2);
            let min = Vec2::new(
                if x_high { center.x } else { bounds.min.x },
                if y_high { center.y } else { bounds.min.y },
            );
            let max = Vec2::new(
                if x_high { bounds.max.x } else { center.x },
                if y_high { bounds.max.y } else { center.y },
            );
            self.nodes.push(Node {
                bounds: Rect2::new(min, max),
                depth: depth + 1,
                content: Content::Leaf(Vec::new()),
            });
        }
        let children = [first, first + 1, first + 2, first + 3];
        let previous = std::mem::replace(&mut self.nodes[node].content, Content::Divided(children));
        if let Content::Leaf(items) = previous {
            for triangle in items {
                for child in children {
                    self.insert(child, triangle);
                }
            }
        }
    }

    /// Triangle containing `point`, boundaries included.
    pub fn locate(&self, point: Vec2) -> Option<u32> {
        if !point.is_finite() || point.x < 0.0 || point.y < 0.0 {
            return None;
        }
        let extent = Vec2::new(self.columns as f32, self.rows as f32) * self.shape.cell_size;
        if point.x > extent.x || point.y > extent.y {
            return None;
        }
        let (column, row) = self.cell_of(point);
        let mut node = row * self.columns + column;
        loop {
            match &self.nodes[node].content {
                Content::Divided(children) => {
                    let center = self.nodes[node].bounds.center();
                    let quadrant = usize::from(point.x >= center.x) + 2 * usize::from(point.y >= center.y);
                    node = children[quadrant];
                }
                Content::Leaf(items) | Content::Bulk(items) => {
                    return items.iter().copied().find(|triangle| {
                        let [a, b, c] = self.corners[*triangle as usize];
                        triangle_contains(a, b, c, point)
                    });
                }
            }
        }
    }

    /// Every triangle overlapping `region`, each listed once.
    pub fn intersecting(&self, region: &Rect2) -> Vec<u32> {
        let mut found = Vec::new();
        self.visit_intersecting(region, |triangle| {
            if !found.contains(&triangle) {
                found.push(triangle);
            }
            false
        });
        found
    }

    /// Some triangle overlapping `region`.
    pub fn any_intersecting(&self, region: &Rect2) -> Option<u32> {
        let mut found = None;
        self.visit_intersecting(region, |triangle| {
            found = Some(triangle);
            true
        });
        found
    }

    /// Calls `visit` for triangles overlapping `region` until it returns `true`.
    fn visit_intersecting(&self, region: &Rect2, mut visit: impl FnMut(u32) -> bool) {
        let (c0, r0) = self.cell_of(region.min);
        let (c1, r1) = self.cell_of(region.max);
        let mut stack = Vec::new();
        for row in r0..=r1 {
            for column in c0..=c1 {
                stack.push(row * self.columns + column);
            }
        }
        while let Some(node) = stack.pop() {
            let node = &self.nodes[node];
            if !node.bounds.overlaps(region) {
                continue;
            }
            match &node.content {
                Content::Divided(children) => stack.extend(children),
                Content::Leaf(items) | Content::Bulk(items) => {
                    for triangle in items {
                        if triangle_intersects_rect(self.corners[*triangle as usize], region) && visit(*triangle) {
                            return;
                        }
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan(size: f32, slices: usize) -> Vec<[Vec2; 3]> {
        // strips of two triangles across a square
        let step = size / slices as f32;
        (0..slices)
            .flat_map(|i| {
                let x0 = i as f32 * step;
                let x1 = x0 + step;
                [
                    [Vec2::new(x0, 0.0), Vec2::new(x1, 0.0), Vec2::new(x1, size)],
                    [Vec2::new(x0, 0.0), Vec2::new(x1, size), Vec2::new(x0, size)],
                ]
            })
            .collect()
    }

    const SHAPE: IndexShape = IndexShape {
        cell_size: 4.0,
        capacity: 2,
        max_depth: 3,
    };

    #[test]
    fn locates_points_inside_triangles() {
        let corners = fan(10.0, 10);
        let index = TriangleIndex::build(corners.clone(), Vec2::splat(10.0), SHAPE);
        for (id, [a, b, c]) in corners.iter().enumerate() {
            let centroid = (*a + *b + *c) / 3.0;
            assert_eq!(index.locate(centroid), Some(id as u32), "centroid of {id}");
        }
    }

    #[test]
    fn points_outside_are_not_found() {
        let index = TriangleIndex::build(fan(10.0, 4), Vec2::splat(10.0), SHAPE);
        assert_eq!(index.locate(Vec2::new(-0.5, 1.0)), None);
        assert_eq!(index.locate(Vec2::new(1.0, 10.5)), None);
        assert_eq!(index.locate(Vec2::new(13.0, 1.0)), None);
        assert_eq!(index.locate(Vec2::NAN), None);
        assert!(index.locate(Vec2::new(10.0, 5.0)).is_some());
    }

    #[test]
    fn deep_nodes_fall_back_to_bulk_storage() {
        // many thin slivers all touching the same spot
        let corners = (0..40)
            .map(|i| {
                let x = 1.0 + i as f32 * 0.01;
                [Vec2::new(x, 1.0), Vec2::new(x + 0.01, 1.0), Vec2::new(x + 0.01, 1.5)]
            })
            .collect::<Vec<_>>();
        let index = TriangleIndex::build(corners, Vec2::splat(4.0), SHAPE);
        assert!(index.nodes.iter().any(|node| matches!(node.content, Content::Bulk(_))));
        assert_eq!(index.locate(Vec2::new(1.009, 1.001)), Some(0));
    }

    #[test]
    fn region_queries() {
        let corners = vec![[Vec2::new(1.0, 1.0), Vec2::new(2.0, 1.0), Vec2::new(1.0, 2.0)]];
        let index = TriangleIndex::build(corners, Vec2::splat(8.0), SHAPE);
        assert_eq!(index.any_intersecting(&Rect2::around(Vec2::new(3.0, 3.0), 0.5)), None);
        assert_eq!(index.any_intersecting(&Rect2::around(Vec2::new(3.0, 3.0), 2.0)), Some(0));
        assert_eq!(index.intersecting(&Rect2::around(Vec2::ZERO, 8.0)), vec![0]);
    }
}
