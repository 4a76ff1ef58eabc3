//! Fixed-block arena for waypoint chains.

use bevy::math::Vec2;

/// Slots added to the pool each time it runs out.
pub const CHUNK_SIZE: usize = 512;

/// Handle to a node in a [`PathPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathNodeId(u32);

/// A waypoint and the one following it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathNode {
    pub position: Vec2,
    pub next: Option<PathNodeId>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Used(PathNode),
    Free(Option<u32>),
}

/// Owns every waypoint chain handed out by path queries.
///
/// Chains do not reference the mesh, so they outlive rebuilds (and may then
/// lead through walls that no longer exist, or into new ones).
#[derive(Debug, Clone, Default)]
pub struct PathPool {
    slots: Vec<Slot>,
    free: Option<u32>,
    live: usize,
}

impl PathPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of free slots and returns the first one.
    fn grow(&mut self) -> u32 {
        let start = self.slots.len();
        let end = start + CHUNK_SIZE;
        // thread the new slots onto the free list, lowest index first
        self.slots.extend((start..end).map(|i| {
            Slot::Free(if i + 1 < end { Some(i as u32 + 1) } else { self.free })
        }));
        self.free = Some(start as u32);
        start as u32
    }

    pub fn alloc(&mut self, position: Vec2, next: Option<PathNodeId>) -> PathNodeId {
        let index = match self.free {
            Some(index) => index,
            None => self.grow(),
        };
        if let Slot::Free(following) = self.slots[index as usize] {
            self.free = following;
        }
        self.slots[index as usize] = Slot::Used(PathNode { position, next });
        self.live += 1;
        PathNodeId(index)
    }

    fn free_slot(&mut self, id: PathNodeId) -> Option<PathNode> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let Slot::Used(node) = *slot else {
            return None;
        };
        *slot = Slot::Free(self.free);
        self.free = Some(id.0);
        self.live -= 1;
        Some(node)
    }

    pub fn get(&self, id: PathNodeId) -> Option<&PathNode> {
        match self.slots.get(id.0 as usize)? {
            Slot::Used(node) => Some(node),
            Slot::Free(_) => None,
        }
    }

    /// Frees the head of a chain and returns the node after it.
    pub fn advance(&mut self, head: PathNodeId) -> Option<PathNodeId> {
        self.free_slot(head)?.next
    }

    /// Frees a whole chain.
    pub fn release(&mut self, head: PathNodeId) {
        let mut current = Some(head);
        while let Some(id) = current {
            current = self.advance(id);
        }
    }

    /// Positions along a chain, head first.
    pub fn waypoints(&self, head: PathNodeId) -> Vec<Vec2> {
        std::iter::successors(self.get(head), |node| node.next.and_then(|next| self.get(next)))
            .map(|node| node.position)
            .collect()
    }

    /// Builds a chain through `positions` in order and returns its head.
    pub fn chain(&mut self, positions: &[Vec2]) -> Option<PathNodeId> {
        positions
            .iter()
            .rev()
            .fold(None, |next, position| Some(self.alloc(*position, next)))
    }

    /// Number of nodes currently handed out.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots, used or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
