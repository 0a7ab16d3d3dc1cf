//! Fixed-shape quad-tree over the layout world.
//!
//! The tree is a complete quad-tree of a configured depth stored in an arena
//! (`Vec<SpatialNode>`); nodes refer to their parent and children by index.
//! Leaves hold the ids of the bodies docked in them, every node caches the
//! aggregate mass and center of mass of its subtree, and a dirty flag limits
//! recomputation to subtrees whose membership changed.
//!
//! The arena is filled breadth first, so every child has a larger index than
//! its parent and walking the arena backwards visits children before parents.

use std::collections::VecDeque;

use crate::body::NodeId;
use crate::geometry::{Rect, Vec2};
use crate::{LayoutError, Result};

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);

    fn get(self) -> usize {
        self.0 as usize
    }
}

/// A quad-tree cell.
#[derive(Debug, Clone)]
pub struct SpatialNode {
    area: Rect,
    depth: u8,
    parent: Option<NodeIndex>,
    /// Top-left, top-right, bottom-left, bottom-right.
    children: Option<[NodeIndex; 4]>,
    attached: Vec<NodeId>,
    count: usize,
    mass: f32,
    center_of_mass: Vec2,
    dirty: bool,
}

impl SpatialNode {
    fn new(area: Rect, depth: u8, parent: Option<NodeIndex>) -> Self {
        Self {
            area,
            depth,
            parent,
            children: None,
            attached: Vec::new(),
            count: 0,
            mass: 0.0,
            center_of_mass: area.center(),
            dirty: false,
        }
    }

    pub fn area(&self) -> Rect {
        self.area
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeIndex; 4]> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Bodies docked in this leaf (empty for interior nodes).
    pub fn attached(&self) -> &[NodeId] {
        &self.attached
    }

    /// Number of bodies in the subtree as of the last update.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn center_of_mass(&self) -> Vec2 {
        self.center_of_mass
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Arena-backed quad-tree with an O(1) coordinate to leaf lookup.
#[derive(Debug, Clone)]
pub struct SpatialTree {
    nodes: Vec<SpatialNode>,
    /// Leaf index per grid cell, `row * edge_cell_count + col`.
    leaf_grid: Vec<NodeIndex>,
    world: Rect,
    origin: Vec2,
    edge_cell_count: usize,
    leaf_cell_size: f32,
    max_depth: u8,
}

impl SpatialTree {
    /// Build a complete tree of `max_depth` levels over a square world of edge
    /// `extent` centered on the origin.
    pub fn new(extent: f32, max_depth: u8) -> Self {
        let edge_cell_count = 1usize << max_depth;
        let leaf_cell_size = extent / edge_cell_count as f32;
        let origin = Rect::centered_square(extent).min;

        let mut tree = Self {
            nodes: Vec::new(),
            leaf_grid: vec![NodeIndex::ROOT; edge_cell_count * edge_cell_count],
            world: Rect::new(origin, origin),
            origin,
            edge_cell_count,
            leaf_cell_size,
            max_depth,
        };
        tree.world = tree.cell_rect(0, 0, edge_cell_count);

        let total: usize = (0..=max_depth as u32).map(|d| 4usize.pow(d)).sum();
        tree.nodes.reserve_exact(total);

        // (index, first column, first row, span in cells)
        let mut queue = VecDeque::new();
        tree.nodes
            .push(SpatialNode::new(tree.world, 0, None));
        queue.push_back((NodeIndex::ROOT, 0usize, 0usize, edge_cell_count));

        while let Some((index, col, row, span)) = queue.pop_front() {
            let depth = tree.nodes[index.get()].depth;
            if depth == max_depth {
                tree.leaf_grid[row * edge_cell_count + col] = index;
                continue;
            }
            let half = span / 2;
            let origins = [
                (col, row),
                (col + half, row),
                (col, row + half),
                (col + half, row + half),
            ];
            let mut children = [NodeIndex::ROOT; 4];
            for (slot, (c, r)) in origins.into_iter().enumerate() {
                let child = NodeIndex(tree.nodes.len() as u32);
                let area = tree.cell_rect(c, r, half);
                tree.nodes.push(SpatialNode::new(area, depth + 1, Some(index)));
                queue.push_back((child, c, r, half));
                children[slot] = child;
            }
            tree.nodes[index.get()].children = Some(children);
        }

        tree
    }

    /// World boundary at grid line `i`, shared by node areas and the lookup.
    fn boundary(&self, origin: f32, i: usize) -> f32 {
        origin + i as f32 * self.leaf_cell_size
    }

    fn cell_rect(&self, col: usize, row: usize, span: usize) -> Rect {
        Rect::new(
            Vec2::new(
                self.boundary(self.origin.x, col),
                self.boundary(self.origin.y, row),
            ),
            Vec2::new(
                self.boundary(self.origin.x, col + span),
                self.boundary(self.origin.y, row + span),
            ),
        )
    }

    /// Map a world coordinate to its grid column (or row), clamped to the grid.
    fn cell_coord(&self, origin: f32, v: f32) -> usize {
        let last = self.edge_cell_count - 1;
        let guess = ((v - origin) / self.leaf_cell_size).floor();
        let mut i = if guess.is_nan() || guess < 0.0 {
            0
        } else {
            (guess as usize).min(last)
        };
        // Division rounding can land one cell off the stored boundaries.
        if i > 0 && v < self.boundary(origin, i) {
            i -= 1;
        } else if i < last && v >= self.boundary(origin, i + 1) {
            i += 1;
        }
        i
    }

    pub fn world(&self) -> Rect {
        self.world
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn edge_cell_count(&self) -> usize {
        self.edge_cell_count
    }

    pub fn leaf_cell_size(&self) -> f32 {
        self.leaf_cell_size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> &SpatialNode {
        &self.nodes[index.get()]
    }

    pub fn root(&self) -> &SpatialNode {
        &self.nodes[0]
    }

    /// Iterate over leaf indices in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| NodeIndex(i as u32))
    }

    /// Leaf whose cell contains `p`; points outside the world map to the
    /// nearest border cell.
    pub fn leaf_at(&self, p: Vec2) -> NodeIndex {
        let col = self.cell_coord(self.origin.x, p.x);
        let row = self.cell_coord(self.origin.y, p.y);
        self.leaf_grid[row * self.edge_cell_count + col]
    }

    /// Clamp a position into the world so it always maps to a leaf.
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        self.world.clamp(p)
    }

    /// Dock a body in a leaf and mark the path to the root dirty.
    pub fn attach(&mut self, leaf: NodeIndex, id: NodeId) {
        let node = &mut self.nodes[leaf.get()];
        debug_assert!(node.is_leaf(), "attach on interior node {leaf:?}");
        debug_assert!(!node.attached.contains(&id), "{id:?} attached twice");
        node.attached.push(id);
        self.mark_dirty(leaf);
    }

    /// Undock a body; returns whether it was attached to `leaf`.
    pub fn detach(&mut self, leaf: NodeIndex, id: NodeId) -> bool {
        let node = &mut self.nodes[leaf.get()];
        debug_assert!(node.is_leaf(), "detach on interior node {leaf:?}");
        let Some(pos) = node.attached.iter().position(|a| *a == id) else {
            return false;
        };
        node.attached.swap_remove(pos);
        self.mark_dirty(leaf);
        true
    }

    /// Mark a leaf whose bodies moved without changing leaf.
    pub fn touch(&mut self, leaf: NodeIndex) {
        debug_assert!(self.nodes[leaf.get()].is_leaf(), "touch on interior node {leaf:?}");
        self.mark_dirty(leaf);
    }

    fn mark_dirty(&mut self, from: NodeIndex) {
        let mut cursor = Some(from);
        while let Some(index) = cursor {
            let node = &mut self.nodes[index.get()];
            // A dirty node always has dirty ancestors: updates clear every
            // dirty node in a single pass.
            if node.dirty {
                break;
            }
            node.dirty = true;
            cursor = node.parent;
        }
    }

    /// Recompute aggregates bottom-up.
    ///
    /// `lookup` resolves a docked body to its `(position, mass)`. Clean nodes
    /// are skipped unless `force` is set. Returns the number of nodes visited.
    pub fn update<F>(&mut self, lookup: F, force: bool) -> usize
    where
        F: Fn(NodeId) -> Option<(Vec2, f32)>,
    {
        let mut visited = 0;
        for i in (0..self.nodes.len()).rev() {
            if !force && !self.nodes[i].dirty {
                continue;
            }
            visited += 1;

            let (count, mass, weighted) = match self.nodes[i].children {
                None => {
                    let mut count = 0;
                    let mut mass = 0.0;
                    let mut weighted = Vec2::ZERO;
                    for id in &self.nodes[i].attached {
                        let Some((position, m)) = lookup(*id) else {
                            tracing::warn!(node = id.0, "tree_update_unknown_body");
                            continue;
                        };
                        count += 1;
                        mass += m;
                        weighted += position * m;
                    }
                    (count, mass, weighted)
                }
                Some(children) => {
                    let mut count = 0;
                    let mut mass = 0.0;
                    let mut weighted = Vec2::ZERO;
                    for child in children {
                        let c = &self.nodes[child.get()];
                        debug_assert!(!c.dirty, "child {child:?} read before recompute");
                        count += c.count;
                        mass += c.mass;
                        weighted += c.center_of_mass * c.mass;
                    }
                    (count, mass, weighted)
                }
            };

            let node = &mut self.nodes[i];
            node.count = count;
            node.mass = mass;
            node.center_of_mass = if mass > 0.0 {
                weighted / mass
            } else {
                node.area.center()
            };
            node.dirty = false;
        }
        visited
    }

    /// Bodies in the leaf containing `p` whose hit radius reaches `p`.
    ///
    /// `lookup` resolves a body to `(position, hit_radius)`. Descends from the
    /// root, O(depth).
    pub fn intersect_point<F>(&self, p: Vec2, lookup: F, out: &mut Vec<NodeId>)
    where
        F: Fn(NodeId) -> Option<(Vec2, f32)>,
    {
        if !self.world.contains(p) {
            return;
        }
        let mut index = NodeIndex::ROOT;
        while let Some(children) = self.nodes[index.get()].children {
            match children
                .into_iter()
                .find(|c| self.nodes[c.get()].area.contains(p))
            {
                Some(child) => index = child,
                None => return,
            }
        }
        for id in &self.nodes[index.get()].attached {
            if let Some((position, radius)) = lookup(*id) {
                if position.distance(p) <= radius {
                    out.push(*id);
                }
            }
        }
    }

    /// Collect bodies docked in every leaf whose area intersects `area`.
    pub fn fill_intersecting(&self, area: &Rect, out: &mut Vec<NodeId>) {
        let mut stack = vec![NodeIndex::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index.get()];
            if !node.area.intersects(area) {
                continue;
            }
            match node.children {
                Some(children) => stack.extend(children),
                None => out.extend_from_slice(&node.attached),
            }
        }
    }

    /// Verify that every interior node's aggregates equal the sum of its
    /// children's.
    pub fn check_mass_conservation(&self) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.dirty {
                return Err(LayoutError::inconsistent(format!(
                    "node {i} is dirty during a consistency check"
                )));
            }
            let Some(children) = node.children else {
                if node.count != node.attached.len() {
                    return Err(LayoutError::inconsistent(format!(
                        "leaf {i} counts {} bodies but holds {}",
                        node.count,
                        node.attached.len()
                    )));
                }
                continue;
            };
            let count: usize = children.iter().map(|c| self.nodes[c.get()].count).sum();
            let mass: f32 = children.iter().map(|c| self.nodes[c.get()].mass).sum();
            let weighted = children.iter().fold(Vec2::ZERO, |acc, c| {
                let child = &self.nodes[c.get()];
                acc + child.center_of_mass * child.mass
            });
            if count != node.count {
                return Err(LayoutError::inconsistent(format!(
                    "node {i} counts {} bodies, children hold {count}",
                    node.count
                )));
            }
            if (mass - node.mass).abs() > 1e-3 * node.mass.max(1.0) {
                return Err(LayoutError::inconsistent(format!(
                    "node {i} mass {} differs from children sum {mass}",
                    node.mass
                )));
            }
            if mass > 0.0 {
                let expected = weighted / mass;
                if !same_point(expected, node.center_of_mass) {
                    return Err(LayoutError::inconsistent(format!(
                        "node {i} center of mass {:?} differs from children {expected:?}",
                        node.center_of_mass
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Equality up to f32 accumulation error, relative to the magnitude.
pub(crate) fn same_point(a: Vec2, b: Vec2) -> bool {
    a.distance(b) <= 1e-3 * (1.0 + a.length().max(b.length()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        bodies: &HashMap<NodeId, (Vec2, f32)>,
    ) -> impl Fn(NodeId) -> Option<(Vec2, f32)> + '_ {
        move |id| bodies.get(&id).copied()
    }

    #[test]
    fn test_complete_tree_shape() {
        let tree = SpatialTree::new(1000.0, 3);
        assert_eq!(tree.len(), 1 + 4 + 16 + 64);
        assert_eq!(tree.leaves().count(), 64);
        assert_eq!(tree.edge_cell_count(), 8);
        assert_eq!(tree.leaf_cell_size(), 125.0);
        assert!(tree.leaves().all(|l| tree.node(l).depth() == 3));
    }

    #[test]
    fn test_children_follow_parents_in_arena() {
        let tree = SpatialTree::new(256.0, 4);
        for i in 0..tree.len() {
            if let Some(children) = tree.node(NodeIndex(i as u32)).children() {
                for c in children {
                    assert!(c.0 as usize > i);
                    assert_eq!(tree.node(c).parent(), Some(NodeIndex(i as u32)));
                }
            }
        }
    }

    #[test]
    fn test_leaf_at_matches_area() {
        let tree = SpatialTree::new(1000.0, 5);
        let samples = [
            Vec2::new(-500.0, -500.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(-0.001, 0.0),
            Vec2::new(31.25, -31.25),
            Vec2::new(499.99, 499.99),
            Vec2::new(123.4, -321.0),
        ];
        for p in samples {
            let leaf = tree.leaf_at(p);
            assert!(tree.node(leaf).is_leaf());
            assert!(tree.node(leaf).area().contains(p), "{p:?} not in {leaf:?}");
        }
    }

    #[test]
    fn test_leaf_at_clamps_outside_points() {
        let tree = SpatialTree::new(100.0, 2);
        let leaf = tree.leaf_at(Vec2::new(1e6, -1e6));
        let area = tree.node(leaf).area();
        assert_eq!(area.max.x, 50.0);
        assert_eq!(area.min.y, -50.0);
    }

    #[test]
    fn test_quadrant_order() {
        let tree = SpatialTree::new(100.0, 1);
        let [tl, tr, bl, br] = tree.root().children().unwrap();
        assert!(tree.node(tl).area().contains(Vec2::new(-10.0, -10.0)));
        assert!(tree.node(tr).area().contains(Vec2::new(10.0, -10.0)));
        assert!(tree.node(bl).area().contains(Vec2::new(-10.0, 10.0)));
        assert!(tree.node(br).area().contains(Vec2::new(10.0, 10.0)));
    }

    #[test]
    fn test_attach_marks_ancestors_dirty() {
        let mut tree = SpatialTree::new(100.0, 3);
        let leaf = tree.leaf_at(Vec2::new(10.0, 10.0));
        tree.attach(leaf, NodeId(1));

        let mut cursor = Some(leaf);
        while let Some(i) = cursor {
            assert!(tree.node(i).is_dirty());
            cursor = tree.node(i).parent();
        }
        let other = tree.leaf_at(Vec2::new(-40.0, -40.0));
        assert!(!tree.node(other).is_dirty());
    }

    #[test]
    fn test_update_aggregates_and_clears_dirty() {
        let mut tree = SpatialTree::new(100.0, 3);
        let mut bodies = HashMap::new();
        bodies.insert(NodeId(1), (Vec2::new(-20.0, -20.0), 1.0));
        bodies.insert(NodeId(2), (Vec2::new(20.0, 20.0), 3.0));
        for (id, (p, _)) in &bodies {
            tree.attach(tree.leaf_at(*p), *id);
        }

        let visited = tree.update(lookup_from(&bodies), false);
        assert!(visited > 0);
        assert!(!tree.root().is_dirty());
        assert_eq!(tree.root().count(), 2);
        assert_eq!(tree.root().mass(), 4.0);
        assert_eq!(tree.root().center_of_mass(), Vec2::new(10.0, 10.0));
        tree.check_mass_conservation().unwrap();

        // Clean tree: nothing to do unless forced.
        assert_eq!(tree.update(lookup_from(&bodies), false), 0);
        assert_eq!(tree.update(lookup_from(&bodies), true), tree.len());
    }

    #[test]
    fn test_detach_moves_mass() {
        let mut tree = SpatialTree::new(100.0, 2);
        let mut bodies = HashMap::new();
        bodies.insert(NodeId(7), (Vec2::new(-30.0, -30.0), 1.0));
        let from = tree.leaf_at(Vec2::new(-30.0, -30.0));
        tree.attach(from, NodeId(7));
        tree.update(lookup_from(&bodies), false);

        bodies.insert(NodeId(7), (Vec2::new(30.0, 30.0), 1.0));
        let to = tree.leaf_at(Vec2::new(30.0, 30.0));
        assert!(tree.detach(from, NodeId(7)));
        assert!(!tree.detach(from, NodeId(7)));
        tree.attach(to, NodeId(7));
        tree.update(lookup_from(&bodies), false);

        assert_eq!(tree.node(from).count(), 0);
        assert_eq!(tree.node(to).count(), 1);
        assert_eq!(tree.root().count(), 1);
        tree.check_mass_conservation().unwrap();
    }

    #[test]
    fn test_touch_refreshes_center_of_mass_within_leaf() {
        let mut tree = SpatialTree::new(1000.0, 4);
        let mut bodies = HashMap::new();
        bodies.insert(NodeId(1), (Vec2::new(-430.0, -430.0), 1.0));
        bodies.insert(NodeId(2), (Vec2::new(100.0, 100.0), 1.0));
        for (id, (p, _)) in &bodies {
            tree.attach(tree.leaf_at(*p), *id);
        }
        tree.update(lookup_from(&bodies), false);

        let leaf = tree.leaf_at(Vec2::new(-430.0, -430.0));
        bodies.insert(NodeId(1), (Vec2::new(-400.0, -400.0), 1.0));
        assert_eq!(tree.leaf_at(Vec2::new(-400.0, -400.0)), leaf);

        // Without a touch the clean tree keeps the old aggregate.
        assert_eq!(tree.update(lookup_from(&bodies), false), 0);
        assert_eq!(tree.root().center_of_mass(), Vec2::new(-165.0, -165.0));

        tree.touch(leaf);
        assert!(tree.root().is_dirty());
        tree.update(lookup_from(&bodies), false);
        assert_eq!(tree.root().center_of_mass(), Vec2::new(-150.0, -150.0));
        tree.check_mass_conservation().unwrap();
    }

    #[test]
    fn test_mass_check_catches_stale_center_of_mass() {
        let mut tree = SpatialTree::new(100.0, 2);
        let mut bodies = HashMap::new();
        bodies.insert(NodeId(1), (Vec2::new(-30.0, -30.0), 1.0));
        bodies.insert(NodeId(2), (Vec2::new(30.0, 30.0), 1.0));
        for (id, (p, _)) in &bodies {
            tree.attach(tree.leaf_at(*p), *id);
        }
        tree.update(lookup_from(&bodies), false);
        tree.check_mass_conservation().unwrap();

        tree.nodes[0].center_of_mass = Vec2::new(5.0, 5.0);
        assert!(matches!(
            tree.check_mass_conservation(),
            Err(LayoutError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_intersect_point_uses_hit_radius() {
        let mut tree = SpatialTree::new(1000.0, 4);
        let mut bodies = HashMap::new();
        bodies.insert(NodeId(1), (Vec2::new(0.0, 0.0), 5.0));
        bodies.insert(NodeId(2), (Vec2::new(100.0, 100.0), 5.0));
        for (id, (p, _)) in &bodies {
            tree.attach(tree.leaf_at(*p), *id);
        }

        let mut hits = Vec::new();
        tree.intersect_point(Vec2::new(2.0, 2.0), lookup_from(&bodies), &mut hits);
        assert_eq!(hits, vec![NodeId(1)]);

        hits.clear();
        tree.intersect_point(Vec2::new(50.0, 50.0), lookup_from(&bodies), &mut hits);
        assert!(hits.is_empty());

        hits.clear();
        tree.intersect_point(Vec2::new(105.0, 100.0), lookup_from(&bodies), &mut hits);
        assert_eq!(hits, vec![NodeId(2)]);
    }

    #[test]
    fn test_fill_intersecting_prunes() {
        let mut tree = SpatialTree::new(1000.0, 4);
        let positions = [
            (NodeId(1), Vec2::new(-400.0, -400.0)),
            (NodeId(2), Vec2::new(-390.0, -380.0)),
            (NodeId(3), Vec2::new(400.0, 400.0)),
        ];
        for (id, p) in positions {
            tree.attach(tree.leaf_at(p), id);
        }

        let mut found = Vec::new();
        let area = Rect::new(Vec2::new(-450.0, -450.0), Vec2::new(-350.0, -350.0));
        tree.fill_intersecting(&area, &mut found);
        found.sort();
        assert_eq!(found, vec![NodeId(1), NodeId(2)]);

        found.clear();
        tree.fill_intersecting(&tree.world(), &mut found);
        assert_eq!(found.len(), 3);
    }
}
