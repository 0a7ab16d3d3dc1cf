//! Per-node physics state and the table that owns it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;
use crate::tree::NodeIndex;
use crate::Result;

/// Externally assigned, stable node identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// Load/save shape of a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    /// Initial position; unpositioned nodes are placed at random.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec2>,
    /// Radius used by point queries.
    #[serde(default = "default_hit_radius")]
    pub hit_radius: f32,
    /// Mass; one unit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass: Option<f32>,
    /// Undirected adjacency.
    #[serde(default)]
    pub neighbors: Vec<NodeId>,
}

fn default_hit_radius() -> f32 {
    5.0
}

impl NodeDefinition {
    pub fn new(id: u64) -> Self {
        Self {
            id: NodeId(id),
            position: None,
            hit_radius: default_hit_radius(),
            mass: None,
            neighbors: Vec::new(),
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Vec2::new(x, y));
        self
    }

    pub fn with_neighbors(mut self, neighbors: impl IntoIterator<Item = u64>) -> Self {
        self.neighbors = neighbors.into_iter().map(NodeId).collect();
        self
    }

    pub fn with_hit_radius(mut self, radius: f32) -> Self {
        self.hit_radius = radius;
        self
    }
}

/// Read a JSON array of node definitions.
pub fn read_definitions(path: impl AsRef<Path>) -> Result<Vec<NodeDefinition>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write node definitions as a pretty-printed JSON array.
pub fn write_definitions(path: impl AsRef<Path>, definitions: &[NodeDefinition]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, definitions)?;
    writer.flush()?;
    Ok(())
}

/// Position, velocity and kinetic energy of a body.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Kinematics {
    pub position: Vec2,
    pub velocity: Vec2,
    pub energy: f32,
}

impl Kinematics {
    pub fn at_rest(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// Inputs captured during the Pre phase of a step.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    /// Current position and mass of each declared neighbor.
    pub neighbors: Vec<(Vec2, f32)>,
}

/// Physics state of one graph node.
///
/// `current` is what every worker reads during a step; `pending` is written by
/// the single worker that owns the body in the Mid phase and committed in the
/// Post phase, so results never depend on task order.
#[derive(Debug)]
pub struct Body {
    id: NodeId,
    hit_radius: f32,
    mass: f32,
    neighbors: Vec<NodeId>,
    leaf: Option<NodeIndex>,
    current: RwLock<Kinematics>,
    pending: Mutex<Kinematics>,
    inputs: Mutex<StepInputs>,
}

impl Body {
    pub fn new(id: NodeId, position: Vec2, hit_radius: f32, mass: f32) -> Self {
        let state = Kinematics::at_rest(position);
        Self {
            id,
            hit_radius,
            mass,
            neighbors: Vec::new(),
            leaf: None,
            current: RwLock::new(state),
            pending: Mutex::new(state),
            inputs: Mutex::new(StepInputs::default()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn hit_radius(&self) -> f32 {
        self.hit_radius
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Leaf the body is docked in.
    pub fn leaf(&self) -> Option<NodeIndex> {
        self.leaf
    }

    pub(crate) fn set_leaf(&mut self, leaf: Option<NodeIndex>) {
        self.leaf = leaf;
    }

    pub fn state(&self) -> Kinematics {
        *self.current.read()
    }

    pub fn position(&self) -> Vec2 {
        self.current.read().position
    }

    pub fn energy(&self) -> f32 {
        self.current.read().energy
    }

    pub(crate) fn set_position(&self, position: Vec2) {
        self.current.write().position = position;
    }

    pub(crate) fn pending(&self) -> &Mutex<Kinematics> {
        &self.pending
    }

    pub(crate) fn inputs(&self) -> &Mutex<StepInputs> {
        &self.inputs
    }

    /// Copy pending state into current state and refresh kinetic energy.
    pub(crate) fn commit(&self) -> f32 {
        let mut next = *self.pending.lock();
        next.energy = 0.5 * self.mass * next.velocity.length_squared();
        *self.current.write() = next;
        next.energy
    }

    fn link(&mut self, other: NodeId) -> bool {
        if other == self.id || self.neighbors.contains(&other) {
            return false;
        }
        self.neighbors.push(other);
        true
    }

    fn unlink(&mut self, other: NodeId) -> bool {
        let before = self.neighbors.len();
        self.neighbors.retain(|n| *n != other);
        before != self.neighbors.len()
    }
}

/// Owner of every body, addressed by id or by dense slot.
///
/// Slots are contiguous so worker tasks can be handed index ranges; removal
/// swaps the last body into the freed slot.
#[derive(Debug, Default)]
pub struct BodyTable {
    bodies: Vec<Body>,
    index: HashMap<NodeId, usize>,
}

impl BodyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Body> {
        self.index.get(&id).map(|&slot| &self.bodies[slot])
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Body> {
        match self.index.get(&id) {
            Some(&slot) => Some(&mut self.bodies[slot]),
            None => None,
        }
    }

    pub fn by_slot(&self, slot: usize) -> Option<&Body> {
        self.bodies.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Body> {
        self.bodies.iter_mut()
    }

    /// Insert a body; returns `false` (and drops it) when the id is taken.
    pub fn insert(&mut self, body: Body) -> bool {
        if self.index.contains_key(&body.id) {
            return false;
        }
        self.index.insert(body.id, self.bodies.len());
        self.bodies.push(body);
        true
    }

    /// Remove a body and every edge that references it.
    pub fn remove(&mut self, id: NodeId) -> Option<Body> {
        let slot = self.index.remove(&id)?;
        let body = self.bodies.swap_remove(slot);
        if let Some(moved) = self.bodies.get(slot) {
            self.index.insert(moved.id, slot);
        }
        for neighbor in &body.neighbors {
            if let Some(n) = self.get_mut(*neighbor) {
                n.unlink(id);
            }
        }
        Some(body)
    }

    /// Add an undirected edge. Self loops and unknown ids are ignored.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> bool {
        if a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }
        let added = self.get_mut(a).map(|body| body.link(b)).unwrap_or(false);
        if let Some(body) = self.get_mut(b) {
            body.link(a);
        }
        added
    }

    /// Remove an undirected edge.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> bool {
        let removed = self.get_mut(a).map(|body| body.unlink(b)).unwrap_or(false);
        if let Some(body) = self.get_mut(b) {
            body.unlink(a);
        }
        removed
    }

    /// Largest hit radius among all bodies.
    pub fn max_hit_radius(&self) -> f32 {
        self.bodies
            .iter()
            .map(|b| b.hit_radius)
            .fold(0.0, f32::max)
    }

    /// Sum of kinetic energy over all bodies.
    pub fn total_energy(&self) -> f32 {
        self.bodies.iter().map(Body::energy).sum()
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(ids: &[u64]) -> BodyTable {
        let mut table = BodyTable::new();
        for &id in ids {
            assert!(table.insert(Body::new(NodeId(id), Vec2::ZERO, 5.0, 1.0)));
        }
        table
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut table = table_with(&[1, 2]);
        assert!(!table.insert(Body::new(NodeId(1), Vec2::new(9.0, 9.0), 5.0, 1.0)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(NodeId(1)).unwrap().position(), Vec2::ZERO);
    }

    #[test]
    fn test_connect_is_undirected_without_self_loops() {
        let mut table = table_with(&[1, 2, 3]);
        assert!(table.connect(NodeId(1), NodeId(2)));
        assert!(!table.connect(NodeId(2), NodeId(1)));
        assert!(!table.connect(NodeId(3), NodeId(3)));
        assert!(!table.connect(NodeId(1), NodeId(42)));
        assert_eq!(table.get(NodeId(1)).unwrap().neighbors(), &[NodeId(2)]);
        assert_eq!(table.get(NodeId(2)).unwrap().neighbors(), &[NodeId(1)]);
        assert!(table.get(NodeId(3)).unwrap().neighbors().is_empty());
    }

    #[test]
    fn test_remove_reindexes_and_unlinks() {
        let mut table = table_with(&[1, 2, 3]);
        table.connect(NodeId(1), NodeId(3));
        table.connect(NodeId(2), NodeId(3));

        let removed = table.remove(NodeId(1)).unwrap();
        assert_eq!(removed.id(), NodeId(1));
        assert!(table.remove(NodeId(1)).is_none());
        assert_eq!(table.len(), 2);
        // Body 3 was swapped into slot 0.
        assert_eq!(table.by_slot(0).unwrap().id(), NodeId(3));
        assert_eq!(table.get(NodeId(3)).unwrap().neighbors(), &[NodeId(2)]);
    }

    #[test]
    fn test_commit_computes_energy() {
        let body = Body::new(NodeId(1), Vec2::ZERO, 5.0, 2.0);
        *body.pending().lock() = Kinematics {
            position: Vec2::new(1.0, 1.0),
            velocity: Vec2::new(3.0, 4.0),
            energy: 0.0,
        };
        let energy = body.commit();
        assert_eq!(energy, 25.0);
        assert_eq!(body.state().position, Vec2::new(1.0, 1.0));
        assert_eq!(body.energy(), 25.0);
    }

    #[test]
    fn test_definition_json_shape() {
        let def: NodeDefinition =
            serde_json::from_str(r#"{"id": 4, "position": {"x": 1.0, "y": 2.0}, "neighbors": [5]}"#)
                .unwrap();
        assert_eq!(def.id, NodeId(4));
        assert_eq!(def.position, Some(Vec2::new(1.0, 2.0)));
        assert_eq!(def.hit_radius, 5.0);
        assert_eq!(def.neighbors, vec![NodeId(5)]);

        let json = serde_json::to_value(NodeDefinition::new(9)).unwrap();
        assert!(json.get("position").is_none());
        assert_eq!(json["id"], 9);
    }

    #[test]
    fn test_definition_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let defs = vec![
            NodeDefinition::new(1).at(1.5, -2.0).with_neighbors([2]),
            NodeDefinition::new(2).with_hit_radius(3.0),
        ];
        write_definitions(&path, &defs).unwrap();
        assert_eq!(read_definitions(&path).unwrap(), defs);

        assert!(matches!(
            read_definitions(dir.path().join("missing.json")),
            Err(crate::LayoutError::Io(_))
        ));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_definitions(&path),
            Err(crate::LayoutError::Serialization(_))
        ));
    }
}
