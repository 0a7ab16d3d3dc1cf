//! A layout session: bodies, tree, workers and the per-step pipeline.
//!
//! [`Simulation`] is single-owner. The engine thread drives it; tests and batch
//! tools can drive it directly with a fixed step length.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::body::{Body, BodyTable, NodeDefinition, NodeId};
use crate::command::Command;
use crate::config::{EngineConfig, ForceParams};
use crate::forces::{integrate, ForceContext, Technique};
use crate::geometry::{Rect, Vec2};
use crate::pool::WorkerPool;
use crate::snapshot::NodePosition;
use crate::tree::{same_point, SpatialTree};
use crate::{LayoutError, Result};

/// Coarse state of a layout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutState {
    /// No bodies loaded.
    Empty,
    /// Physics is advancing.
    Running,
    /// Layout deactivated; commands and queries are still served.
    Paused,
    /// Kinetic energy per body fell under the settle threshold.
    Settled,
}

/// Summary published after every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutStats {
    pub step: u64,
    pub body_count: usize,
    pub energy: f32,
    pub time_scale: f32,
    pub technique: Technique,
    pub state: LayoutState,
}

/// Result of one [`Simulation::step`].
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u64,
    pub energy: f32,
    pub time_scale: f32,
    /// Bodies that changed leaf after integration.
    pub redocked: usize,
    pub visible: Vec<NodePosition>,
    /// Answer to the last point query queued during the step; empty after a
    /// reset with no later query.
    pub intersections: Option<Vec<NodePosition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Snapshot neighbor positions.
    Pre,
    /// Net force and integration into pending state.
    Mid,
    /// Commit pending state.
    Post,
}

#[derive(Debug, Clone, Copy)]
struct PhaseParams {
    forces: ForceParams,
    technique: Technique,
    dt: f32,
}

/// State shared with worker tasks.
struct World {
    bodies: RwLock<BodyTable>,
    tree: RwLock<SpatialTree>,
}

impl World {
    fn run(&self, phase: Phase, slots: Range<usize>, params: &PhaseParams) {
        let bodies = self.bodies.read();
        match phase {
            Phase::Pre => {
                for slot in slots {
                    // Slots vanish only between steps; a miss is a no-op.
                    let Some(body) = bodies.by_slot(slot) else {
                        continue;
                    };
                    let neighbors = body
                        .neighbors()
                        .iter()
                        .filter_map(|id| bodies.get(*id))
                        .map(|n| (n.position(), n.mass()))
                        .collect();
                    body.inputs().lock().neighbors = neighbors;
                }
            }
            Phase::Mid => {
                let tree = self.tree.read();
                let world = tree.world();
                let ctx = ForceContext {
                    bodies: &bodies,
                    tree: &tree,
                    params: &params.forces,
                    technique: params.technique,
                };
                for slot in slots {
                    let Some(body) = bodies.by_slot(slot) else {
                        continue;
                    };
                    let state = body.state();
                    let force = {
                        let inputs = body.inputs().lock();
                        ctx.net_force(body, &state, &inputs)
                    };
                    *body.pending().lock() =
                        integrate(&params.forces, &state, force, params.dt, &world);
                }
            }
            Phase::Post => {
                for slot in slots {
                    if let Some(body) = bodies.by_slot(slot) {
                        body.commit();
                    }
                }
            }
        }
    }
}

/// Dock `body` in the leaf under its position. Returns whether it changed
/// leaf; staying put still dirties the leaf so its aggregate follows the body.
fn dock(tree: &mut SpatialTree, body: &mut Body) -> bool {
    let target = tree.leaf_at(body.position());
    match body.leaf() {
        Some(current) if current == target => {
            tree.touch(current);
            return false;
        }
        Some(current) => {
            tree.detach(current, body.id());
        }
        None => {}
    }
    tree.attach(target, body.id());
    body.set_leaf(Some(target));
    true
}

fn random_position(rng: &mut impl Rng, world: &Rect) -> Vec2 {
    let p = Vec2::new(
        rng.random_range(world.min.x..world.max.x),
        rng.random_range(world.min.y..world.max.y),
    );
    world.clamp(p)
}

/// Bodies, tree and worker pool of one layout.
pub struct Simulation {
    config: EngineConfig,
    world: Arc<World>,
    pool: WorkerPool,
    technique: Technique,
    active: bool,
    viewport: Rect,
    time_scale: f32,
    energy: f32,
    steps: u64,
    /// Physics steps since the last load or reset.
    physics_steps: u64,
    query: Option<Vec2>,
    /// Earlier query answers refer to bodies that no longer exist.
    stale_hits: bool,
}

impl Simulation {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let tree = SpatialTree::new(config.world_extent, config.max_depth);
        let viewport = tree.world();
        let pool = WorkerPool::new(config.worker_count)?;
        Ok(Self {
            world: Arc::new(World {
                bodies: RwLock::new(BodyTable::new()),
                tree: RwLock::new(tree),
            }),
            pool,
            technique: Technique::default(),
            active: false,
            viewport,
            time_scale: 1.0,
            energy: 0.0,
            steps: 0,
            physics_steps: 0,
            query: None,
            stale_hits: false,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    pub fn set_technique(&mut self, technique: Technique) {
        if technique != self.technique {
            debug!(from = %self.technique, to = %technique, "technique_changed");
            self.technique = technique;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// The bounded square bodies live in.
    pub fn world_rect(&self) -> Rect {
        self.world.tree.read().world()
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Aggregate kinetic energy after the last physics step.
    pub fn energy(&self) -> f32 {
        self.energy
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    pub fn body_count(&self) -> usize {
        self.world.bodies.read().len()
    }

    pub fn position(&self, id: NodeId) -> Option<Vec2> {
        self.world.bodies.read().get(id).map(Body::position)
    }

    /// Every body with its current position, in table order.
    pub fn positions(&self) -> Vec<NodePosition> {
        self.world
            .bodies
            .read()
            .iter()
            .map(|b| NodePosition {
                id: b.id(),
                position: b.position(),
            })
            .collect()
    }

    pub fn stats(&self) -> LayoutStats {
        let body_count = self.body_count();
        let state = if body_count == 0 {
            LayoutState::Empty
        } else if !self.active {
            LayoutState::Paused
        } else if self.physics_steps > 0
            && self.energy <= self.config.settle_energy * body_count as f32
        {
            LayoutState::Settled
        } else {
            LayoutState::Running
        };
        LayoutStats {
            step: self.steps,
            body_count,
            energy: self.energy,
            time_scale: self.time_scale,
            technique: self.technique,
            state,
        }
    }

    /// Drop every body and rebuild the tree.
    pub fn reset(&mut self) {
        let tree = SpatialTree::new(self.config.world_extent, self.config.max_depth);
        *self.world.tree.write() = tree;
        self.world.bodies.write().clear();
        self.time_scale = 1.0;
        self.energy = 0.0;
        self.physics_steps = 0;
        self.query = None;
        self.stale_hits = true;
        debug!("layout_reset");
    }

    /// Replace all bodies and edges.
    ///
    /// Bodies without a position, or every body when `force_random` is set,
    /// are placed uniformly at random inside the world. Unknown neighbor ids
    /// are skipped and edges are made symmetric.
    pub fn load(&mut self, definitions: &[NodeDefinition], force_random: bool) {
        self.reset();

        let mut rng = rand::rng();
        let mut bodies = self.world.bodies.write();
        let mut tree = self.world.tree.write();
        let world = tree.world();
        let mut randomized = 0usize;

        for def in definitions {
            let position = match def.position {
                Some(p) if !force_random && p.is_finite() => tree.clamp(p),
                _ => {
                    randomized += 1;
                    random_position(&mut rng, &world)
                }
            };
            let hit_radius = if def.hit_radius.is_finite() && def.hit_radius >= 0.0 {
                def.hit_radius
            } else {
                warn!(node = def.id.0, radius = def.hit_radius, "load_invalid_hit_radius");
                0.0
            };
            let mass = match def.mass {
                None => 1.0,
                Some(m) if m.is_finite() && m > 0.0 => m,
                Some(m) => {
                    warn!(node = def.id.0, mass = m, "load_invalid_mass");
                    1.0
                }
            };

            if !bodies.insert(Body::new(def.id, position, hit_radius, mass)) {
                warn!(node = def.id.0, "load_duplicate_id");
                continue;
            }
            if let Some(body) = bodies.get_mut(def.id) {
                dock(&mut tree, body);
            }
        }

        let mut edges = 0usize;
        for def in definitions {
            for &neighbor in &def.neighbors {
                if bodies.connect(def.id, neighbor) {
                    edges += 1;
                } else if !bodies.contains(neighbor) {
                    debug!(node = def.id.0, neighbor = neighbor.0, "load_unknown_neighbor");
                }
            }
        }

        tree.update(|id| bodies.get(id).map(|b| (b.position(), b.mass())), true);
        info!(bodies = bodies.len(), edges, randomized, "layout_loaded");
    }

    /// Current id, position, radius, mass and neighbors of every body.
    pub fn save(&self) -> Vec<NodeDefinition> {
        self.world
            .bodies
            .read()
            .iter()
            .map(|b| NodeDefinition {
                id: b.id(),
                position: Some(b.position()),
                hit_radius: b.hit_radius(),
                mass: (b.mass() != 1.0).then_some(b.mass()),
                neighbors: b.neighbors().to_vec(),
            })
            .collect()
    }

    /// Apply one mutation. Unknown or duplicate ids are ignored and malformed
    /// commands are dropped.
    pub fn apply(&mut self, command: Command) {
        if let Some(reason) = command.malformed() {
            warn!(command = command.name(), reason, "command_dropped");
            return;
        }

        match command {
            Command::Reset => self.reset(),
            Command::Add {
                id,
                position,
                hit_radius,
            } => {
                let mut bodies = self.world.bodies.write();
                let mut tree = self.world.tree.write();
                let position = tree.clamp(position);
                if !bodies.insert(Body::new(id, position, hit_radius, 1.0)) {
                    debug!(node = id.0, "add_ignored_duplicate");
                    return;
                }
                if let Some(body) = bodies.get_mut(id) {
                    dock(&mut tree, body);
                }
            }
            Command::Delete { id } => {
                let mut bodies = self.world.bodies.write();
                let mut tree = self.world.tree.write();
                match bodies.remove(id) {
                    Some(body) => {
                        if let Some(leaf) = body.leaf() {
                            tree.detach(leaf, id);
                        }
                    }
                    None => debug!(node = id.0, "delete_ignored_unknown"),
                }
            }
            Command::Move { id, delta } => {
                let mut bodies = self.world.bodies.write();
                let mut tree = self.world.tree.write();
                let Some(body) = bodies.get_mut(id) else {
                    debug!(node = id.0, "move_ignored_unknown");
                    return;
                };
                let target = tree.clamp(body.position() + delta);
                body.set_position(target);
                dock(&mut tree, body);
            }
            Command::Connect { a, b } => {
                if !self.world.bodies.write().connect(a, b) {
                    debug!(a = a.0, b = b.0, "connect_ignored");
                }
            }
            Command::Disconnect { a, b } => {
                if !self.world.bodies.write().disconnect(a, b) {
                    debug!(a = a.0, b = b.0, "disconnect_ignored");
                }
            }
            Command::Intersect { point } => self.query = Some(point),
        }
    }

    /// Advance one step.
    ///
    /// Commands are applied in order, the tree is refreshed and any point query
    /// is answered; then, if the layout is active, the Pre, Mid and Post phases
    /// run on the worker pool with a barrier between each. `elapsed` is scaled
    /// by the adaptive time scale derived from the previous step.
    pub fn step<I>(&mut self, commands: I, elapsed: f32) -> StepReport
    where
        I: IntoIterator<Item = Command>,
    {
        let mut applied = 0usize;
        for command in commands {
            self.apply(command);
            applied += 1;
        }
        self.refresh(false);
        if cfg!(debug_assertions) && applied > 0 {
            if let Err(e) = self.check_invariants() {
                error!(error = %e, "layout_invariant_violated");
            }
        }
        let stale = std::mem::take(&mut self.stale_hits);
        let intersections = match self.query.take() {
            Some(point) => Some(self.intersect_nodes(point)),
            None => stale.then(Vec::new),
        };

        let body_count = self.body_count();
        let mut redocked = 0;
        if self.active && body_count > 0 {
            let params = PhaseParams {
                forces: self.config.forces,
                technique: self.technique,
                dt: elapsed.max(0.0) * self.time_scale,
            };
            self.run_phase(Phase::Pre, &params);
            self.run_phase(Phase::Mid, &params);
            self.run_phase(Phase::Post, &params);

            self.energy = self.world.bodies.read().total_energy();
            self.time_scale = self.next_time_scale(self.energy, body_count);
            self.physics_steps += 1;
            redocked = self.redock();
        }

        self.steps += 1;
        let forced = self.steps % self.config.recompute_interval == 0;
        let visited = self.refresh(forced);
        let visible = self.visible_nodes();

        debug!(
            step = self.steps,
            bodies = body_count,
            commands = applied,
            energy = self.energy,
            time_scale = self.time_scale,
            redocked,
            visited,
            "layout_step_complete"
        );

        StepReport {
            step: self.steps,
            energy: self.energy,
            time_scale: self.time_scale,
            redocked,
            visible,
            intersections,
        }
    }

    fn run_phase(&self, phase: Phase, params: &PhaseParams) {
        let count = self.world.bodies.read().len();
        let chunk = count.div_ceil(self.pool.len()).max(1);
        for (worker, start) in (0..count).step_by(chunk).enumerate() {
            let slots = start..(start + chunk).min(count);
            let world = Arc::clone(&self.world);
            let params = *params;
            self.pool
                .push(worker, Box::new(move || world.run(phase, slots, &params)));
        }
        self.pool.wait_all();
    }

    fn redock(&self) -> usize {
        let mut bodies = self.world.bodies.write();
        let mut tree = self.world.tree.write();
        let mut moved = 0;
        for body in bodies.iter_mut() {
            if dock(&mut tree, body) {
                moved += 1;
            }
        }
        moved
    }

    fn refresh(&self, force: bool) -> usize {
        let bodies = self.world.bodies.read();
        let mut tree = self.world.tree.write();
        tree.update(|id| bodies.get(id).map(|b| (b.position(), b.mass())), force)
    }

    /// Shrink the scale at once when energy exceeds the budget; grow it back
    /// gradually as the layout calms down.
    fn next_time_scale(&self, energy: f32, body_count: usize) -> f32 {
        let min = self.config.min_time_scale;
        if !energy.is_finite() {
            return min;
        }
        let budget = self.config.energy_budget * body_count as f32;
        let target = if energy <= budget {
            1.0
        } else {
            (budget / energy).sqrt().clamp(min, 1.0)
        };
        if target < self.time_scale {
            target
        } else {
            (self.time_scale * 2.0).min(target)
        }
    }

    /// Bodies in the leaf under `point` whose hit radius reaches it.
    pub fn intersect_nodes(&self, point: Vec2) -> Vec<NodePosition> {
        let bodies = self.world.bodies.read();
        let tree = self.world.tree.read();
        let mut hits = Vec::new();
        tree.intersect_point(
            point,
            |id| bodies.get(id).map(|b| (b.position(), b.hit_radius())),
            &mut hits,
        );
        hits.into_iter()
            .filter_map(|id| {
                bodies.get(id).map(|b| NodePosition {
                    id,
                    position: b.position(),
                })
            })
            .collect()
    }

    /// Bodies docked in leaves touching the viewport, inflated by the largest
    /// hit radius.
    pub fn visible_nodes(&self) -> Vec<NodePosition> {
        let bodies = self.world.bodies.read();
        let tree = self.world.tree.read();
        let area = self.viewport.inflate(bodies.max_hit_radius());
        let mut ids = Vec::new();
        tree.fill_intersecting(&area, &mut ids);
        ids.into_iter()
            .filter_map(|id| {
                bodies.get(id).map(|b| NodePosition {
                    id,
                    position: b.position(),
                })
            })
            .collect()
    }

    /// Verify single leaf membership for every body and aggregate consistency.
    pub fn check_invariants(&self) -> Result<()> {
        let bodies = self.world.bodies.read();
        let tree = self.world.tree.read();

        let attached: usize = tree.leaves().map(|l| tree.node(l).attached().len()).sum();
        if attached != bodies.len() {
            return Err(LayoutError::inconsistent(format!(
                "{attached} attachments for {} bodies",
                bodies.len()
            )));
        }

        for body in bodies.iter() {
            let id = body.id();
            let Some(leaf) = body.leaf() else {
                return Err(LayoutError::inconsistent(format!("body {} is not docked", id.0)));
            };
            let node = tree.node(leaf);
            if !node.is_leaf() {
                return Err(LayoutError::inconsistent(format!(
                    "body {} docked in interior node {}",
                    id.0, leaf.0
                )));
            }
            if !node.area().contains(body.position()) {
                return Err(LayoutError::inconsistent(format!(
                    "body {} at {:?} outside its leaf {:?}",
                    id.0,
                    body.position(),
                    node.area()
                )));
            }
            let copies = node.attached().iter().filter(|a| **a == id).count();
            if copies != 1 {
                return Err(LayoutError::inconsistent(format!(
                    "body {} attached {copies} times to leaf {}",
                    id.0, leaf.0
                )));
            }
        }

        for leaf in tree.leaves() {
            let node = tree.node(leaf);
            let mut mass = 0.0;
            let mut weighted = Vec2::ZERO;
            for body in node.attached().iter().filter_map(|id| bodies.get(*id)) {
                mass += body.mass();
                weighted += body.position() * body.mass();
            }
            if (mass - node.mass()).abs() > 1e-3 * mass.max(1.0)
                || (mass > 0.0 && !same_point(weighted / mass, node.center_of_mass()))
            {
                return Err(LayoutError::inconsistent(format!(
                    "leaf {} aggregate ({}, {:?}) is stale",
                    leaf.0,
                    node.mass(),
                    node.center_of_mass()
                )));
            }
        }

        tree.check_mass_conservation()?;
        if tree.root().count() != bodies.len() {
            return Err(LayoutError::inconsistent(format!(
                "root counts {} bodies, table holds {}",
                tree.root().count(),
                bodies.len()
            )));
        }
        Ok(())
    }
}
