//! Engine configuration.
//!
//! Everything here is fixed at construction time. Values are serde-friendly so
//! binaries can layer defaults, files and environment overrides.

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::Result;

/// Deepest supported quad-tree (4^10 leaves).
pub const MAX_TREE_DEPTH: u8 = 10;

/// Force model parameters shared by every technique.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    /// Repulsion strength (inverse square).
    pub repulsion: f32,
    /// Spring constant along neighbor edges.
    pub attraction: f32,
    /// Rest length of neighbor springs.
    pub ideal_length: f32,
    /// Pull toward the world center.
    pub gravity: f32,
    /// Velocity retained per step (0-1, lower = more damping).
    pub damping: f32,
    /// Barnes-Hut opening threshold (cell width / distance).
    pub theta: f32,
    /// Hard cap on body speed.
    pub max_speed: f32,
    /// Softening distance for repulsion between near-coincident bodies.
    pub min_distance: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            repulsion: 20_000.0,
            attraction: 0.2,
            ideal_length: 80.0,
            gravity: 0.02,
            damping: 0.9,
            theta: 0.5,
            max_speed: 500.0,
            min_distance: 1.0,
        }
    }
}

/// Configuration for a [`LayoutEngine`](crate::LayoutEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Edge length of the square world, centered on the origin.
    pub world_extent: f32,
    /// Number of physics worker threads.
    pub worker_count: usize,
    /// Depth of the quad-tree; leaves are `world_extent / 2^max_depth` wide.
    pub max_depth: u8,
    /// Capacity of the mutation command channel.
    pub command_capacity: usize,
    /// Idle time between simulation steps.
    pub tick_interval_ms: u64,
    /// Use this step length instead of wall-clock time.
    pub fixed_dt: Option<f32>,
    /// Upper bound for a wall-clock step.
    pub max_step_dt: f32,
    /// Force a full aggregate recompute every this many steps.
    pub recompute_interval: u64,
    /// Kinetic energy per body at which the time scale starts shrinking.
    pub energy_budget: f32,
    /// Lower bound of the adaptive time scale.
    pub min_time_scale: f32,
    /// Kinetic energy per body under which the layout reports settled.
    pub settle_energy: f32,
    /// Force model.
    pub forces: ForceParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .min(8);
        Self {
            world_extent: 1000.0,
            worker_count: workers,
            max_depth: 6,
            command_capacity: 65_536,
            tick_interval_ms: 16,
            fixed_dt: None,
            max_step_dt: 0.05,
            recompute_interval: 64,
            energy_budget: 50.0,
            min_time_scale: 0.05,
            settle_energy: 0.01,
            forces: ForceParams::default(),
        }
    }
}

impl EngineConfig {
    /// Config suited to small graphs and tests: two workers, shallow tree.
    pub fn small() -> Self {
        Self {
            worker_count: 2,
            max_depth: 4,
            ..Default::default()
        }
    }

    /// Config for graphs with tens of thousands of nodes.
    pub fn large() -> Self {
        Self {
            world_extent: 20_000.0,
            max_depth: 8,
            recompute_interval: 32,
            forces: ForceParams {
                theta: 0.9,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Width of a single leaf cell.
    pub fn leaf_cell_size(&self) -> f32 {
        self.world_extent / self.edge_cell_count() as f32
    }

    /// Number of leaf cells along one edge of the world.
    pub fn edge_cell_count(&self) -> usize {
        1usize << self.max_depth
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.world_extent.is_finite() || self.world_extent <= 0.0 {
            return Err(LayoutError::InvalidExtent(self.world_extent));
        }
        if self.worker_count == 0 {
            return Err(LayoutError::InvalidWorkerCount(self.worker_count));
        }
        if self.max_depth == 0 || self.max_depth > MAX_TREE_DEPTH {
            return Err(LayoutError::InvalidDepth {
                depth: self.max_depth,
                max: MAX_TREE_DEPTH,
            });
        }
        if self.command_capacity == 0 {
            return Err(invalid("command_capacity", "must be >= 1"));
        }
        if self.recompute_interval == 0 {
            return Err(invalid("recompute_interval", "must be >= 1"));
        }
        if let Some(dt) = self.fixed_dt {
            if !dt.is_finite() || dt <= 0.0 {
                return Err(invalid("fixed_dt", format!("{dt} is not a positive step")));
            }
        }
        if !(self.max_step_dt > 0.0) {
            return Err(invalid("max_step_dt", "must be positive"));
        }
        if !(self.min_time_scale > 0.0 && self.min_time_scale <= 1.0) {
            return Err(invalid("min_time_scale", "must be within (0, 1]"));
        }
        if !(self.energy_budget > 0.0) {
            return Err(invalid("energy_budget", "must be positive"));
        }
        let f = &self.forces;
        if !(0.0..=1.0).contains(&f.damping) {
            return Err(invalid("forces.damping", "must be within [0, 1]"));
        }
        if f.theta < 0.0 || !f.theta.is_finite() {
            return Err(invalid("forces.theta", "must be a non-negative number"));
        }
        if !(f.max_speed > 0.0) {
            return Err(invalid("forces.max_speed", "must be positive"));
        }
        if !(f.min_distance > 0.0) {
            return Err(invalid("forces.min_distance", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> LayoutError {
    LayoutError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}
