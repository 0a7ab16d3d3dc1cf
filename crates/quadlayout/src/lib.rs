//! Threaded force-directed graph layout with a quad-tree accelerated
//! Barnes-Hut approximation.
//!
//! Bodies live in a bounded square world partitioned by a fixed-depth
//! quad-tree. A dedicated simulation thread drains caller commands, steps the
//! physics on a worker pool and publishes read-only snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Callers                              │
//! │  add/move/delete/intersect ──▶ command channel (bounded)    │
//! │  visible/intersecting      ◀── double-buffered snapshots    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Simulation thread                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  Commands   │───▶│ Tree update │───▶│ Point query │      │
//! │  │   (FIFO)    │    │ (dirty only)│    │             │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Worker pool (per step)                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │     Pre     │─┃─▶│     Mid     │─┃─▶│    Post     │      │
//! │  │ (neighbors) │    │ (force +    │    │  (commit +  │      │
//! │  │             │    │  integrate) │    │   energy)   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                 ┃ = barrier (wait until clear)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Techniques
//!
//! - `NoRepulse`: springs only
//! - `BruteForce`: exact pairwise repulsion, O(n²)
//! - `Quad`: Barnes-Hut walk over the tree, O(n log n)
//! - `Fuzzy`: whole graph as one point mass plus neighbor terms, O(n)
//!
//! ## Example
//!
//! ```no_run
//! use quadlayout::{EngineConfig, LayoutEngine, NodeDefinition};
//!
//! let engine = LayoutEngine::new(EngineConfig::small())?;
//! engine.load(
//!     &[
//!         NodeDefinition::new(1).at(0.0, 0.0).with_neighbors([2]),
//!         NodeDefinition::new(2).at(10.0, 0.0),
//!     ],
//!     false,
//! );
//! engine.activate_layout();
//! engine.wait_for_steps(100);
//! for node in engine.save() {
//!     println!("{:?} {:?}", node.id, node.position);
//! }
//! # Ok::<(), quadlayout::LayoutError>(())
//! ```

mod body;
mod command;
mod config;
mod engine;
mod error;
mod forces;
mod geometry;
mod pool;
mod simulation;
mod snapshot;
mod tree;

pub use body::{
    read_definitions, write_definitions, Body, BodyTable, Kinematics, NodeDefinition, NodeId,
    StepInputs,
};
pub use command::Command;
pub use config::{EngineConfig, ForceParams, MAX_TREE_DEPTH};
pub use engine::LayoutEngine;
pub use error::LayoutError;
pub use forces::{integrate, repulsion, spring, ForceContext, Technique};
pub use geometry::{Rect, Vec2};
pub use pool::{Task, WorkerPool};
pub use simulation::{LayoutState, LayoutStats, Simulation, StepReport};
pub use snapshot::{DoubleBuffer, NodePosition};
pub use tree::{NodeIndex, SpatialNode, SpatialTree};

/// Result type for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;
