//! The threaded layout engine.
//!
//! A dedicated simulation thread owns the stepping loop. Callers talk to it
//! through a bounded command channel, a handful of atomics and two
//! double-buffered snapshots; they never touch the tree or body state while
//! a step runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::body::{NodeDefinition, NodeId};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::forces::Technique;
use crate::geometry::{Rect, Vec2};
use crate::simulation::{LayoutStats, Simulation, StepReport};
use crate::snapshot::{DoubleBuffer, NodePosition};
use crate::{LayoutError, Result};

/// Completed-step counter callers can block on.
#[derive(Default)]
struct StepClock {
    steps: Mutex<u64>,
    advanced: Condvar,
}

impl StepClock {
    fn advance(&self) {
        *self.steps.lock() += 1;
        self.advanced.notify_all();
    }

    fn wait_for(&self, count: u64) {
        let mut steps = self.steps.lock();
        let target = *steps + count;
        while *steps < target {
            self.advanced.wait(&mut steps);
        }
    }
}

/// State read and written by both callers and the simulation thread.
struct Shared {
    technique: AtomicU8,
    active: AtomicBool,
    shutdown: AtomicBool,
    viewport: Mutex<Rect>,
    visible: DoubleBuffer<NodePosition>,
    intersecting: DoubleBuffer<NodePosition>,
    stats: Mutex<LayoutStats>,
    clock: StepClock,
}

impl Shared {
    fn new(simulation: &Simulation) -> Self {
        Self {
            technique: AtomicU8::new(simulation.technique().to_u8()),
            active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            viewport: Mutex::new(simulation.viewport()),
            visible: DoubleBuffer::new(),
            intersecting: DoubleBuffer::new(),
            stats: Mutex::new(simulation.stats()),
            clock: StepClock::default(),
        }
    }

    fn technique(&self) -> Technique {
        Technique::from_u8(self.technique.load(Ordering::Acquire))
    }
}

/// Loop settings copied out of the config.
#[derive(Debug, Clone, Copy)]
struct Timing {
    tick: Duration,
    fixed_dt: Option<f32>,
    max_step_dt: f32,
}

/// Force-directed layout running on its own thread.
///
/// Mutations are fire-and-forget and take effect on a later step; use
/// [`wait_for_steps`](Self::wait_for_steps) to observe them. The layout
/// starts deactivated.
pub struct LayoutEngine {
    config: EngineConfig,
    world: Rect,
    shared: Arc<Shared>,
    simulation: Arc<Mutex<Simulation>>,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl LayoutEngine {
    /// Validate `config`, start the worker pool and the simulation thread.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let simulation = Simulation::new(config.clone())?;
        let world = simulation.world_rect();

        let shared = Arc::new(Shared::new(&simulation));
        let simulation = Arc::new(Mutex::new(simulation));
        let (commands, queue) = crossbeam_channel::bounded(config.command_capacity);
        let timing = Timing {
            tick: Duration::from_millis(config.tick_interval_ms),
            fixed_dt: config.fixed_dt,
            max_step_dt: config.max_step_dt,
        };

        let thread = {
            let shared = Arc::clone(&shared);
            let simulation = Arc::clone(&simulation);
            thread::Builder::new()
                .name("quadlayout-sim".to_string())
                .spawn(move || {
                    simulation_loop(
                        &shared,
                        &simulation,
                        &queue,
                        timing,
                        Simulation::step::<Vec<Command>>,
                    )
                })
                .map_err(LayoutError::ThreadSpawn)?
        };

        info!(
            workers = config.worker_count,
            max_depth = config.max_depth,
            world_extent = config.world_extent,
            "layout_engine_started"
        );
        Ok(Self {
            config,
            world,
            shared,
            simulation,
            commands,
            thread: Some(thread),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The bounded square bodies live in.
    pub fn world(&self) -> Rect {
        self.world
    }

    /// Replace all bodies and edges. Waits for any in-flight step to finish.
    pub fn load(&self, definitions: &[NodeDefinition], force_random: bool) {
        let mut simulation = self.simulation.lock();
        simulation.load(definitions, force_random);
        self.shared.visible.publish(simulation.visible_nodes());
        self.shared.intersecting.publish(Vec::new());
        *self.shared.stats.lock() = simulation.stats();
    }

    /// Current definitions of every body. Waits for any in-flight step.
    pub fn save(&self) -> Vec<NodeDefinition> {
        self.simulation.lock().save()
    }

    pub fn activate_layout(&self) {
        if !self.shared.active.swap(true, Ordering::AcqRel) {
            info!("layout_activated");
        }
    }

    pub fn deactivate_layout(&self) {
        if self.shared.active.swap(false, Ordering::AcqRel) {
            info!("layout_deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Queue a new body. Ignored if `id` already exists.
    pub fn add_node(&self, id: NodeId, x: f32, y: f32, hit_radius: f32) {
        self.send(Command::Add {
            id,
            position: Vec2::new(x, y),
            hit_radius,
        });
    }

    /// Queue removal of a body and its edges. Ignored if unknown.
    pub fn delete_node(&self, id: NodeId) {
        self.send(Command::Delete { id });
    }

    /// Queue a translation of a body. Ignored if unknown.
    pub fn move_node(&self, id: NodeId, dx: f32, dy: f32) {
        self.send(Command::Move {
            id,
            delta: Vec2::new(dx, dy),
        });
    }

    pub fn connect_nodes(&self, a: NodeId, b: NodeId) {
        self.send(Command::Connect { a, b });
    }

    pub fn disconnect_nodes(&self, a: NodeId, b: NodeId) {
        self.send(Command::Disconnect { a, b });
    }

    /// Queue removal of everything.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Queue a point query; the answer shows up in
    /// [`intersecting_nodes`](Self::intersecting_nodes).
    ///
    /// Only bodies docked in the leaf cell containing the point are tested, so
    /// a body whose hit radius reaches across a cell edge is missed from the
    /// far side of that edge.
    pub fn intersect_nodes(&self, x: f32, y: f32) {
        self.send(Command::Intersect {
            point: Vec2::new(x, y),
        });
    }

    /// Bodies near the viewport as of the last published step.
    pub fn visible_nodes(&self) -> Arc<[NodePosition]> {
        self.shared.visible.read()
    }

    /// Answer to the most recently serviced point query; empty after a load or
    /// reset until the next query.
    pub fn intersecting_nodes(&self) -> Arc<[NodePosition]> {
        self.shared.intersecting.read()
    }

    /// Applies from the next step on.
    pub fn set_technique(&self, technique: Technique) {
        self.shared
            .technique
            .store(technique.to_u8(), Ordering::Release);
    }

    pub fn technique(&self) -> Technique {
        self.shared.technique()
    }

    pub fn set_viewport(&self, viewport: Rect) {
        *self.shared.viewport.lock() = viewport;
    }

    pub fn viewport(&self) -> Rect {
        *self.shared.viewport.lock()
    }

    pub fn stats(&self) -> LayoutStats {
        *self.shared.stats.lock()
    }

    /// Run the membership and aggregate checks between steps.
    pub fn check_invariants(&self) -> Result<()> {
        self.simulation.lock().check_invariants()
    }

    /// Block until `count` more steps have completed.
    pub fn wait_for_steps(&self, count: u64) {
        self.shared.clock.wait_for(count);
    }

    fn send(&self, command: Command) {
        // Blocks while the channel is full.
        if self.commands.send(command).is_err() {
            warn!("command_channel_closed");
        }
    }
}

impl Drop for LayoutEngine {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("simulation_thread_join_failed");
            }
        }
        // Workers are joined when the last simulation handle drops below.
        info!("layout_engine_stopped");
    }
}

fn simulation_loop<F>(
    shared: &Shared,
    simulation: &Mutex<Simulation>,
    queue: &Receiver<Command>,
    timing: Timing,
    mut step: F,
) where
    F: FnMut(&mut Simulation, Vec<Command>, f32) -> StepReport,
{
    debug!("simulation_thread_started");
    let mut last = Instant::now();

    while !shared.shutdown.load(Ordering::Acquire) {
        let deadline = Instant::now() + timing.tick;
        let mut batch = Vec::new();
        let mut disconnected = false;
        loop {
            match queue.recv_deadline(deadline) {
                Ok(command) => batch.push(command),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let now = Instant::now();
        let elapsed = timing.fixed_dt.unwrap_or_else(|| {
            now.duration_since(last)
                .as_secs_f32()
                .min(timing.max_step_dt)
        });
        last = now;

        let mut sim = simulation.lock();
        sim.set_technique(shared.technique());
        sim.set_active(shared.active.load(Ordering::Acquire));
        sim.set_viewport(*shared.viewport.lock());

        let outcome = catch_unwind(AssertUnwindSafe(|| step(&mut *sim, batch, elapsed)));
        let stats = sim.stats();
        drop(sim);

        match outcome {
            Ok(report) => {
                shared.visible.publish(report.visible);
                if let Some(hits) = report.intersections {
                    shared.intersecting.publish(hits);
                }
            }
            Err(_) => error!(step = stats.step, "layout_step_panicked"),
        }
        *shared.stats.lock() = stats;
        shared.clock.advance();

        if disconnected {
            break;
        }
    }
    debug!("simulation_thread_stopped");
}
