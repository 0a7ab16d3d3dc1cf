//! Fixed pool of sequential background workers.
//!
//! Every worker owns a private FIFO. The simulation thread pushes a phase's
//! tasks across the workers and then waits for each queue to clear before it
//! pushes the next phase, which makes `wait_all` the phase barrier.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{LayoutError, Result};

/// Unit of work run by a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    /// A task has been popped and is still running.
    busy: bool,
    shutdown: bool,
}

impl Queue {
    fn is_clear(&self) -> bool {
        self.tasks.is_empty() && !self.busy
    }
}

#[derive(Default)]
struct Slot {
    queue: Mutex<Queue>,
    /// Signalled when work arrives or shutdown is requested.
    work: Condvar,
    /// Signalled when the queue drains.
    clear: Condvar,
}

struct Worker {
    slot: Arc<Slot>,
    handle: Option<JoinHandle<()>>,
}

/// Pool of named worker threads with per-worker task queues.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawn `count` workers named `quadlayout-worker-{i}`.
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(LayoutError::InvalidWorkerCount(count));
        }

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let slot = Arc::new(Slot::default());
            let thread_slot = Arc::clone(&slot);
            let handle = thread::Builder::new()
                .name(format!("quadlayout-worker-{index}"))
                .spawn(move || worker_loop(index, &thread_slot))
                .map_err(LayoutError::ThreadSpawn)?;
            workers.push(Worker {
                slot,
                handle: Some(handle),
            });
        }
        debug!(workers = count, "worker_pool_started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Queue a task on one worker; indices wrap around the pool size.
    pub fn push(&self, worker: usize, task: Task) {
        let slot = &self.workers[worker % self.workers.len()].slot;
        slot.queue.lock().tasks.push_back(task);
        slot.work.notify_one();
    }

    /// Block until the worker's queue is empty and its last task returned.
    pub fn wait_until_clear(&self, worker: usize) {
        let slot = &self.workers[worker % self.workers.len()].slot;
        let mut queue = slot.queue.lock();
        while !queue.is_clear() {
            slot.clear.wait(&mut queue);
        }
    }

    /// Phase barrier: wait for every worker to clear.
    pub fn wait_all(&self) {
        for worker in 0..self.workers.len() {
            self.wait_until_clear(worker);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.slot.queue.lock().shutdown = true;
            worker.slot.work.notify_all();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!("worker_join_failed");
                }
            }
        }
        debug!(workers = self.workers.len(), "worker_pool_stopped");
    }
}

fn worker_loop(index: usize, slot: &Slot) {
    loop {
        let task = {
            let mut queue = slot.queue.lock();
            loop {
                // Queued work is finished before shutdown is honoured.
                if let Some(task) = queue.tasks.pop_front() {
                    queue.busy = true;
                    break task;
                }
                if queue.shutdown {
                    return;
                }
                slot.work.wait(&mut queue);
            }
        };

        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(worker = index, "worker_task_panicked");
        }

        let mut queue = slot.queue.lock();
        queue.busy = false;
        if queue.tasks.is_empty() {
            slot.clear.notify_all();
        }
    }
}
