//! Double-buffered read snapshots published by the simulation thread.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::body::NodeId;
use crate::geometry::Vec2;

/// A body id and its position at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: NodeId,
    pub position: Vec2,
}

struct Slots<T> {
    buffers: [Arc<[T]>; 2],
    active: usize,
}

/// Two snapshot slots plus an active index behind one small lock.
///
/// The writer builds its data outside the lock, stores it in the inactive slot
/// and flips the index. Readers clone the active `Arc` and drop the lock before
/// iterating, so neither side waits on the other's work.
pub struct DoubleBuffer<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> DoubleBuffer<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                buffers: [Arc::from(Vec::new()), Arc::from(Vec::new())],
                active: 0,
            }),
        }
    }

    /// Swap `data` in as the current snapshot.
    pub fn publish(&self, data: Vec<T>) {
        let data: Arc<[T]> = Arc::from(data);
        let retired = {
            let mut slots = self.slots.lock();
            let inactive = 1 - slots.active;
            let retired = std::mem::replace(&mut slots.buffers[inactive], data);
            slots.active = inactive;
            retired
        };
        // Freed outside the lock.
        drop(retired);
    }

    /// The most recently published snapshot.
    pub fn read(&self) -> Arc<[T]> {
        let slots = self.slots.lock();
        Arc::clone(&slots.buffers[slots.active])
    }
}

impl<T> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
