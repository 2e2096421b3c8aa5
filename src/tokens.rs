//! Global and partition tokens for coarse serialisability.
//!
//! A token is a transferable right held by at most one holder at a time.
//! Both rings use ascending-id order with wrap-around, the lowest member
//! holding the token at job start; the hand-off happens only after compute
//! threads have quiesced and outgoing messages are flushed, so no fork
//! exchange is needed on this path.

use crate::id::{PartitionId, TaskId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// The per-job global token, circulated over the worker ring.
pub struct GlobalTokenRing {
    my_task: TaskId,
    ring: Vec<TaskId>,
    holding: AtomicBool,
}

impl GlobalTokenRing {
    /// `tasks` is every task in the job, in any order.
    pub fn new(mut tasks: Vec<TaskId>, my_task: TaskId) -> Self {
        tasks.sort_unstable();
        tasks.dedup();
        let holding = tasks.first() == Some(&my_task);
        Self {
            my_task,
            ring: tasks,
            holding: AtomicBool::new(holding),
        }
    }

    pub fn holding(&self) -> bool {
        self.holding.load(Ordering::Acquire)
    }

    /// The task after this one in ring order.
    pub fn next_holder(&self) -> TaskId {
        if self.ring.is_empty() {
            return self.my_task;
        }
        let pos = self.ring.iter().position(|&t| t == self.my_task).unwrap_or(0);
        self.ring[(pos + 1) % self.ring.len()]
    }

    /// Give up the token for hand-off. Returns the receiving task, or
    /// `None` when this worker was not holding it.
    pub fn begin_handoff(&self) -> Option<TaskId> {
        if self.holding.swap(false, Ordering::AcqRel) {
            Some(self.next_holder())
        } else {
            None
        }
    }

    pub fn receive(&self) {
        self.holding.store(true, Ordering::Release);
    }
}

/// The worker-local partition token, circulated over this worker's
/// partitions.
pub struct PartitionTokenRing {
    ring: Vec<PartitionId>,
    holder: Mutex<Option<PartitionId>>,
}

impl PartitionTokenRing {
    pub fn new(mut partitions: Vec<PartitionId>) -> Self {
        partitions.sort_unstable();
        partitions.dedup();
        let holder = partitions.first().copied();
        Self {
            ring: partitions,
            holder: Mutex::new(holder),
        }
    }

    pub fn holds(&self, pid: PartitionId) -> bool {
        *self.holder.lock() == Some(pid)
    }

    pub fn holder(&self) -> Option<PartitionId> {
        *self.holder.lock()
    }

    /// Move the token to the next partition in ring order. Returns the
    /// (from, to) pair, or `None` for an empty ring.
    pub fn advance(&self) -> Option<(PartitionId, PartitionId)> {
        let mut holder = self.holder.lock();
        let from = (*holder)?;
        let pos = self.ring.iter().position(|&p| p == from)?;
        let to = self.ring[(pos + 1) % self.ring.len()];
        *holder = Some(to);
        Some((from, to))
    }

    /// Arrival handler for a wire-delivered partition token.
    pub fn receive(&self, pid: PartitionId) {
        *self.holder.lock() = Some(pid);
    }
}
