//! Execution counters and per-pass statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Worker-lifetime counters, shared across compute and delivery threads.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub messages_sent: AtomicU64,
    pub message_bytes_sent: AtomicU64,
    pub local_messages_sent: AtomicU64,
    pub tokens_passed: AtomicU64,
    pub forks_passed: AtomicU64,
    pub boundary_vertices_skipped: AtomicU64,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            message_bytes_sent: self.message_bytes_sent.load(Ordering::Relaxed),
            local_messages_sent: self.local_messages_sent.load(Ordering::Relaxed),
            tokens_passed: self.tokens_passed.load(Ordering::Relaxed),
            forks_passed: self.forks_passed.load(Ordering::Relaxed),
            boundary_vertices_skipped: self.boundary_vertices_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub messages_sent: u64,
    pub message_bytes_sent: u64,
    pub local_messages_sent: u64,
    pub tokens_passed: u64,
    pub forks_passed: u64,
    pub boundary_vertices_skipped: u64,
}

impl CounterSnapshot {
    /// Counter movement between two snapshots (`self` earlier).
    pub fn delta(&self, later: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            messages_sent: later.messages_sent - self.messages_sent,
            message_bytes_sent: later.message_bytes_sent - self.message_bytes_sent,
            local_messages_sent: later.local_messages_sent - self.local_messages_sent,
            tokens_passed: later.tokens_passed - self.tokens_passed,
            forks_passed: later.forks_passed - self.forks_passed,
            boundary_vertices_skipped: later.boundary_vertices_skipped
                - self.boundary_vertices_skipped,
        }
    }
}

/// Statistics for one partition pass.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition_id: u32,
    pub vertices: u64,
    pub finished: u64,
    pub edges: u64,
    pub computed: u64,
}

impl PartitionStats {
    pub fn merge(&mut self, other: &PartitionStats) {
        self.vertices += other.vertices;
        self.finished += other.finished;
        self.edges += other.edges;
        self.computed += other.computed;
    }
}

/// What a worker reports to its coordinator after each superstep.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SuperstepStats {
    pub superstep: u64,
    pub vertices: u64,
    pub finished: u64,
    pub edges: u64,
    pub computed: u64,
    /// Counter movement during this superstep only.
    pub sent: CounterSnapshot,
}

impl SuperstepStats {
    /// All owned vertices voted to halt.
    pub fn all_halted(&self) -> bool {
        self.finished == self.vertices
    }
}
