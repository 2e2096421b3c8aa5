//! Hygienic dining philosophers over the boundary graph.
//!
//! Neighbouring boundary vertices (or partitions) may execute concurrently
//! only while no two of them eat at once on a shared edge. Each philosopher
//! keeps three flags per neighbour (have-token, have-fork, is-dirty) and
//! must hold a clean fork with every neighbour before eating.
//!
//! Initialisation places, for every edge (p, q), the fork dirty at the
//! larger ordinal and the token at the smaller one; the resulting
//! precedence graph is acyclic, which with dirtying-on-release gives
//! deadlock freedom. Starvation freedom follows because a holder
//! surrenders a dirty fork on request.
//!
//! One table instance serves one granularity: vertex ordinals under the
//! vertex-lock discipline, partition ids under the partition-lock
//! discipline. Remote hand-offs travel as `SendToken`/`SendFork` requests;
//! co-located hand-offs invoke the arrival handler directly.

use crate::error::{EngineError, Result};
use crate::id::TaskId;
use crate::stats::WorkerCounters;
use crate::transport::Transport;
use crate::wire::WorkerRequest;
use dashmap::DashMap;
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const HAVE_TOKEN: u8 = 1;
const HAVE_FORK: u8 = 1 << 1;
const IS_DIRTY: u8 = 1 << 2;

#[derive(Clone, Copy, Debug)]
struct NeighbourEntry {
    bits: u8,
    task: TaskId,
}

struct PhilosopherCell {
    state: Mutex<HashMap<u64, NeighbourEntry>>,
    forks_ready: Condvar,
}

enum Handoff {
    Token { from: u64, to: u64, task: TaskId },
    Fork { from: u64, to: u64, task: TaskId },
}

pub struct PhilosophersTable {
    my_task: TaskId,
    transport: Arc<dyn Transport>,
    counters: Arc<WorkerCounters>,
    philosophers: DashMap<u64, Arc<PhilosopherCell>>,
}

impl PhilosophersTable {
    pub fn new(
        my_task: TaskId,
        transport: Arc<dyn Transport>,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        Self {
            my_task,
            transport,
            counters,
            philosophers: DashMap::new(),
        }
    }

    pub fn add_philosopher(&self, p: u64) {
        self.philosophers.entry(p).or_insert_with(|| {
            Arc::new(PhilosopherCell {
                state: Mutex::new(HashMap::new()),
                forks_ready: Condvar::new(),
            })
        });
    }

    /// Record the edge (p, q) from p's side. Fork placement: dirty at the
    /// larger ordinal, token at the smaller. Self-loops are skipped.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateNeighbour`] when q was already registered
    /// for p: a multigraph or a corrupt partitioning.
    pub fn add_neighbour(&self, p: u64, q: u64, q_task: TaskId) -> Result<()> {
        if p == q {
            return Ok(());
        }
        self.add_philosopher(p);
        let cell = self.cell(p)?;
        let mut state = cell.state.lock();
        if state.contains_key(&q) {
            return Err(EngineError::DuplicateNeighbour {
                philosopher: p,
                neighbour: q,
            });
        }
        let bits = if p > q { HAVE_FORK | IS_DIRTY } else { HAVE_TOKEN };
        state.insert(q, NeighbourEntry { bits, task: q_task });
        Ok(())
    }

    pub fn is_philosopher(&self, p: u64) -> bool {
        self.philosophers.contains_key(&p)
    }

    pub fn len(&self) -> usize {
        self.philosophers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.philosophers.is_empty()
    }

    fn cell(&self, p: u64) -> Result<Arc<PhilosopherCell>> {
        self.philosophers
            .get(&p)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| EngineError::WireFormat(format!("unknown philosopher {p}")))
    }

    /// Block until `p` holds a clean fork with every neighbour.
    ///
    /// A no-op for ids with no philosopher entry (non-boundary callers).
    pub fn acquire_forks(&self, p: u64) -> Result<()> {
        let Some(cell) = self.philosophers.get(&p).map(|c| Arc::clone(&c)) else {
            return Ok(());
        };
        let mut handoffs = Vec::new();
        let mut remote_request = false;
        {
            let mut state = cell.state.lock();
            for (&q, entry) in state.iter_mut() {
                if entry.bits & HAVE_FORK == 0 {
                    // Missing fork: spend the token to request it.
                    if entry.bits & HAVE_TOKEN != 0 {
                        entry.bits &= !HAVE_TOKEN;
                        remote_request |= entry.task != self.my_task;
                        handoffs.push(Handoff::Token {
                            from: p,
                            to: q,
                            task: entry.task,
                        });
                    }
                } else if entry.bits & IS_DIRTY != 0 {
                    // Our own fork; clean it in place before eating.
                    entry.bits &= !IS_DIRTY;
                }
            }
        }
        self.dispatch(handoffs)?;
        if remote_request {
            self.transport.wait_all_requests()?;
        }

        let mut state = cell.state.lock();
        while !state.values().all(|e| e.bits & HAVE_FORK != 0) {
            cell.forks_ready.wait(&mut state);
        }
        trace!("philosopher {p}: all forks held");
        Ok(())
    }

    /// Hand requested forks over (clean) and dirty the rest in place.
    pub fn release_forks(&self, p: u64) -> Result<()> {
        let Some(cell) = self.philosophers.get(&p).map(|c| Arc::clone(&c)) else {
            return Ok(());
        };
        let mut handoffs = Vec::new();
        {
            let mut state = cell.state.lock();
            for (&q, entry) in state.iter_mut() {
                if entry.bits & HAVE_TOKEN != 0 {
                    entry.bits &= !(HAVE_FORK | IS_DIRTY);
                    handoffs.push(Handoff::Fork {
                        from: p,
                        to: q,
                        task: entry.task,
                    });
                } else {
                    entry.bits |= IS_DIRTY;
                }
            }
        }
        self.dispatch(handoffs)
    }

    /// Arrival of q's token at p: q wants p's fork. Hand it over at once if
    /// it is dirty; a clean fork means p is hungry or eating, so the
    /// hand-off waits for p's release.
    pub fn receive_token(&self, from: u64, to: u64) -> Result<()> {
        let cell = self.cell(to)?;
        let mut handoffs = Vec::new();
        {
            let mut state = cell.state.lock();
            let entry = state.get_mut(&from).ok_or_else(|| {
                EngineError::WireFormat(format!("philosopher {to} has no neighbour {from}"))
            })?;
            entry.bits |= HAVE_TOKEN;
            if entry.bits & HAVE_FORK != 0 && entry.bits & IS_DIRTY != 0 {
                entry.bits &= !(HAVE_FORK | IS_DIRTY);
                handoffs.push(Handoff::Fork {
                    from: to,
                    to: from,
                    task: entry.task,
                });
            }
        }
        self.dispatch(handoffs)
    }

    /// Arrival of a (clean) fork for the edge (from, to).
    pub fn receive_fork(&self, from: u64, to: u64) -> Result<()> {
        let cell = self.cell(to)?;
        let mut state = cell.state.lock();
        let entry = state.get_mut(&from).ok_or_else(|| {
            EngineError::WireFormat(format!("philosopher {to} has no neighbour {from}"))
        })?;
        entry.bits |= HAVE_FORK;
        entry.bits &= !IS_DIRTY;
        cell.forks_ready.notify_all();
        Ok(())
    }

    /// Perform hand-offs collected under a cell lock. Remote ones go over
    /// the wire; co-located ones invoke the arrival handler directly.
    fn dispatch(&self, handoffs: Vec<Handoff>) -> Result<()> {
        for h in handoffs {
            match h {
                Handoff::Token { from, to, task } => {
                    self.counters.tokens_passed.fetch_add(1, Ordering::Relaxed);
                    trace!("philosopher {from}: token to {to} (task {task})");
                    if task == self.my_task {
                        self.receive_token(from, to)?;
                    } else {
                        self.transport
                            .send_request(task, WorkerRequest::SendToken { from, to })?;
                    }
                }
                Handoff::Fork { from, to, task } => {
                    self.counters.forks_passed.fetch_add(1, Ordering::Relaxed);
                    trace!("philosopher {from}: fork to {to} (task {task})");
                    if task == self.my_task {
                        self.receive_fork(from, to)?;
                    } else {
                        self.transport
                            .send_request(task, WorkerRequest::SendFork { from, to })?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Every edge's fork-bit sum across both endpoints must be exactly one.
    /// Debug aid for tests over co-located tables.
    pub fn fork_bits(&self, p: u64) -> Vec<(u64, bool, bool, bool)> {
        let Some(cell) = self.philosophers.get(&p).map(|c| Arc::clone(&c)) else {
            return Vec::new();
        };
        let state = cell.state.lock();
        let mut out: Vec<_> = state
            .iter()
            .map(|(&q, e)| {
                (
                    q,
                    e.bits & HAVE_TOKEN != 0,
                    e.bits & HAVE_FORK != 0,
                    e.bits & IS_DIRTY != 0,
                )
            })
            .collect();
        out.sort_unstable_by_key(|&(q, ..)| q);
        out
    }
}
