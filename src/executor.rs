//! The per-thread compute loop.
//!
//! Compute threads draw partition ids from a shared queue. Each pass takes
//! the partition's coarse lock, walks its vertices under the configured
//! message-visibility and serialisability policy, and records statistics.
//! The partition is released on every exit path (the mutex guard drops
//! even when a vertex computation fails).

use crate::cache::RequestProcessor;
use crate::computation::{Computation, ComputeContext};
use crate::config::{EngineConfig, SerializabilityMode};
use crate::error::{EngineError, Result};
use crate::graph::{OwnerMap, PartitionStore, VertexChangeLog};
use crate::id::{PartitionId, VertexId};
use crate::philosophers::PhilosophersTable;
use crate::server_data::ServerData;
use crate::stats::{PartitionStats, WorkerCounters};
use crate::store::Messages;
use crate::tokens::{GlobalTokenRing, PartitionTokenRing};
use crate::transport::Transport;
use crate::vertex_type::{VertexType, VertexTypeStore};
use crossbeam_channel::Receiver;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Everything the compute threads share for one superstep.
pub(crate) struct ExecutorShared<C: Computation> {
    pub task_id: crate::id::TaskId,
    pub config: EngineConfig,
    pub computation: Arc<C>,
    pub owner_map: Arc<OwnerMap<C::Id>>,
    pub partitions: Arc<PartitionStore<C::Id, C::Value, C::Edge>>,
    pub server_data: Arc<ServerData<C::Id, C::Message>>,
    pub vertex_types: Arc<VertexTypeStore<C::Id>>,
    pub vertex_philosophers: Option<Arc<PhilosophersTable>>,
    pub partition_philosophers: Option<Arc<PhilosophersTable>>,
    pub global_token: Arc<GlobalTokenRing>,
    pub partition_token: Arc<PartitionTokenRing>,
    pub transport: Arc<dyn Transport>,
    pub counters: Arc<WorkerCounters>,
    pub changes: Arc<VertexChangeLog<C::Id>>,
}

/// Which stores feed a vertex's compute invocation.
#[derive(Clone, Copy, PartialEq, Eq)]
enum MessageScope {
    All,
    LocalOnly,
}

pub(crate) struct PartitionExecutor<C: Computation> {
    shared: Arc<ExecutorShared<C>>,
    queue: Receiver<PartitionId>,
    processor: RequestProcessor<C::Id, C::Message>,
    superstep: u64,
    phase: u32,
}

impl<C: Computation> PartitionExecutor<C> {
    pub fn new(
        shared: Arc<ExecutorShared<C>>,
        queue: Receiver<PartitionId>,
        superstep: u64,
        phase: u32,
    ) -> Self {
        let processor = RequestProcessor::new(
            &shared.config,
            shared.task_id,
            Arc::clone(&shared.owner_map),
            Arc::clone(&shared.server_data),
            Arc::clone(&shared.transport),
            Arc::clone(&shared.counters),
        );
        Self {
            shared,
            queue,
            processor,
            superstep,
            phase,
        }
    }

    /// Drain the partition queue, then flush the remaining cache contents.
    pub fn run(mut self) -> Result<PartitionStats> {
        let mut totals = PartitionStats::default();
        while let Ok(pid) = self.queue.recv() {
            let stats = self.process_partition(pid)?;
            totals.merge(&stats);
        }
        self.processor.flush()?;
        Ok(totals)
    }

    fn process_partition(&mut self, pid: PartitionId) -> Result<PartitionStats> {
        let shared = Arc::clone(&self.shared);
        let handle = shared
            .partitions
            .get(pid)
            .ok_or_else(|| EngineError::StoreIo(format!("partition {pid} missing from store")))?;
        let mut partition = handle.lock();
        trace!("superstep {}: processing partition {pid}", self.superstep);

        let mut stats = PartitionStats {
            partition_id: pid,
            ..Default::default()
        };

        let partition_locking =
            shared.config.serializability == SerializabilityMode::PartitionLock;
        let mut holding_partition_forks = false;
        if partition_locking && self.superstep > 0 {
            if partition.all_halted() && shared.server_data.partition_is_quiet(pid) {
                // Nothing to do and nobody to coordinate with.
                stats.vertices = partition.len() as u64;
                stats.finished = stats.vertices;
                stats.edges = partition.vertices().map(|v| v.num_edges() as u64).sum();
                return Ok(stats);
            }
            if let Some(table) = &shared.partition_philosophers {
                table.acquire_forks(u64::from(pid))?;
                holding_partition_forks = true;
            }
        }

        let result = self.run_vertices(&shared, &mut partition, pid, &mut stats);

        if holding_partition_forks {
            // Forks must not race ahead of the messages sent while eating.
            self.processor.flush()?;
            if let Some(table) = &shared.partition_philosophers {
                table.release_forks(u64::from(pid))?;
            }
        }
        result?;

        if !shared.config.is_async() {
            // BSP consumed exactly what the prior superstep produced.
            shared.server_data.current_store()?.clear_partition(pid);
        }
        Ok(stats)
    }

    fn run_vertices(
        &mut self,
        shared: &ExecutorShared<C>,
        partition: &mut crate::graph::Partition<C::Id, C::Value, C::Edge>,
        pid: PartitionId,
        stats: &mut PartitionStats,
    ) -> Result<()> {
        let mode = shared.config.serializability;
        let ids = partition.vertex_ids();
        for vid in ids {
            let Some(vertex) = partition.get_mut(&vid) else {
                continue;
            };
            stats.vertices += 1;
            stats.edges += vertex.num_edges() as u64;

            let computed = match mode {
                SerializabilityMode::None | SerializabilityMode::PartitionLock => {
                    self.compute_vertex(shared, vertex, pid, MessageScope::All)?
                }
                SerializabilityMode::Token => {
                    let vertex_type = shared.vertex_types.vertex_type(&vid);
                    let allowed = match vertex_type {
                        VertexType::Internal => None, // always runs, local messages only
                        VertexType::LocalBoundary => Some(shared.partition_token.holds(pid)),
                        VertexType::RemoteBoundary => Some(shared.global_token.holding()),
                        VertexType::MixedBoundary => Some(
                            shared.partition_token.holds(pid) && shared.global_token.holding(),
                        ),
                    };
                    match allowed {
                        None => self.compute_vertex(shared, vertex, pid, MessageScope::LocalOnly)?,
                        Some(true) => {
                            self.compute_vertex(shared, vertex, pid, MessageScope::All)?
                        }
                        Some(false) => {
                            // Wake-up only, so the termination check does
                            // not lose a vertex with pending messages.
                            if vertex.is_halted()
                                && has_wake_messages(shared, vertex_type, pid, &vid)?
                            {
                                vertex.wake();
                            }
                            shared
                                .counters
                                .boundary_vertices_skipped
                                .fetch_add(1, Ordering::Relaxed);
                            false
                        }
                    }
                }
                SerializabilityMode::VertexLock => {
                    let ordinal = lock_ordinal(&vid)?;
                    let table = shared.vertex_philosophers.as_ref().ok_or_else(|| {
                        EngineError::UnsupportedConfig(
                            "vertex-lock discipline without a philosophers table".into(),
                        )
                    })?;
                    if table.is_philosopher(ordinal) {
                        table.acquire_forks(ordinal)?;
                        let computed =
                            self.compute_vertex(shared, vertex, pid, MessageScope::All);
                        // Flush before releasing so forks cannot overtake
                        // the messages sent under them.
                        let flushed = self.processor.flush();
                        table.release_forks(ordinal)?;
                        flushed?;
                        computed?
                    } else {
                        self.compute_vertex(shared, vertex, pid, MessageScope::All)?
                    }
                }
            };
            if computed {
                stats.computed += 1;
            }
            if vertex.is_halted() {
                stats.finished += 1;
            }
        }
        Ok(())
    }

    /// Gather messages, apply halt/wake rules, and invoke user compute.
    /// Returns whether compute ran.
    fn compute_vertex(
        &mut self,
        shared: &ExecutorShared<C>,
        vertex: &mut crate::graph::Vertex<C::Id, C::Value, C::Edge>,
        pid: PartitionId,
        scope: MessageScope,
    ) -> Result<bool> {
        let vid = vertex.id().clone();
        let messages = self.gather_messages(shared, pid, &vid, scope)?;

        if self.superstep >= shared.config.max_supersteps {
            vertex.vote_to_halt();
            return Ok(false);
        }
        if !messages.is_empty() && vertex.is_halted() {
            vertex.wake();
        }
        if vertex.is_halted() {
            return Ok(false);
        }
        let mut ctx = ComputeContext::<C>::new(
            &mut self.processor,
            &shared.changes,
            shared.config.allow_graph_mutation,
            self.superstep,
            self.phase,
            vid,
        );
        shared.computation.compute(&mut ctx, vertex, messages)?;
        Ok(true)
    }

    fn gather_messages(
        &self,
        shared: &ExecutorShared<C>,
        pid: PartitionId,
        vid: &C::Id,
        scope: MessageScope,
    ) -> Result<Messages<C::Message>> {
        let conf = &shared.config;
        // Algorithms commonly send without expecting to receive in the
        // first asynchronous step.
        if conf.is_async() && self.superstep == 0 {
            return Ok(Messages::empty());
        }
        let need_all = conf.async_conf.need_all_msgs;
        if !conf.is_async() {
            let current = shared.server_data.current_store()?;
            return if need_all {
                current.read_vertex_messages(pid, vid)
            } else {
                current.remove_vertex_messages(pid, vid)
            };
        }
        let local = shared.server_data.local_store()?;
        let local_msgs = if need_all {
            local.read_vertex_messages(pid, vid)?
        } else {
            local.remove_vertex_messages(pid, vid)?
        };
        if scope == MessageScope::LocalOnly {
            return Ok(local_msgs);
        }
        let remote = shared.server_data.remote_store()?;
        let remote_msgs = if need_all {
            remote.read_vertex_messages(pid, vid)?
        } else {
            remote.remove_vertex_messages(pid, vid)?
        };
        Ok(remote_msgs.chain(local_msgs))
    }
}

/// Pending messages that could wake a skipped boundary vertex, checked in
/// whichever stores its boundary edges can deliver to: a local-boundary
/// vertex is fed by co-located senders only, a remote-boundary vertex's
/// boundary traffic arrives in the remote store, and a mixed-boundary
/// vertex can be woken from either side.
fn has_wake_messages<C: Computation>(
    shared: &ExecutorShared<C>,
    vertex_type: VertexType,
    pid: PartitionId,
    vid: &C::Id,
) -> Result<bool> {
    let server_data = &shared.server_data;
    Ok(match vertex_type {
        VertexType::Internal => false,
        VertexType::LocalBoundary => server_data
            .local_store()?
            .has_messages_for_vertex(pid, vid),
        VertexType::RemoteBoundary => server_data
            .remote_store()?
            .has_messages_for_vertex(pid, vid),
        VertexType::MixedBoundary => {
            server_data.local_store()?.has_messages_for_vertex(pid, vid)
                || server_data
                    .remote_store()?
                    .has_messages_for_vertex(pid, vid)
        }
    })
}

pub(crate) fn lock_ordinal<I: VertexId>(id: &I) -> Result<u64> {
    id.lock_ordinal().ok_or_else(|| {
        EngineError::UnsupportedConfig(
            "lock serialisability requires fixed-width integer vertex ids".into(),
        )
    })
}
