//! Worker-side orchestration.
//!
//! A [`Worker`] owns its partitions, the inbound stores, the lock tables
//! and the token state, and drives one superstep at a time: rotate stores
//! (BSP), apply vertex resolution, run the compute threads over the
//! partition queue, drain the transport, and hand tokens on. The receive
//! path ([`RequestHandler`]) routes arriving requests into the matching
//! subsystem.
//!
//! Cluster membership, checkpointing and the master's termination decision
//! live outside this crate; the worker only reports per-superstep
//! statistics and answers pending-message queries.

use crate::computation::Computation;
use crate::config::{EngineConfig, SerializabilityMode};
use crate::error::{EngineError, Result};
use crate::executor::{ExecutorShared, PartitionExecutor, lock_ordinal};
use crate::graph::{
    OwnerMap, PartitionStore, Vertex, VertexChangeLog, VertexResolver, apply_resolution,
};
use crate::id::{PartitionId, TaskId, WorkerId};
use crate::philosophers::PhilosophersTable;
use crate::server_data::ServerData;
use crate::stats::{SuperstepStats, WorkerCounters};
use crate::store::MessageStore;
use crate::tokens::{GlobalTokenRing, PartitionTokenRing};
use crate::transport::{RequestHandler, Transport};
use crate::vertex_type::VertexTypeStore;
use crate::wire::{self, WorkerRequest};
use dashmap::DashMap;
use log::{debug, trace};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct Worker<C: Computation> {
    config: EngineConfig,
    worker_id: WorkerId,
    task_id: TaskId,
    computation: Arc<C>,
    resolver: Arc<dyn VertexResolver<C::Id, C::Value, C::Edge>>,
    owner_map: Arc<OwnerMap<C::Id>>,
    partitions: Arc<PartitionStore<C::Id, C::Value, C::Edge>>,
    server_data: Arc<ServerData<C::Id, C::Message>>,
    vertex_types: Arc<VertexTypeStore<C::Id>>,
    vertex_philosophers: Option<Arc<PhilosophersTable>>,
    partition_philosophers: Option<Arc<PhilosophersTable>>,
    global_token: Arc<GlobalTokenRing>,
    partition_token: Arc<PartitionTokenRing>,
    transport: Arc<dyn Transport>,
    counters: Arc<WorkerCounters>,
    changes: Arc<VertexChangeLog<C::Id>>,
    tombstones: DashMap<C::Id, ()>,
    superstep: AtomicU64,
    phase: AtomicU32,
}

impl<C: Computation> Worker<C> {
    /// Build a worker for `task_id`. Fails fast on an unsupported
    /// configuration.
    pub fn new(
        config: EngineConfig,
        worker_id: WorkerId,
        task_id: TaskId,
        owner_map: Arc<OwnerMap<C::Id>>,
        computation: Arc<C>,
        resolver: Arc<dyn VertexResolver<C::Id, C::Value, C::Edge>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate::<C::Id>()?;
        let counters = Arc::new(WorkerCounters::new());
        let server_data = Arc::new(ServerData::new(&config));
        let global_token = Arc::new(GlobalTokenRing::new(owner_map.all_tasks(), task_id));
        let partition_token = Arc::new(PartitionTokenRing::new(
            owner_map.partitions_of_task(task_id),
        ));
        let mk_table = || {
            Arc::new(PhilosophersTable::new(
                task_id,
                Arc::clone(&transport),
                Arc::clone(&counters),
            ))
        };
        let vertex_philosophers = (config.serializability == SerializabilityMode::VertexLock)
            .then(&mk_table);
        let partition_philosophers = (config.serializability
            == SerializabilityMode::PartitionLock)
            .then(&mk_table);
        Ok(Self {
            config,
            worker_id,
            task_id,
            computation,
            resolver,
            owner_map,
            partitions: Arc::new(PartitionStore::new()),
            server_data,
            vertex_types: Arc::new(VertexTypeStore::new(worker_id)),
            vertex_philosophers,
            partition_philosophers,
            global_token,
            partition_token,
            transport,
            counters,
            changes: Arc::new(VertexChangeLog::new()),
            tombstones: DashMap::new(),
            superstep: AtomicU64::new(0),
            phase: AtomicU32::new(0),
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Logical superstep user code will see on the next pass.
    pub fn superstep(&self) -> u64 {
        self.superstep.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> u32 {
        self.phase.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }

    /// Insert a vertex during graph load. The vertex must belong to one of
    /// this worker's partitions.
    pub fn add_vertex(&self, vertex: Vertex<C::Id, C::Value, C::Edge>) -> Result<()> {
        let owner = self.owner_map.owner_of(vertex.id())?;
        if owner.task_id != self.task_id {
            return Err(EngineError::UnsupportedConfig(format!(
                "vertex {:?} belongs to task {}, not {}",
                vertex.id(),
                owner.task_id,
                self.task_id
            )));
        }
        self.partitions
            .get_or_create(owner.partition_id)
            .lock()
            .insert(vertex);
        Ok(())
    }

    /// Finish graph load: materialise this worker's partitions, classify
    /// vertex types, and populate the lock tables the discipline needs.
    pub fn finish_loading(&self) -> Result<()> {
        for pid in self.owner_map.partitions_of_task(self.task_id) {
            self.partitions.get_or_create(pid);
        }
        match self.config.serializability {
            SerializabilityMode::None => {}
            SerializabilityMode::Token => {
                self.vertex_types.classify(&self.partitions, &self.owner_map)?;
                debug!(
                    "task {}: classified {} vertices",
                    self.task_id,
                    self.vertex_types.len()
                );
            }
            SerializabilityMode::VertexLock => self.populate_vertex_philosophers()?,
            SerializabilityMode::PartitionLock => self.populate_partition_philosophers()?,
        }
        Ok(())
    }

    fn populate_vertex_philosophers(&self) -> Result<()> {
        let table = self.vertex_philosophers.as_ref().ok_or_else(|| {
            EngineError::UnsupportedConfig("vertex philosophers table missing".into())
        })?;
        self.partitions
            .partition_ids()
            .par_iter()
            .try_for_each(|&pid| -> Result<()> {
                let Some(handle) = self.partitions.get(pid) else {
                    return Ok(());
                };
                let partition = handle.lock();
                for vertex in partition.vertices() {
                    let out_of_partition: Vec<_> = vertex
                        .edges()
                        .iter()
                        .filter(|e| e.target != *vertex.id())
                        .filter(|e| self.owner_map.partition_of(&e.target) != pid)
                        .collect();
                    if out_of_partition.is_empty() {
                        continue;
                    }
                    let p = lock_ordinal(vertex.id())?;
                    table.add_philosopher(p);
                    for edge in out_of_partition {
                        let owner = self.owner_map.owner_of(&edge.target)?;
                        table.add_neighbour(p, lock_ordinal(&edge.target)?, owner.task_id)?;
                    }
                }
                Ok(())
            })
    }

    fn populate_partition_philosophers(&self) -> Result<()> {
        let table = self.partition_philosophers.as_ref().ok_or_else(|| {
            EngineError::UnsupportedConfig("partition philosophers table missing".into())
        })?;
        self.partitions
            .partition_ids()
            .par_iter()
            .try_for_each(|&pid| -> Result<()> {
                let Some(handle) = self.partitions.get(pid) else {
                    return Ok(());
                };
                let partition = handle.lock();
                table.add_philosopher(u64::from(pid));
                let mut neighbours = HashSet::new();
                for vertex in partition.vertices() {
                    for edge in vertex.edges() {
                        let q = self.owner_map.partition_of(&edge.target);
                        if q != pid {
                            neighbours.insert(q);
                        }
                    }
                }
                for q in neighbours {
                    let owner = self.owner_map.owner_of_partition(q)?;
                    table.add_neighbour(u64::from(pid), u64::from(q), owner.task_id)?;
                }
                Ok(())
            })
    }

    /// Run one superstep over all owned partitions and report statistics.
    pub fn run_superstep(&self) -> Result<SuperstepStats> {
        let superstep = self.superstep.load(Ordering::Acquire);
        let phase = self.phase.load(Ordering::Acquire);
        debug!("task {}: superstep {superstep} (phase {phase})", self.task_id);
        let before = self.counters.snapshot();

        if !self.config.is_async() {
            self.server_data.rotate_bsp()?;
        }
        self.resolve_vertex_changes()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let my_partitions = self.owner_map.partitions_of_task(self.task_id);
        for &pid in &my_partitions {
            tx.send(pid)
                .map_err(|_| EngineError::Interrupted("partition queue closed".into()))?;
        }
        drop(tx);

        let shared = Arc::new(ExecutorShared {
            task_id: self.task_id,
            config: self.config.clone(),
            computation: Arc::clone(&self.computation),
            owner_map: Arc::clone(&self.owner_map),
            partitions: Arc::clone(&self.partitions),
            server_data: Arc::clone(&self.server_data),
            vertex_types: Arc::clone(&self.vertex_types),
            vertex_philosophers: self.vertex_philosophers.clone(),
            partition_philosophers: self.partition_philosophers.clone(),
            global_token: Arc::clone(&self.global_token),
            partition_token: Arc::clone(&self.partition_token),
            transport: Arc::clone(&self.transport),
            counters: Arc::clone(&self.counters),
            changes: Arc::clone(&self.changes),
        });

        let threads = self
            .config
            .compute_threads
            .min(my_partitions.len().max(1));
        let mut totals = crate::stats::PartitionStats::default();
        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(threads);
            for _ in 0..threads {
                let shared = Arc::clone(&shared);
                let rx = rx.clone();
                handles.push(
                    scope.spawn(move || PartitionExecutor::new(shared, rx, superstep, phase).run()),
                );
            }
            for handle in handles {
                let stats = handle
                    .join()
                    .map_err(|_| EngineError::Interrupted("compute thread panicked".into()))??;
                totals.merge(&stats);
            }
            Ok(())
        })?;

        // Quiesce before any token moves: a remote observer must see our
        // messages before it can see our token.
        self.transport.wait_all_requests()?;
        if self.config.serializability == SerializabilityMode::Token {
            self.hand_tokens_on()?;
        }

        self.superstep.store(superstep + 1, Ordering::Release);
        let after = self.counters.snapshot();
        Ok(SuperstepStats {
            superstep,
            vertices: totals.vertices,
            finished: totals.finished,
            edges: totals.edges,
            computed: totals.computed,
            sent: before.delta(&after),
        })
    }

    fn hand_tokens_on(&self) -> Result<()> {
        if let Some(next) = self.global_token.begin_handoff() {
            self.counters
                .tokens_passed
                .fetch_add(1, Ordering::Relaxed);
            if next == self.task_id {
                self.global_token.receive();
            } else {
                trace!("task {}: global token to task {next}", self.task_id);
                self.transport.send_request(
                    next,
                    WorkerRequest::SendGlobalToken {
                        from: self.task_id,
                        to: next,
                    },
                )?;
                self.transport.wait_all_requests()?;
            }
        }
        if let Some((from, to)) = self.partition_token.advance() {
            trace!("task {}: partition token {from} -> {to}", self.task_id);
        }
        Ok(())
    }

    /// Apply removal signals and resolve messages addressed to missing
    /// vertices. Runs at the superstep boundary, before compute.
    fn resolve_vertex_changes(&self) -> Result<()> {
        let removals = self.changes.drain_removals();
        let mut removals_by_partition: HashMap<PartitionId, Vec<C::Id>> = HashMap::new();
        for id in removals {
            let owner = self.owner_map.owner_of(&id)?;
            if owner.task_id != self.task_id {
                // Removal of remote vertices is not supported at this
                // layer; the signal only targets owned vertices.
                continue;
            }
            self.tombstones.insert(id.clone(), ());
            removals_by_partition
                .entry(owner.partition_id)
                .or_default()
                .push(id);
        }

        let stores = self.inbound_stores();
        for pid in self.owner_map.partitions_of_task(self.task_id) {
            let handle = self.partitions.get_or_create(pid);
            let mut partition = handle.lock();
            if let Some(ids) = removals_by_partition.remove(&pid) {
                for id in ids {
                    let has_messages = stores
                        .iter()
                        .any(|s| s.has_messages_for_vertex(pid, &id));
                    apply_resolution(
                        &mut partition,
                        &id,
                        self.resolver.as_ref(),
                        has_messages,
                        true,
                        true,
                    )?;
                }
            }
            for store in &stores {
                for id in store.vertex_ids_with_messages(pid) {
                    if partition.contains(&id) {
                        continue;
                    }
                    let tombstoned = self.tombstones.contains_key(&id);
                    let created = apply_resolution(
                        &mut partition,
                        &id,
                        self.resolver.as_ref(),
                        true,
                        false,
                        tombstoned,
                    )?;
                    if !created {
                        // Nobody will ever drain these; drop them so the
                        // termination check is not wedged open.
                        let _ = store.remove_vertex_messages(pid, &id)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn inbound_stores(&self) -> Vec<Arc<dyn MessageStore<C::Id, C::Message>>> {
        let mut stores = Vec::new();
        if self.config.is_async() {
            if let Ok(s) = self.server_data.remote_store() {
                stores.push(s);
            }
            if let Ok(s) = self.server_data.local_store() {
                stores.push(s);
            }
        } else if let Ok(s) = self.server_data.current_store() {
            stores.push(s);
        }
        stores
    }

    /// Switch a multi-phase job to its next phase. The logical superstep
    /// restarts at zero.
    pub fn advance_phase(&self) -> Result<()> {
        self.server_data.advance_phase()?;
        self.phase.fetch_add(1, Ordering::AcqRel);
        self.superstep.store(0, Ordering::Release);
        Ok(())
    }

    /// True when an inbound store still holds a message for any owned
    /// partition.
    pub fn has_pending_messages(&self) -> bool {
        self.owner_map
            .partitions_of_task(self.task_id)
            .iter()
            .any(|&pid| !self.server_data.partition_is_quiet(pid))
    }

    /// Read one owned vertex under its partition lock.
    pub fn read_vertex<T>(
        &self,
        id: &C::Id,
        f: impl FnOnce(&Vertex<C::Id, C::Value, C::Edge>) -> T,
    ) -> Option<T> {
        let owner = self.owner_map.owner_of(id).ok()?;
        if owner.task_id != self.task_id {
            return None;
        }
        let handle = self.partitions.get(owner.partition_id)?;
        let partition = handle.lock();
        partition.get(id).map(f)
    }

    /// Total owned vertices.
    pub fn num_vertices(&self) -> usize {
        self.owner_map
            .partitions_of_task(self.task_id)
            .iter()
            .filter_map(|&pid| self.partitions.get(pid))
            .map(|h| h.lock().len())
            .sum()
    }

    fn active_philosophers(&self) -> Result<&Arc<PhilosophersTable>> {
        self.vertex_philosophers
            .as_ref()
            .or(self.partition_philosophers.as_ref())
            .ok_or_else(|| {
                EngineError::WireFormat(
                    "fork/token request arrived but no lock discipline is active".into(),
                )
            })
    }
}

impl<C: Computation> RequestHandler for Worker<C> {
    fn handle_request(&self, from: TaskId, req: WorkerRequest) -> Result<()> {
        match req {
            WorkerRequest::SendWorkerMessages { batches } => {
                for (wire_pid, pairs) in batches {
                    let (pid, next_phase) = wire::split_wire_partition_id(wire_pid);
                    let store = if !self.config.is_async() {
                        self.server_data.incoming_store()?
                    } else if next_phase {
                        self.server_data.next_phase_remote_store()?
                    } else {
                        self.server_data.remote_store()?
                    };
                    store.add_encoded_batch(pid, &pairs)?;
                }
                Ok(())
            }
            WorkerRequest::SendToken { from, to } => {
                self.active_philosophers()?.receive_token(from, to)
            }
            WorkerRequest::SendFork { from, to } => {
                self.active_philosophers()?.receive_fork(from, to)
            }
            WorkerRequest::SendGlobalToken { to, .. } => {
                if to != self.task_id {
                    return Err(EngineError::WireFormat(format!(
                        "global token for task {to} arrived at task {}",
                        self.task_id
                    )));
                }
                trace!("task {}: received global token from {from}", self.task_id);
                self.global_token.receive();
                Ok(())
            }
            WorkerRequest::SendPartitionToken { to, .. } => {
                self.partition_token.receive(to);
                Ok(())
            }
        }
    }
}
