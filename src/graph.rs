//! Graph model: vertices, partitions, partition ownership and the
//! between-superstep vertex resolver.
//!
//! A [`Partition`] is owned by exactly one compute thread for the duration
//! of a superstep pass; the [`PartitionStore`] hands out `Arc<Mutex<_>>`
//! handles so acquisition is a plain lock. Vertex maps are mutated only
//! between supersteps (resolver application) or under the partition's own
//! lock.

use crate::error::{EngineError, Result};
use crate::id::{Payload, PartitionId, TaskId, VertexId, WorkerId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

/// A directed out-edge.
#[derive(Clone, Debug)]
pub struct Edge<I, E> {
    pub target: I,
    pub value: E,
}

impl<I, E> Edge<I, E> {
    pub fn new(target: I, value: E) -> Self {
        Self { target, value }
    }
}

/// A vertex with its value, out-edges and halt flag.
///
/// All field access during a superstep happens from the single compute
/// thread that owns the enclosing partition, so the fields need no interior
/// synchronisation.
#[derive(Clone, Debug)]
pub struct Vertex<I, V, E> {
    id: I,
    value: V,
    edges: Vec<Edge<I, E>>,
    halted: bool,
}

impl<I: VertexId, V: Payload, E: Payload> Vertex<I, V, E> {
    pub fn new(id: I, value: V, edges: Vec<Edge<I, E>>) -> Self {
        Self {
            id,
            value,
            edges,
            halted: false,
        }
    }

    pub fn id(&self) -> &I {
        &self.id
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn set_value(&mut self, value: V) {
        self.value = value;
    }

    pub fn edges(&self) -> &[Edge<I, E>] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut Vec<Edge<I, E>> {
        &mut self.edges
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Vote to halt. The vertex stays inactive until a message wakes it.
    pub fn vote_to_halt(&mut self) {
        self.halted = true;
    }

    pub fn wake(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

/// A worker-owned slice of the graph.
#[derive(Debug)]
pub struct Partition<I, V, E> {
    id: PartitionId,
    vertices: HashMap<I, Vertex<I, V, E>>,
}

impl<I: VertexId, V: Payload, E: Payload> Partition<I, V, E> {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            vertices: HashMap::new(),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn insert(&mut self, vertex: Vertex<I, V, E>) {
        self.vertices.insert(vertex.id().clone(), vertex);
    }

    pub fn remove(&mut self, id: &I) -> Option<Vertex<I, V, E>> {
        self.vertices.remove(id)
    }

    pub fn get(&self, id: &I) -> Option<&Vertex<I, V, E>> {
        self.vertices.get(id)
    }

    pub fn get_mut(&mut self, id: &I) -> Option<&mut Vertex<I, V, E>> {
        self.vertices.get_mut(id)
    }

    pub fn contains(&self, id: &I) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex_ids(&self) -> Vec<I> {
        self.vertices.keys().cloned().collect()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex<I, V, E>> {
        self.vertices.values()
    }

    pub fn vertices_mut(&mut self) -> impl Iterator<Item = &mut Vertex<I, V, E>> {
        self.vertices.values_mut()
    }

    pub fn all_halted(&self) -> bool {
        self.vertices.values().all(Vertex::is_halted)
    }
}

/// Concurrent registry of the partitions a worker owns.
///
/// `get_or_create` may race freely; mutating a given partition requires its
/// mutex, which the compute loop holds for the whole pass.
pub struct PartitionStore<I, V, E> {
    partitions: DashMap<PartitionId, Arc<Mutex<Partition<I, V, E>>>>,
}

impl<I: VertexId, V: Payload, E: Payload> PartitionStore<I, V, E> {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, id: PartitionId) -> Arc<Mutex<Partition<I, V, E>>> {
        self.partitions
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Partition::new(id))))
            .clone()
    }

    pub fn get(&self, id: PartitionId) -> Option<Arc<Mutex<Partition<I, V, E>>>> {
        self.partitions.get(&id).map(|p| p.clone())
    }

    /// Ids of all partitions currently held, in ascending order.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self.partitions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
}

impl<I: VertexId, V: Payload, E: Payload> Default for PartitionStore<I, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker-local view of who owns a partition. Stable within a superstep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionOwner {
    pub partition_id: PartitionId,
    pub worker_id: WorkerId,
    pub task_id: TaskId,
}

/// O(1) mapping from vertex id to its [`PartitionOwner`].
pub struct OwnerMap<I> {
    owners: HashMap<PartitionId, PartitionOwner>,
    partitioner: Box<dyn Fn(&I) -> PartitionId + Send + Sync>,
}

impl<I: VertexId> OwnerMap<I> {
    /// Build an owner map from an explicit owner table and partitioner.
    /// The partitioner must map every id into one of the registered
    /// partition ids; lookups for an unregistered partition fail.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedConfig`] when `owners` is empty or lists
    /// the same partition twice.
    pub fn new(
        owners: Vec<PartitionOwner>,
        partitioner: impl Fn(&I) -> PartitionId + Send + Sync + 'static,
    ) -> Result<Self> {
        if owners.is_empty() {
            return Err(EngineError::UnsupportedConfig(
                "owner map needs at least one partition owner".into(),
            ));
        }
        let mut table = HashMap::with_capacity(owners.len());
        for owner in owners {
            if table.insert(owner.partition_id, owner).is_some() {
                return Err(EngineError::UnsupportedConfig(format!(
                    "partition {} has more than one registered owner",
                    owner.partition_id
                )));
            }
        }
        Ok(Self {
            owners: table,
            partitioner: Box::new(partitioner),
        })
    }

    /// Owner map over `owners` that assigns vertices to partitions by id
    /// modulo the partition count. Integer ids use their ordinal directly;
    /// byte-string ids hash first.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedConfig`] when the owners' partition ids
    /// are not exactly `0..owners.len()`, which the modulo assignment
    /// depends on.
    pub fn modulo(owners: Vec<PartitionOwner>) -> Result<Self> {
        let n = owners.len() as u64;
        let mut ids: Vec<_> = owners.iter().map(|o| o.partition_id).collect();
        ids.sort_unstable();
        if ids.iter().enumerate().any(|(i, &pid)| pid as usize != i) {
            return Err(EngineError::UnsupportedConfig(format!(
                "modulo assignment needs contiguous partition ids 0..{n}, got {ids:?}"
            )));
        }
        Self::new(owners, move |id: &I| {
            let ordinal = id.lock_ordinal().unwrap_or_else(|| {
                let mut h = DefaultHasher::new();
                id.hash(&mut h);
                h.finish()
            });
            (ordinal % n) as PartitionId
        })
    }

    pub fn partition_of(&self, id: &I) -> PartitionId {
        (self.partitioner)(id)
    }

    pub fn owner_of(&self, id: &I) -> Result<PartitionOwner> {
        let pid = self.partition_of(id);
        self.owner_of_partition(pid)
    }

    pub fn owner_of_partition(&self, pid: PartitionId) -> Result<PartitionOwner> {
        self.owners.get(&pid).copied().ok_or_else(|| {
            EngineError::UnsupportedConfig(format!(
                "no owner registered for partition {pid}; the partitioner \
                 does not match the owner table"
            ))
        })
    }

    /// Partitions assigned to `task`, ascending.
    pub fn partitions_of_task(&self, task: TaskId) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self
            .owners
            .values()
            .filter(|o| o.task_id == task)
            .map(|o| o.partition_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every task in the job, ascending. This is the global token ring.
    pub fn all_tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<_> = self.owners.values().map(|o| o.task_id).collect();
        tasks.sort_unstable();
        tasks.dedup();
        tasks
    }

    pub fn num_partitions(&self) -> usize {
        self.owners.len()
    }
}

/// Decides what becomes of a vertex at a superstep boundary when messages
/// arrived for a missing vertex or a removal was signalled.
///
/// `tombstoned` reports whether the vertex was removed at an earlier
/// boundary; a resolver may use it to refuse re-creation.
pub trait VertexResolver<I: VertexId, V: Payload, E: Payload>: Send + Sync {
    fn resolve(
        &self,
        id: &I,
        existing: Option<Vertex<I, V, E>>,
        has_messages: bool,
        removed: bool,
        tombstoned: bool,
    ) -> Option<Vertex<I, V, E>>;
}

/// Default resolution: removal wins over the old vertex; a message to a
/// missing vertex creates it with a default value and no out-edges (such a
/// vertex halts normally after computing).
pub struct DefaultResolver;

impl<I: VertexId, V: Payload + Default, E: Payload> VertexResolver<I, V, E> for DefaultResolver {
    fn resolve(
        &self,
        id: &I,
        existing: Option<Vertex<I, V, E>>,
        has_messages: bool,
        removed: bool,
        _tombstoned: bool,
    ) -> Option<Vertex<I, V, E>> {
        if removed {
            return None;
        }
        match existing {
            Some(v) => Some(v),
            None if has_messages => Some(Vertex::new(id.clone(), V::default(), Vec::new())),
            None => None,
        }
    }
}

/// Mutation signals collected during a superstep, applied at the next
/// boundary.
pub struct VertexChangeLog<I> {
    removals: Mutex<Vec<I>>,
}

impl<I: VertexId> VertexChangeLog<I> {
    pub fn new() -> Self {
        Self {
            removals: Mutex::new(Vec::new()),
        }
    }

    pub fn signal_removal(&self, id: I) {
        self.removals.lock().push(id);
    }

    pub fn drain_removals(&self) -> Vec<I> {
        std::mem::take(&mut *self.removals.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.removals.lock().is_empty()
    }
}

impl<I: VertexId> Default for VertexChangeLog<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a vertex inline; test and loader convenience.
pub fn vertex_with_edges<I: VertexId, V: Payload, E: Payload>(
    id: I,
    value: V,
    edges: Vec<(I, E)>,
) -> Vertex<I, V, E> {
    Vertex::new(
        id,
        value,
        edges.into_iter().map(|(t, v)| Edge::new(t, v)).collect(),
    )
}

/// Run one resolver decision against a partition. Returns whether the
/// vertex exists afterwards.
pub fn apply_resolution<I: VertexId, V: Payload, E: Payload>(
    partition: &mut Partition<I, V, E>,
    id: &I,
    resolver: &dyn VertexResolver<I, V, E>,
    has_messages: bool,
    removed: bool,
    tombstoned: bool,
) -> Result<bool> {
    let existing = partition.remove(id);
    match resolver.resolve(id, existing, has_messages, removed, tombstoned) {
        Some(mut v) => {
            if has_messages {
                v.wake();
            }
            partition.insert(v);
            Ok(true)
        }
        None => Ok(false),
    }
}
