//! Testing utilities: an in-process cluster harness, graph builders and
//! assertion helpers.
//!
//! [`TestCluster`] wires K workers over a [`LocalFabric`] and stands in for
//! the external master: it drives superstep rounds until every vertex has
//! halted and no messages are pending, which is exactly the cluster-wide
//! termination condition a real coordinator would check.

use crate::computation::Computation;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::{Edge, OwnerMap, PartitionOwner, Vertex, VertexResolver};
use crate::id::{Payload, TaskId, VertexId};
use crate::stats::SuperstepStats;
use crate::transport::LocalFabric;
use crate::worker::Worker;
use std::sync::Arc;

/// K in-process workers over an in-memory fabric.
pub struct TestCluster<C: Computation> {
    fabric: Arc<LocalFabric>,
    workers: Vec<Arc<Worker<C>>>,
    owner_map: Arc<OwnerMap<C::Id>>,
    config: EngineConfig,
}

impl<C: Computation> TestCluster<C> {
    /// Build a cluster of `num_workers` workers with
    /// `partitions_per_worker` partitions each, assigned round-robin so
    /// partition `p` lives on task `p % num_workers`.
    pub fn new(
        num_workers: u32,
        partitions_per_worker: u32,
        config: EngineConfig,
        computation: Arc<C>,
        resolver: Arc<dyn VertexResolver<C::Id, C::Value, C::Edge>>,
    ) -> Result<Self> {
        let total = num_workers * partitions_per_worker;
        let owners = (0..total)
            .map(|pid| PartitionOwner {
                partition_id: pid,
                worker_id: pid % num_workers,
                task_id: pid % num_workers,
            })
            .collect();
        Self::with_owner_map(
            num_workers,
            Arc::new(OwnerMap::modulo(owners)?),
            config,
            computation,
            resolver,
        )
    }

    /// Build a cluster over an explicit owner map, for tests that pin
    /// particular vertices to particular workers.
    pub fn with_owner_map(
        num_workers: u32,
        owner_map: Arc<OwnerMap<C::Id>>,
        config: EngineConfig,
        computation: Arc<C>,
        resolver: Arc<dyn VertexResolver<C::Id, C::Value, C::Edge>>,
    ) -> Result<Self> {
        let fabric = LocalFabric::new();
        let mut workers = Vec::with_capacity(num_workers as usize);
        for task in 0..num_workers {
            let transport = Arc::new(fabric.endpoint(task));
            workers.push(Arc::new(Worker::new(
                config.clone(),
                task,
                task,
                Arc::clone(&owner_map),
                Arc::clone(&computation),
                Arc::clone(&resolver),
                transport,
            )?));
        }
        for worker in &workers {
            let handler: Arc<dyn crate::transport::RequestHandler> = worker.clone();
            fabric.start(worker.task_id(), handler)?;
        }
        Ok(Self {
            fabric,
            workers,
            owner_map,
            config,
        })
    }

    pub fn worker(&self, task: TaskId) -> &Arc<Worker<C>> {
        &self.workers[task as usize]
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn owner_map(&self) -> &Arc<OwnerMap<C::Id>> {
        &self.owner_map
    }

    /// Route a vertex to whichever worker owns it.
    pub fn add_vertex(&self, vertex: Vertex<C::Id, C::Value, C::Edge>) -> Result<()> {
        let owner = self.owner_map.owner_of(vertex.id())?;
        self.workers[owner.task_id as usize].add_vertex(vertex)
    }

    /// Finish graph load on every worker.
    pub fn finish_loading(&self) -> Result<()> {
        for worker in &self.workers {
            worker.finish_loading()?;
        }
        Ok(())
    }

    /// Run one superstep on every worker concurrently (workers exchange
    /// messages, forks and tokens while they run).
    pub fn run_round(&self) -> Result<Vec<SuperstepStats>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .iter()
                .map(|w| {
                    let worker = Arc::clone(w);
                    scope.spawn(move || worker.run_superstep())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| EngineError::Interrupted("worker thread panicked".into()))?
                })
                .collect()
        })
    }

    /// Run exactly `n` rounds, collecting each round's statistics.
    pub fn run_rounds(&self, n: u64) -> Result<Vec<Vec<SuperstepStats>>> {
        (0..n).map(|_| self.run_round()).collect()
    }

    /// Drive rounds until every vertex everywhere has halted and no
    /// messages are pending. Returns the number of rounds run.
    ///
    /// Under overwrite-by-source semantics the stores never drain, so
    /// halting alone decides termination there.
    pub fn run_to_convergence(&self, max_rounds: u64) -> Result<u64> {
        let need_all = self.config.async_conf.need_all_msgs;
        for round in 1..=max_rounds {
            let stats = self.run_round()?;
            let all_halted = stats.iter().all(SuperstepStats::all_halted);
            let pending = !need_all && self.workers.iter().any(|w| w.has_pending_messages());
            if all_halted && !pending && self.fabric.is_quiet() {
                return Ok(round);
            }
        }
        Err(EngineError::Interrupted(format!(
            "no convergence after {max_rounds} rounds"
        )))
    }

    /// Switch every worker to the next phase.
    pub fn advance_phase(&self) -> Result<()> {
        for worker in &self.workers {
            worker.advance_phase()?;
        }
        Ok(())
    }

    /// Read a vertex value from whichever worker owns it.
    pub fn vertex_value(&self, id: &C::Id) -> Option<C::Value> {
        let owner = self.owner_map.owner_of(id).ok()?;
        self.workers[owner.task_id as usize].read_vertex(id, |v| v.value().clone())
    }

    /// Whether the vertex currently exists anywhere in the cluster.
    pub fn vertex_exists(&self, id: &C::Id) -> bool {
        let Ok(owner) = self.owner_map.owner_of(id) else {
            return false;
        };
        self.workers[owner.task_id as usize]
            .read_vertex(id, |_| ())
            .is_some()
    }

    /// Total vertices across the cluster.
    pub fn num_vertices(&self) -> usize {
        self.workers.iter().map(|w| w.num_vertices()).sum()
    }
}

impl<C: Computation> Drop for TestCluster<C> {
    fn drop(&mut self) {
        self.fabric.shutdown();
    }
}

/// Build a vertex whose edges carry `()`-like default values.
pub fn vertex<I: VertexId, V: Payload, E: Payload + Default>(
    id: I,
    value: V,
    targets: Vec<I>,
) -> Vertex<I, V, E> {
    Vertex::new(
        id,
        value,
        targets
            .into_iter()
            .map(|t| Edge::new(t, E::default()))
            .collect(),
    )
}

/// Assert the cluster holds exactly the expected value at each id.
pub fn assert_vertex_values<C>(cluster: &TestCluster<C>, expected: &[(C::Id, C::Value)])
where
    C: Computation,
    C::Value: PartialEq,
{
    for (id, value) in expected {
        let got = cluster.vertex_value(id);
        assert!(
            got.as_ref() == Some(value),
            "vertex {id:?}: expected {value:?}, got {got:?}"
        );
    }
}
