//! # Irongraph
//!
//! A **vertex-centric graph processing core** for Rust in the tradition of
//! Pregel and Apache Giraph. Irongraph implements the worker side of a
//! distributed "think like a vertex" engine: user-supplied per-vertex
//! computations run over partitioned graphs in supersteps, exchanging
//! messages through batched, short-circuiting message plumbing.
//!
//! ## Key Features
//!
//! - **Three execution disciplines** - synchronous bulk-synchronous-parallel
//!   (BSP), asynchronous with barriers (AP), and barrierless asynchronous
//!   (BAP)
//! - **Message cache with local short-circuit** - outgoing messages batch
//!   per destination worker; co-located sends skip serialisation entirely
//!   under the asynchronous disciplines
//! - **Per-partition message stores** - concurrent append, destructive
//!   drain, and an overwrite-by-source variant for algorithms that need
//!   every neighbour's latest message
//! - **Serialisable asynchronous execution** - token rings and the
//!   Chandy-Misra hygienic dining-philosophers protocol at vertex or
//!   partition granularity
//! - **Vertex resolution** - lazy creation on first message and removal
//!   signals applied at superstep boundaries
//! - **Type-safe** - generic over id, vertex value, edge value and message
//!   types via the [`Computation`] trait
//!
//! ## Quick Start
//!
//! Single-source shortest paths on one in-process worker:
//!
//! ```no_run
//! use irongraph::*;
//! use std::sync::Arc;
//!
//! struct MinDistance;
//!
//! impl Computation for MinDistance {
//!     type Id = u32;
//!     type Value = f64;
//!     type Edge = f64;
//!     type Message = f64;
//!
//!     fn compute(
//!         &self,
//!         ctx: &mut ComputeContext<'_, Self>,
//!         vertex: &mut Vertex<u32, f64, f64>,
//!         messages: Messages<f64>,
//!     ) -> Result<()> {
//!         if ctx.superstep() == 0 && *vertex.id() == 1 {
//!             vertex.set_value(0.0);
//!         }
//!         let best = messages.fold(*vertex.value(), f64::min);
//!         if best < *vertex.value() || ctx.superstep() == 0 {
//!             vertex.set_value(best);
//!             let here = *vertex.value();
//!             let out: Vec<(u32, f64)> = vertex
//!                 .edges()
//!                 .iter()
//!                 .map(|e| (e.target, here + e.value))
//!                 .collect();
//!             for (target, dist) in out {
//!                 ctx.send_message(&target, &dist)?;
//!             }
//!         }
//!         vertex.vote_to_halt();
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let cluster = testing::TestCluster::new(
//!     1,
//!     2,
//!     EngineConfig::default(),
//!     Arc::new(MinDistance),
//!     Arc::new(DefaultResolver),
//! )?;
//! cluster.add_vertex(vertex_with_edges(1, f64::INFINITY, vec![(2, 1.0)]))?;
//! cluster.add_vertex(vertex_with_edges(2, f64::INFINITY, vec![(3, 1.0)]))?;
//! cluster.add_vertex(vertex_with_edges(3, f64::INFINITY, vec![]))?;
//! cluster.finish_loading()?;
//! cluster.run_to_convergence(50)?;
//! assert_eq!(cluster.vertex_value(&2), Some(1.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Supersteps
//!
//! A superstep is one epoch of vertex-centric computation. Under BSP it is
//! bracketed by barriers: messages sent in superstep `s` are visible
//! exactly once in superstep `s + 1`. Under the asynchronous disciplines a
//! single `remote` and `local` store persist across supersteps and
//! messages become visible as soon as they land.
//!
//! ### Computation
//!
//! Implement [`Computation`] for your algorithm. The engine calls
//! [`compute`](Computation::compute) once per active vertex per logical
//! superstep with a single-pass message iterable; user code reads and
//! writes the vertex, sends messages through the [`ComputeContext`], and
//! votes to halt when it has nothing left to do. A halted vertex stays
//! inactive until a message wakes it.
//!
//! ### Partitions and workers
//!
//! Each [`Worker`](worker::Worker) owns a set of partitions; each
//! partition is processed by exactly one compute thread per pass, drawn
//! from a shared queue. The [`OwnerMap`] resolves any vertex id to its
//! `(worker, task, partition)` owner in O(1).
//!
//! ### Serialisability
//!
//! Some algorithms (graph colouring is the classic case) need neighbouring
//! vertices never to compute concurrently. Pick a
//! [`SerializabilityMode`]:
//!
//! - `Token` - a global token over the worker ring plus one partition
//!   token per worker gate boundary vertices coarsely
//! - `VertexLock` - dining philosophers per boundary vertex
//! - `PartitionLock` - dining philosophers per partition
//!
//! ## Module Overview
//!
//! - [`computation`] - the user computation trait and compute context
//! - [`worker`] - superstep orchestration and the request receive path
//! - [`graph`] - vertices, partitions, ownership, vertex resolution
//! - [`store`] - inbound message stores
//! - [`cache`] - outgoing message batching and the local short-circuit
//! - [`server_data`] - store rotation across superstep and phase
//!   boundaries
//! - [`tokens`] / [`philosophers`] - the serialisability layer
//! - [`vertex_type`] - boundary classification for the token discipline
//! - [`wire`] / [`transport`] - request encoding and the transport seam
//! - [`config`] / [`error`] / [`stats`] - configuration, error kinds,
//!   counters
//! - [`testing`] - in-process cluster harness, builders and assertions
//! - [`metrics`] - metrics reporting (feature: `metrics`, on by default)

pub mod cache;
pub mod codec;
pub mod computation;
pub mod config;
pub mod error;
mod executor;
pub mod graph;
pub mod id;
pub mod philosophers;
pub mod server_data;
pub mod stats;
pub mod store;
pub mod testing;
pub mod tokens;
pub mod transport;
pub mod vertex_type;
pub mod wire;
pub mod worker;

#[cfg(feature = "metrics")]
pub mod metrics;

// General re-exports
pub use cache::RequestProcessor;
pub use computation::{Computation, ComputeContext};
pub use config::{AsyncConfig, EngineConfig, SerializabilityMode};
pub use error::{EngineError, Result};
pub use graph::{
    DefaultResolver, Edge, OwnerMap, Partition, PartitionOwner, PartitionStore, Vertex,
    VertexResolver, vertex_with_edges,
};
pub use id::{PartitionId, Payload, TaskId, VertexId, WorkerId};
pub use philosophers::PhilosophersTable;
pub use server_data::ServerData;
pub use stats::{CounterSnapshot, PartitionStats, SuperstepStats, WorkerCounters};
pub use store::{ByteQueueStore, LatestBySourceStore, MessageStore, Messages};
pub use tokens::{GlobalTokenRing, PartitionTokenRing};
pub use transport::{LocalFabric, LocalTransport, RequestHandler, Transport};
pub use vertex_type::{VertexType, VertexTypeStore};
pub use wire::{NEXT_PHASE_FLAG, WorkerRequest};
pub use worker::Worker;
