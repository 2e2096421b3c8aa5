//! Vertex classification by where a vertex's out-neighbours live.
//!
//! Computed once after graph load and read-only afterwards. The token
//! discipline consults the tag per vertex to decide which tokens gate its
//! computation.

use crate::error::Result;
use crate::graph::{OwnerMap, PartitionStore};
use crate::id::{Payload, VertexId, WorkerId};
use dashmap::DashMap;
use rayon::prelude::*;

/// Where a vertex's out-neighbours reside relative to its own partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexType {
    /// Every out-neighbour is in the same partition.
    Internal,
    /// Every out-neighbour is on this worker, at least one in a different
    /// partition.
    LocalBoundary,
    /// Every out-of-partition neighbour is on a different worker.
    RemoteBoundary,
    /// Out-of-partition neighbours both on this worker and off it.
    MixedBoundary,
}

pub struct VertexTypeStore<I> {
    my_worker: WorkerId,
    types: DashMap<I, VertexType>,
}

impl<I: VertexId> VertexTypeStore<I> {
    pub fn new(my_worker: WorkerId) -> Self {
        Self {
            my_worker,
            types: DashMap::new(),
        }
    }

    /// Walk every owned vertex's out-edges and record its tag. Partitions
    /// are classified in parallel; the store is read-only afterwards.
    pub fn classify<V: Payload, E: Payload>(
        &self,
        partitions: &PartitionStore<I, V, E>,
        owners: &OwnerMap<I>,
    ) -> Result<()> {
        partitions
            .partition_ids()
            .par_iter()
            .try_for_each(|&pid| -> Result<()> {
                let Some(partition) = partitions.get(pid) else {
                    return Ok(());
                };
                let partition = partition.lock();
                for vertex in partition.vertices() {
                    let mut off_worker = false;
                    let mut off_partition_local = false;
                    for edge in vertex.edges() {
                        if edge.target == *vertex.id() {
                            continue;
                        }
                        let owner = owners.owner_of(&edge.target)?;
                        if owner.worker_id != self.my_worker {
                            off_worker = true;
                        } else if owner.partition_id != pid {
                            off_partition_local = true;
                        }
                    }
                    let tag = match (off_partition_local, off_worker) {
                        (false, false) => VertexType::Internal,
                        (true, false) => VertexType::LocalBoundary,
                        (false, true) => VertexType::RemoteBoundary,
                        (true, true) => VertexType::MixedBoundary,
                    };
                    self.types.insert(vertex.id().clone(), tag);
                }
                Ok(())
            })
    }

    /// Tag for `id`; vertices never classified default to internal.
    pub fn vertex_type(&self, id: &I) -> VertexType {
        self.types.get(id).map(|t| *t).unwrap_or(VertexType::Internal)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
