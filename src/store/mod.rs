//! Inbound message stores.
//!
//! A store holds encoded messages keyed by destination partition and vertex.
//! Two implementations back the two algorithm families:
//!
//! - [`ByteQueueStore`]: append-only queues with destructive drain: the
//!   default for algorithms that accept partial message sets.
//! - [`LatestBySourceStore`]: keeps only the latest message per source and
//!   reads without draining: for algorithms that need every neighbour's
//!   latest message every pass, where the next round overwrites.
//!
//! Concurrent appends targeting the same vertex are serialised by that
//! queue's own lock; the partition- and vertex-level maps are lock-free
//! insert-if-absent.

mod byte_queue;
mod latest_by_source;

pub use byte_queue::ByteQueueStore;
pub use latest_by_source::LatestBySourceStore;

use crate::error::Result;
use crate::id::{Payload, PartitionId, VertexId};
use std::sync::Arc;

/// Single-pass iterable of decoded messages, valid only for the current
/// compute invocation.
pub struct Messages<M> {
    iter: std::vec::IntoIter<M>,
}

impl<M> Messages<M> {
    pub fn empty() -> Self {
        Self {
            iter: Vec::new().into_iter(),
        }
    }

    pub fn from_vec(v: Vec<M>) -> Self {
        Self {
            iter: v.into_iter(),
        }
    }

    /// Remaining message count.
    pub fn len(&self) -> usize {
        self.iter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iter.len() == 0
    }

    /// Concatenate two message sets, `self` first.
    pub fn chain(self, other: Messages<M>) -> Messages<M> {
        let mut v: Vec<M> = self.iter.collect();
        v.extend(other.iter);
        Messages::from_vec(v)
    }
}

impl<M> Iterator for Messages<M> {
    type Item = M;

    fn next(&mut self) -> Option<M> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<M> ExactSizeIterator for Messages<M> {}

/// Operations every inbound store supports.
///
/// `source` accompanies each append so the overwrite-by-source variant can
/// key on it; the queue variant ignores it.
pub trait MessageStore<I: VertexId, M: Payload>: Send + Sync {
    /// Append one message; atomic for concurrent callers targeting the
    /// same destination.
    fn add_message(&self, pid: PartitionId, dest: &I, source: &I, msg: &M) -> Result<()>;

    /// Batch-append pairs of (encoded destination id, encoded message)
    /// exactly as they arrived off the wire, preferring raw byte copy over
    /// a decode/re-encode round trip. Final queue contents per destination
    /// equal a sequence of single appends in batch order.
    fn add_encoded_batch(&self, pid: PartitionId, pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;

    /// Atomically snapshot and clear the destination's messages. Later
    /// appends form a new queue.
    fn remove_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>>;

    /// Read without draining.
    fn read_vertex_messages(&self, pid: PartitionId, dest: &I) -> Result<Messages<M>>;

    fn has_messages_for_vertex(&self, pid: PartitionId, dest: &I) -> bool;

    fn has_messages_for_partition(&self, pid: PartitionId) -> bool;

    /// Destinations currently holding messages in `pid` (for resolution of
    /// messages to missing vertices).
    fn vertex_ids_with_messages(&self, pid: PartitionId) -> Vec<I>;

    /// Drop every queue for a partition.
    fn clear_partition(&self, pid: PartitionId);

    fn clear_all(&self);
}

/// Build the store variant the configuration calls for.
pub fn new_store<I: VertexId, M: Payload>(
    need_all_msgs: bool,
    buffer_limit: usize,
) -> Arc<dyn MessageStore<I, M>> {
    if need_all_msgs {
        Arc::new(LatestBySourceStore::new())
    } else {
        Arc::new(ByteQueueStore::new(buffer_limit))
    }
}
